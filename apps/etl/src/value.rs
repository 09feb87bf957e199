use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Generated integer identifier of a warehouse row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurrogateKey(pub i64);

impl fmt::Display for SurrogateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single column value as written to the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    #[cfg(test)]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<SurrogateKey> for Scalar {
    fn from(key: SurrogateKey) -> Self {
        Scalar::Int(key.0)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<NaiveDate> for Scalar {
    fn from(v: NaiveDate) -> Self {
        Scalar::Date(v)
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        v.map_or(Scalar::Null, Into::into)
    }
}

/// How a natural-key column is canonicalised before lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    Trim,
    Upper,
    Lower,
}

impl Normalization {
    pub fn apply(self, value: &Scalar) -> Scalar {
        let Scalar::Text(s) = value else {
            return value.clone();
        };
        match normalize_text(s) {
            None => Scalar::Null,
            Some(t) => Scalar::Text(match self {
                Normalization::Trim => t,
                Normalization::Upper => t.to_uppercase(),
                Normalization::Lower => t.to_lowercase(),
            }),
        }
    }
}

/// Trims, collapses runs of whitespace to a single space, and maps blank to `None`.
pub fn normalize_text(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Ordered column/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    fields: Vec<(&'static str, Scalar)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column, replacing any earlier value for it.
    pub fn set(mut self, column: &'static str, value: impl Into<Scalar>) -> Self {
        let value = value.into();
        match self.fields.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
        self
    }

    pub fn get(&self, column: &str) -> Option<&Scalar> {
        self.fields
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(c, _)| *c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Scalar)> {
        self.fields.iter().map(|(c, v)| (*c, v))
    }
}

/// Business identity of a dimension row, plus descriptive attributes that are
/// stored when the row is first created but never take part in matching.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NaturalKey {
    pub key: Record,
    pub attributes: Record,
}

impl NaturalKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &'static str, value: impl Into<Scalar>) -> Self {
        self.key = self.key.set(column, value);
        self
    }

    pub fn with_attribute(mut self, column: &'static str, value: impl Into<Scalar>) -> Self {
        self.attributes = self.attributes.set(column, value);
        self
    }

    /// True when no key column carries a value.
    pub fn is_empty(&self) -> bool {
        self.key.iter().all(|(_, v)| v.is_null())
    }
}
