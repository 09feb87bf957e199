//! Document store surface.
//!
//! The pipeline only ever reads from here. Each worker opens its own
//! `DocumentSource` through a `SourceConnector`, mirroring the store side.

pub mod jsonl;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::SourceError;

pub use jsonl::{load_jsonl, StagingSink};
pub use memory::MemoryDocumentSource;
pub use postgres::{PgSourceConnector, PgStagingSink};

/// One semi-structured source record. Never mutated after it is read.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub id: String,
    pub body: Map<String, Value>,
}

impl SourceDocument {
    /// Builds a document from a JSON value, taking its id from `original_id`
    /// or `_id` and falling back to `fallback_id` when neither is present.
    pub fn from_value(fallback_id: impl Into<String>, value: Value) -> Result<Self, SourceError> {
        let fallback_id = fallback_id.into();
        let Value::Object(body) = value else {
            return Err(SourceError::Malformed {
                id: fallback_id,
                reason: "document is not a JSON object".to_string(),
            });
        };
        let id = ["original_id", "_id"]
            .iter()
            .find_map(|k| body.get(*k).and_then(id_text))
            .unwrap_or(fallback_id);
        Ok(Self { id, body })
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    /// True when `field` holds an array with at least one element.
    pub fn has_non_empty_array(&self, field: &str) -> bool {
        matches!(self.body.get(field), Some(Value::Array(items)) if !items.is_empty())
    }

    /// Keeps only the listed top-level fields.
    pub fn project(mut self, fields: &[String]) -> Self {
        self.body.retain(|k, _| fields.iter().any(|f| f == k));
        self
    }
}

/// Renders an id the way exports spell it: plain strings, numbers, or
/// extended-JSON `{"$oid": "..."}` objects.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => obj.get("$oid").and_then(id_text),
        _ => None,
    }
}

/// Which documents a partition reads.
///
/// No filter means the whole collection; no projection means every field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentQuery {
    pub collection: String,
    /// Only documents where this attribute is a non-empty list.
    pub non_empty: Option<String>,
    pub projection: Option<Vec<String>>,
}

impl DocumentQuery {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            non_empty: None,
            projection: None,
        }
    }

    pub fn non_empty(mut self, attribute: impl Into<String>) -> Self {
        self.non_empty = Some(attribute.into());
        self
    }

    pub fn project<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn matches(&self, doc: &SourceDocument) -> bool {
        self.non_empty
            .as_deref()
            .map_or(true, |attr| doc.has_non_empty_array(attr))
    }

    /// Applies the projection, if any.
    pub fn shape(&self, doc: SourceDocument) -> SourceDocument {
        match &self.projection {
            Some(fields) => doc.project(fields),
            None => doc,
        }
    }
}

/// Skip/limit pagination window over a query's ordered results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub skip: u64,
    pub limit: u64,
}

/// A bounded subset of source documents handed to one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSpec {
    pub index: usize,
    pub query: DocumentQuery,
    /// `None` reads every matching document.
    pub window: Option<Window>,
}

impl PartitionSpec {
    pub fn whole(query: DocumentQuery) -> Self {
        Self {
            index: 0,
            query,
            window: None,
        }
    }
}

#[async_trait]
pub trait DocumentSource: Send {
    /// Number of documents matching the query, ignoring any window.
    async fn count(&mut self, query: &DocumentQuery) -> Result<u64, SourceError>;

    /// Documents of one partition in stable source order, projected.
    async fn fetch(&mut self, partition: &PartitionSpec) -> Result<Vec<SourceDocument>, SourceError>;
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn DocumentSource>, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_prefers_original_id() {
        let doc = SourceDocument::from_value(
            "17",
            json!({"original_id": "abc", "_id": "def", "full_name": "Ada"}),
        )
        .unwrap();
        assert_eq!(doc.id, "abc");
    }

    #[test]
    fn test_id_reads_extended_json_oid() {
        let doc = SourceDocument::from_value("17", json!({"_id": {"$oid": "65a1f0"}})).unwrap();
        assert_eq!(doc.id, "65a1f0");
    }

    #[test]
    fn test_id_falls_back_to_row_id() {
        let doc = SourceDocument::from_value("17", json!({"name": "Acme"})).unwrap();
        assert_eq!(doc.id, "17");
    }

    #[test]
    fn test_non_object_document_is_malformed() {
        let err = SourceDocument::from_value("3", json!([1, 2])).unwrap_err();
        assert!(matches!(err, SourceError::Malformed { .. }));
    }

    #[test]
    fn test_query_without_filter_matches_everything() {
        let query = DocumentQuery::collection("profiles");
        let doc = SourceDocument::from_value("1", json!({})).unwrap();
        assert!(query.matches(&doc));
    }

    #[test]
    fn test_non_empty_filter() {
        let query = DocumentQuery::collection("profiles").non_empty("experiences");
        let with = SourceDocument::from_value("1", json!({"experiences": [{}]})).unwrap();
        let empty = SourceDocument::from_value("2", json!({"experiences": []})).unwrap();
        let scalar = SourceDocument::from_value("3", json!({"experiences": "none"})).unwrap();
        assert!(query.matches(&with));
        assert!(!query.matches(&empty));
        assert!(!query.matches(&scalar));
    }

    #[test]
    fn test_projection_keeps_listed_fields() {
        let query = DocumentQuery::collection("profiles").project(["full_name"]);
        let doc = SourceDocument::from_value("1", json!({"full_name": "Ada", "city": "London"}))
            .unwrap();
        let shaped = query.shape(doc);
        assert_eq!(shaped.body.len(), 1);
        assert!(shaped.get("full_name").is_some());
    }
}
