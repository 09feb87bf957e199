//! Typed access to loosely shaped document fields.
//!
//! Absent, null and wrongly typed values all come back as `None`; the only
//! extraction that reports an error is a date whose parts are all present but
//! do not form a calendar day.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::value::normalize_text;

pub type Fields = Map<String, Value>;

/// Trimmed text. Numbers are rendered, blanks are absent.
pub fn text(obj: &Fields, field: &str) -> Option<String> {
    value_text(obj.get(field)?)
}

pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => normalize_text(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integer value. Floats are rounded and numeric strings parsed.
pub fn int(obj: &Fields, field: &str) -> Option<i64> {
    value_int(obj.get(field)?)
}

pub fn value_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.round() as i64))
        }
        _ => None,
    }
}

pub fn float(obj: &Fields, field: &str) -> Option<f64> {
    match obj.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// True when the field holds anything other than null, blank text or an
/// empty list. Used for "has a picture / website" flags.
pub fn present(obj: &Fields, field: &str) -> bool {
    match obj.get(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}

pub fn object<'a>(obj: &'a Fields, field: &str) -> Option<&'a Fields> {
    obj.get(field)?.as_object()
}

/// Elements of a list field; empty when absent or not a list.
pub fn list<'a>(obj: &'a Fields, field: &str) -> &'a [Value] {
    match obj.get(field) {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

fn date_part(obj: &Fields, part: &str) -> Result<Option<i64>, String> {
    match obj.get(part) {
        None | Some(Value::Null) => Ok(None),
        // Exports sometimes write whole numbers as 2020.0.
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| format!("{part} is not an integer: {n}")),
        Some(other) => Err(format!("{part} is not an integer: {other}")),
    }
}

/// Calendar date from a `{year, month, day}` mapping.
///
/// All three parts present → the date; any part missing → `None`, never a
/// partial date. Parts that are present but wrongly typed or out of range
/// are an error so the caller can report them.
pub fn assemble_date(value: Option<&Value>) -> Result<Option<NaiveDate>, String> {
    let obj = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Object(obj)) => obj,
        Some(other) => return Err(format!("expected a year/month/day mapping, got {other}")),
    };

    let (year, month, day) = (
        date_part(obj, "year")?,
        date_part(obj, "month")?,
        date_part(obj, "day")?,
    );
    let (Some(year), Some(month), Some(day)) = (year, month, day) else {
        return Ok(None);
    };

    let date = i32::try_from(year).ok().and_then(|y| {
        NaiveDate::from_ymd_opt(y, u32::try_from(month).ok()?, u32::try_from(day).ok()?)
    });
    date.map(Some)
        .ok_or_else(|| format!("{year}-{month}-{day} is not a calendar date"))
}

/// "{degree} in {field}"; either alone when the other is missing.
pub fn degree_in_field(degree: Option<String>, field: Option<String>) -> Option<String> {
    match (degree, field) {
        (Some(d), Some(f)) => Some(format!("{d} in {f}")),
        (d, f) => d.or(f),
    }
}

/// Joins the present parts with " | ".
pub fn join_present(parts: &[Option<String>]) -> Option<String> {
    let present: Vec<&str> = parts.iter().flatten().map(String::as_str).collect();
    if present.is_empty() {
        None
    } else {
        Some(present.join(" | "))
    }
}

/// "A: a | B: b" when both are present, the bare value when only one is.
pub fn labelled_pair(first: (&str, Option<String>), second: (&str, Option<String>)) -> Option<String> {
    match (first, second) {
        ((la, Some(a)), (lb, Some(b))) => Some(format!("{la}: {a} | {lb}: {b}")),
        ((_, a), (_, b)) => a.or(b),
    }
}
