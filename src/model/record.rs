//! Raw upload rows and dedup-key normalization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Identified;

/// An untyped row produced by file parsing, not yet validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Row position in the source file. Used for duplicate reporting.
    pub origin_index: usize,
    pub fields: Map<String, Value>,
}

impl RawRecord {
    pub fn new(origin_index: usize, fields: Map<String, Value>) -> Self {
        Self {
            origin_index,
            fields,
        }
    }

    /// Build records from parsed rows, numbering them in order.
    pub fn from_rows(rows: impl IntoIterator<Item = Map<String, Value>>) -> Vec<Self> {
        rows.into_iter()
            .enumerate()
            .map(|(i, fields)| Self::new(i, fields))
            .collect()
    }

    /// The normalized value of `field`, or `None` if missing or blank.
    pub fn key(&self, field: &str) -> Option<String> {
        self.fields.get(field).and_then(normalize_key)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

impl Identified for RawRecord {
    type Id = usize;

    fn id(&self) -> usize {
        self.origin_index
    }
}

/// Trim a key value. Numbers keep their decimal text; null, booleans and
/// containers never qualify as keys.
pub fn normalize_key(value: &Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if raw.is_empty() { None } else { Some(raw) }
}
