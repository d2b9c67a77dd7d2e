//! Data models for reelsync
//!
//! Defines the record shape exchanged between devices. A record only needs
//! an `id` and a `timestamp`; the domain fields of a cutting record (wire id,
//! cut length, cutter name, ...) travel along untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata key the shared graph attaches to every node
pub const NODE_META_KEY: &str = "_";

/// A record exchanged through the shared graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRecord {
    /// Unique identifier
    pub id: String,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Domain fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SyncRecord {
    /// Create a record with the given id and timestamp
    pub fn new(id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            fields: Map::new(),
        }
    }

    /// Builder-style domain field setter
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Build a record from a JSON value
    ///
    /// The value must be an object with a non-zero numeric `timestamp`. When
    /// it has no usable `id`, `fallback_id` (usually the graph key it was
    /// stored under) is used instead. Returns `None` for anything else.
    pub fn from_value(value: &Value, fallback_id: Option<&str>) -> Option<Self> {
        let object = value.as_object()?;
        let timestamp = object
            .get("timestamp")
            .and_then(as_millis)
            .filter(|&ms| ms != 0)?;

        let id = match object.get("id") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => fallback_id.filter(|k| !k.is_empty())?.to_string(),
        };

        let fields = object
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "id" | "timestamp" | NODE_META_KEY))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Some(Self {
            id,
            timestamp,
            fields,
        })
    }

    /// Convert to a JSON object value
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert("id".to_string(), Value::String(self.id.clone()));
        object.insert("timestamp".to_string(), Value::from(self.timestamp));
        Value::Object(object)
    }

    /// Time of the last modification: `updatedAt` if present, else `timestamp`
    pub fn updated_at(&self) -> i64 {
        self.fields
            .get("updatedAt")
            .and_then(as_millis)
            .unwrap_or(self.timestamp)
    }
}

/// Read a millisecond timestamp stored either as integer or float
fn as_millis(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
}

/// Extract records from the entries of a graph node
///
/// Skips the node metadata key and any entry that is not a record.
pub fn records_from_node(node: &Map<String, Value>) -> Vec<SyncRecord> {
    node.iter()
        .filter(|(key, _)| key.as_str() != NODE_META_KEY)
        .filter_map(|(key, value)| SyncRecord::from_value(value, Some(key)))
        .collect()
}

/// Remove records with a repeated id, keeping the first occurrence
pub fn dedup_by_id(records: Vec<SyncRecord>) -> Vec<SyncRecord> {
    let mut seen = std::collections::HashSet::new();
    records
        .into_iter()
        .filter(|record| seen.insert(record.id.clone()))
        .collect()
}

/// Outcome of merging remote records into the local store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Records inserted or replaced locally
    pub merged: usize,
    /// Records ignored because the local copy was as new or newer
    pub skipped: usize,
}
