//! Data types for the statestore crate

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Kind of write applied to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOp {
    /// Insert the record or replace the data stored under the same key
    Upsert,
    /// Remove the record stored under the key
    Delete,
}

/// Composite natural key of a record (field name → value)
///
/// Fields are kept sorted so the encoded form is canonical: two keys with
/// the same fields always address the same row.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey(BTreeMap<String, String>);

impl RecordKey {
    /// Create an empty key (used by singleton categories)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key field
    pub fn with(mut self, field: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(field.into(), value.to_string());
        self
    }

    /// Look up a key field
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Canonical text form stored in the key column
    pub fn encode(&self) -> String {
        // BTreeMap serialization cannot fail
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Parse the canonical text form
    pub fn decode(text: &str) -> crate::Result<Self> {
        Ok(Self(serde_json::from_str(text)?))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(","))
    }
}

/// A record as read back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Natural key
    pub key: RecordKey,
    /// Record fields
    pub data: Value,
}

/// One write in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Device the record belongs to
    pub device: String,
    /// Record category (e.g. "vlan_if")
    pub category: String,
    /// Upsert or delete
    pub op: WriteOp,
    /// Natural key
    pub key: RecordKey,
    /// Record fields, required for upserts
    pub data: Option<Value>,
}

impl WriteRequest {
    /// Build an upsert
    pub fn upsert(
        device: impl Into<String>,
        category: impl Into<String>,
        key: RecordKey,
        data: Value,
    ) -> Self {
        Self {
            device: device.into(),
            category: category.into(),
            op: WriteOp::Upsert,
            key,
            data: Some(data),
        }
    }

    /// Build a delete
    pub fn delete(device: impl Into<String>, category: impl Into<String>, key: RecordKey) -> Self {
        Self {
            device: device.into(),
            category: category.into(),
            op: WriteOp::Delete,
            key,
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_encoding_is_order_independent() {
        let a = RecordKey::new().with("if_name", "swp1").with("vlan_id", 100);
        let b = RecordKey::new().with("vlan_id", 100).with("if_name", "swp1");
        assert_eq!(a.encode(), b.encode());
        assert_eq!(RecordKey::decode(&a.encode()).unwrap(), b);
    }

    #[test]
    fn test_key_display() {
        let key = RecordKey::new().with("prefix", "10.0.0.0/24").with("if_name", "swp1");
        assert_eq!(key.to_string(), "if_name=swp1,prefix=10.0.0.0/24");
    }
}
