//! Entities: user rows plus the service metadata that travels with them.

use serde::{Deserialize, Serialize};

/// A primary-key or column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Estimated in-memory byte size, used for batch size accounting.
    ///
    /// Text and bytes count their raw byte length, fixed-width types their
    /// width, and null costs one unit.
    pub fn size_estimate(&self) -> usize {
        match self {
            FieldValue::Null => 1,
            FieldValue::Bool(_) => 1,
            FieldValue::I64(_) => 8,
            FieldValue::F64(_) => 8,
            FieldValue::Text(s) => s.len(),
            FieldValue::Bytes(b) => b.len(),
        }
    }
}

/// Service metadata carried by every entity on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServiceMetadata {
    /// Permanent identifier; empty until the server assigns one.
    pub id: String,
    /// Client-assigned placeholder id for a not-yet-inserted row.
    pub temp_id: Option<String>,
    /// Entity tag for optimistic concurrency.
    pub etag: String,
    /// True if this entity marks a deleted row.
    pub is_tombstone: bool,
    /// Edit URI of the row on the server, when known.
    pub edit_uri: String,
}

/// One user data row together with its service metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Table the row belongs to.
    pub table: String,
    /// Primary-key tuple, in declaration order.
    pub key: Vec<FieldValue>,
    /// Non-key columns, in declaration order.
    pub fields: Vec<(String, FieldValue)>,
    /// Service metadata.
    pub metadata: ServiceMetadata,
}

impl Entity {
    /// Creates an entity with no non-key fields and default metadata.
    pub fn new(table: impl Into<String>, key: Vec<FieldValue>) -> Self {
        Self {
            table: table.into(),
            key,
            fields: Vec::new(),
            metadata: ServiceMetadata::default(),
        }
    }

    /// Adds a non-key field (builder style).
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    /// Sets the client temp id (builder style).
    pub fn with_temp_id(mut self, temp_id: impl Into<String>) -> Self {
        self.metadata.temp_id = Some(temp_id.into());
        self
    }

    /// Sets the permanent id (builder style).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.metadata.id = id.into();
        self
    }

    /// Synthesizes a tombstone carrying only the primary-key columns.
    pub fn tombstone(table: impl Into<String>, key: Vec<FieldValue>) -> Self {
        let mut entity = Self::new(table, key);
        entity.metadata.is_tombstone = true;
        entity
    }

    /// Returns true if the server has assigned a permanent id.
    pub fn has_permanent_id(&self) -> bool {
        !self.metadata.id.is_empty()
    }

    /// Returns true if this entity is a candidate for insertion: it has no
    /// permanent id yet.
    pub fn is_insert_candidate(&self) -> bool {
        self.metadata.id.is_empty()
    }

    /// Checks the upload invariant: an uploaded entity carries a permanent
    /// id or a temp id, never neither.
    pub fn is_valid_for_upload(&self) -> bool {
        self.has_permanent_id() || self.metadata.temp_id.is_some()
    }

    /// Estimated byte size of the row, for batch size accounting.
    pub fn size_estimate(&self) -> usize {
        let key: usize = self.key.iter().map(FieldValue::size_estimate).sum();
        let fields: usize = self
            .fields
            .iter()
            .map(|(_, v)| v.size_estimate())
            .sum();
        key + fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_estimate_counts_raw_bytes() {
        let entity = Entity::new("t", vec![FieldValue::I64(1)])
            .with_field("name", FieldValue::Text("abcde".into()))
            .with_field("flag", FieldValue::Bool(true))
            .with_field("blob", FieldValue::Bytes(vec![0; 10]))
            .with_field("gap", FieldValue::Null);
        // 8 (key) + 5 + 1 + 10 + 1
        assert_eq!(entity.size_estimate(), 25);
    }

    #[test]
    fn tombstone_has_key_only() {
        let t = Entity::tombstone("t", vec![FieldValue::I64(9)]);
        assert!(t.metadata.is_tombstone);
        assert!(t.fields.is_empty());
        assert_eq!(t.key, vec![FieldValue::I64(9)]);
    }

    #[test]
    fn upload_invariant() {
        let neither = Entity::new("t", vec![FieldValue::I64(1)]);
        assert!(!neither.is_valid_for_upload());
        assert!(neither.is_insert_candidate());

        let temp = Entity::new("t", vec![FieldValue::I64(1)]).with_temp_id("tmp-1");
        assert!(temp.is_valid_for_upload());
        assert!(temp.is_insert_candidate());

        let permanent = Entity::new("t", vec![FieldValue::I64(1)]).with_id("0301");
        assert!(permanent.is_valid_for_upload());
        assert!(!permanent.is_insert_candidate());
    }
}
