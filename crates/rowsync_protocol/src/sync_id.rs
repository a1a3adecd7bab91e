//! Ordered row identifiers and the table identifier registry.
//!
//! A [`SyncId`] is an opaque byte sequence, ordered byte-lexicographically,
//! naming one logical row. Ids are derived deterministically from a table
//! name and the row's primary-key values, so both replicas compute the same
//! id for the same row without coordination.
//!
//! The derived ids of all registered tables partition the identifier space:
//! every id of a table sorts strictly after the table's synthetic lower
//! bound and strictly before the next table's, which is what allows the
//! range builder to cover `[zero, infinity)` table by table.

use crate::entity::FieldValue;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Maximum number of tables a registry can hold.
///
/// One ordinal byte is reserved per table, and the top byte value is kept
/// free so every table id sorts strictly below the infinity sentinel.
pub const MAX_TABLES: usize = 254;

/// Default canonical length for variable-length identifier formats.
pub const DEFAULT_ID_LENGTH: usize = 512;

/// An opaque, totally ordered identifier for one logical row.
///
/// Ordering is byte-lexicographic. `SyncId` makes no assumption about its
/// contents; the [`IdRegistry`] is the only producer of real row ids.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SyncId(Vec<u8>);

impl SyncId {
    /// Creates an id from raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the byte length of the id.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the id has no bytes (the variable-format zero).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Renders the id as a lowercase hex string.
    ///
    /// This is the permanent-id form stored in entity metadata.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(self.0.len() * 2);
        for byte in &self.0 {
            out.push(char::from_digit(u32::from(byte >> 4), 16).unwrap_or('0'));
            out.push(char::from_digit(u32::from(byte & 0x0F), 16).unwrap_or('0'));
        }
        out
    }
}

impl fmt::Debug for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyncId({})", self.to_hex())
    }
}

/// Per-table identifier format.
///
/// A format fixes the representable id space for one table: its `zero`
/// sentinel (smallest possible value), its `infinity` sentinel (larger than
/// any real id), and the increment rule between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdFormat {
    /// Every id is exactly `length` bytes.
    Fixed {
        /// Exact id length in bytes.
        length: usize,
    },
    /// Ids are at most `length` bytes; shorter ids are valid.
    Variable {
        /// Canonical (maximum) id length in bytes.
        length: usize,
    },
}

impl IdFormat {
    /// The smallest value representable in this format.
    pub fn zero(&self) -> SyncId {
        match self {
            IdFormat::Fixed { length } => SyncId(vec![0x00; *length]),
            IdFormat::Variable { .. } => SyncId(Vec::new()),
        }
    }

    /// A sentinel strictly larger than every real id in this format.
    ///
    /// Fixed formats reserve the all-`0xFF` value; variable formats use a
    /// value one byte longer than the canonical length, which sorts after
    /// every representable id.
    pub fn infinity(&self) -> SyncId {
        match self {
            IdFormat::Fixed { length } => SyncId(vec![0xFF; *length]),
            IdFormat::Variable { length } => SyncId(vec![0xFF; *length + 1]),
        }
    }

    /// Returns the smallest id strictly greater than `id`.
    ///
    /// Fixed-length: byte-array increment with carry, `0xFF → 0x00`
    /// leftward. Variable-length: an id shorter than the canonical length
    /// gains a trailing zero byte; an id at the canonical length has its
    /// last byte incremented, dropping trailing `0xFF` bytes that would
    /// carry to zero. Range slicing depends on this being the unique
    /// successor, so the rule is reproduced exactly.
    pub fn increment(&self, id: &SyncId) -> ProtocolResult<SyncId> {
        match self {
            IdFormat::Fixed { .. } => {
                let mut bytes = id.0.clone();
                for byte in bytes.iter_mut().rev() {
                    if *byte == 0xFF {
                        *byte = 0x00;
                    } else {
                        *byte += 1;
                        return Ok(SyncId(bytes));
                    }
                }
                Err(ProtocolError::IdOverflow)
            }
            IdFormat::Variable { length } => {
                let mut bytes = id.0.clone();
                if bytes.len() < *length {
                    bytes.push(0x00);
                    return Ok(SyncId(bytes));
                }
                while bytes.last() == Some(&0xFF) {
                    bytes.pop();
                }
                match bytes.last_mut() {
                    Some(byte) => {
                        *byte += 1;
                        Ok(SyncId(bytes))
                    }
                    None => Err(ProtocolError::IdOverflow),
                }
            }
        }
    }
}

/// Precomputed identifier bounds for one registered table.
#[derive(Debug, Clone)]
pub struct TableBounds {
    name: String,
    format: IdFormat,
    lower: SyncId,
    start: SyncId,
    upper: SyncId,
}

impl TableBounds {
    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier format for this table.
    pub fn format(&self) -> &IdFormat {
        &self.format
    }

    /// Synthetic lower bound: the id of a row in this table with zero
    /// primary-key columns. Strictly below every real id of the table.
    pub fn lower(&self) -> &SyncId {
        &self.lower
    }

    /// First id of the table's range (`zero` for the first table,
    /// otherwise the successor of the lower bound).
    pub fn start(&self) -> &SyncId {
        &self.start
    }

    /// Last id of the table's range, inclusive: the next table's lower
    /// bound, or the infinity sentinel for the final table.
    pub fn upper(&self) -> &SyncId {
        &self.upper
    }

    /// Returns true if `id` lies strictly inside this table's bounds.
    pub fn contains_strictly(&self, id: &SyncId) -> bool {
        *id > self.lower && *id < self.upper
    }
}

/// Registry mapping table names to ordinals, formats and bounds.
///
/// The registry is resolved once at configuration time: registration order
/// is the apply order, and every id derivation and range computation after
/// that point goes through the resolved table set.
#[derive(Debug)]
pub struct IdRegistry {
    tables: Vec<TableBounds>,
    index: HashMap<String, usize>,
    format: IdFormat,
}

impl IdRegistry {
    /// Builds a registry over `tables` in apply order with the default
    /// variable-length format.
    pub fn new<I, S>(tables: I) -> ProtocolResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_format(
            tables,
            IdFormat::Variable {
                length: DEFAULT_ID_LENGTH,
            },
        )
    }

    /// Builds a registry with an explicit variable-length format.
    pub fn with_format<I, S>(tables: I, format: IdFormat) -> ProtocolResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = tables.into_iter().map(Into::into).collect();
        if names.len() > MAX_TABLES {
            return Err(ProtocolError::TooManyTables(names.len()));
        }

        let mut index = HashMap::new();
        let mut tables = Vec::with_capacity(names.len());
        let count = names.len();

        for (ordinal, name) in names.into_iter().enumerate() {
            if index.insert(name.clone(), ordinal).is_some() {
                return Err(ProtocolError::InvalidEntity(format!(
                    "table {name} registered twice"
                )));
            }

            let lower = SyncId(vec![ordinal as u8]);
            // The first table's range begins at zero so the partition has
            // no gap below the first lower bound.
            let start = if ordinal == 0 {
                format.zero()
            } else {
                format.increment(&lower)?
            };
            let upper = if ordinal + 1 == count {
                format.infinity()
            } else {
                SyncId(vec![(ordinal + 1) as u8])
            };

            tables.push(TableBounds {
                name,
                format: format.clone(),
                lower,
                start,
                upper,
            });
        }

        Ok(Self {
            tables,
            index,
            format,
        })
    }

    /// Number of registered tables.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Tables in apply order.
    pub fn tables(&self) -> impl Iterator<Item = &TableBounds> {
        self.tables.iter()
    }

    /// Bounds for a table by name.
    pub fn bounds(&self, table: &str) -> ProtocolResult<&TableBounds> {
        self.index
            .get(table)
            .map(|&i| &self.tables[i])
            .ok_or_else(|| ProtocolError::UnknownTable(table.to_string()))
    }

    /// Bounds for a table by apply-order ordinal.
    pub fn bounds_at(&self, ordinal: usize) -> Option<&TableBounds> {
        self.tables.get(ordinal)
    }

    /// Apply-order ordinal for a table name.
    pub fn ordinal(&self, table: &str) -> ProtocolResult<usize> {
        self.index
            .get(table)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownTable(table.to_string()))
    }

    /// The zero sentinel of the whole identifier space.
    pub fn zero(&self) -> SyncId {
        self.format.zero()
    }

    /// The infinity sentinel of the whole identifier space.
    pub fn infinity(&self) -> SyncId {
        self.format.infinity()
    }

    /// Derives the id for a row from its table name and primary-key tuple.
    ///
    /// The id is the table's apply-order ordinal byte followed by an
    /// injective encoding of the key values, so two rows produce equal ids
    /// exactly when they are the same logical row.
    pub fn row_id(&self, table: &str, key: &[FieldValue]) -> ProtocolResult<SyncId> {
        let ordinal = self.ordinal(table)?;
        if key.is_empty() {
            return Err(ProtocolError::EmptyKey {
                table: table.to_string(),
            });
        }

        let mut bytes = vec![ordinal as u8];
        for value in key {
            // The encoding's length prefix is a u16; a longer payload would
            // wrap the prefix and alias a different key tuple.
            let size = match value {
                FieldValue::Text(s) => s.len(),
                FieldValue::Bytes(b) => b.len(),
                _ => 0,
            };
            if size > usize::from(u16::MAX) {
                return Err(ProtocolError::KeyValueTooLong {
                    table: table.to_string(),
                    size,
                });
            }
            encode_key_value(value, &mut bytes);
        }

        let max = match self.format {
            IdFormat::Fixed { length } | IdFormat::Variable { length } => length,
        };
        if bytes.len() > max {
            return Err(ProtocolError::KeyTooLong {
                table: table.to_string(),
                length: bytes.len(),
                max,
            });
        }

        Ok(SyncId(bytes))
    }

    /// Derives the permanent id string for a row, as stored in entity
    /// metadata after an accepted insert.
    pub fn permanent_id(&self, table: &str, key: &[FieldValue]) -> ProtocolResult<String> {
        Ok(self.row_id(table, key)?.to_hex())
    }
}

/// Appends an injective, deterministic encoding of one key value.
///
/// Each value is a tag byte plus a payload; variable-length payloads carry
/// a big-endian `u16` length prefix, so the caller must reject text and
/// byte values longer than `u16::MAX`. Tag bytes start at `0x01` so every
/// real id sorts strictly above the table's synthetic lower bound and the
/// dummy batch boundary below it.
fn encode_key_value(value: &FieldValue, out: &mut Vec<u8>) {
    match value {
        FieldValue::Null => out.push(0x01),
        FieldValue::Bool(b) => {
            out.push(0x02);
            out.push(u8::from(*b));
        }
        FieldValue::I64(n) => {
            out.push(0x03);
            // Offset so the byte encoding orders like the integers.
            out.extend_from_slice(&(*n as u64 ^ (1 << 63)).to_be_bytes());
        }
        FieldValue::F64(x) => {
            out.push(0x04);
            out.extend_from_slice(&x.to_bits().to_be_bytes());
        }
        FieldValue::Text(s) => {
            out.push(0x05);
            out.extend_from_slice(&(s.len() as u16).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        FieldValue::Bytes(b) => {
            out.push(0x06);
            out.extend_from_slice(&(b.len() as u16).to_be_bytes());
            out.extend_from_slice(b);
        }
    }
}
