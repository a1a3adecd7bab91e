//! Error types for the protocol core.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised by the identifier, range and batching core.
///
/// Everything in this enum is an internal-consistency or input-validity
/// failure: none of these are retryable, and callers must never swallow
/// them silently.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A table name was used that is not registered.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// More tables were registered than the identifier space can hold.
    #[error("too many tables: {0} (maximum {max})", max = crate::sync_id::MAX_TABLES)]
    TooManyTables(usize),

    /// A row was submitted with an empty primary-key tuple.
    #[error("row in table {table} has no primary-key columns")]
    EmptyKey {
        /// Table the row belongs to.
        table: String,
    },

    /// A single primary-key value is too large for the key encoding.
    #[error("key value in table {table} is {size} bytes, maximum is 65535")]
    KeyValueTooLong {
        /// Table the row belongs to.
        table: String,
        /// Size of the offending value in bytes.
        size: usize,
    },

    /// A derived identifier exceeded the format's canonical length.
    #[error("identifier for table {table} is {length} bytes, format allows {max}")]
    KeyTooLong {
        /// Table the row belongs to.
        table: String,
        /// Derived identifier length in bytes.
        length: usize,
        /// Canonical length of the format.
        max: usize,
    },

    /// No identifier exists above the given one in its format.
    #[error("identifier overflow: no successor exists in this format")]
    IdOverflow,

    /// An identifier was recorded against the wrong table's range.
    #[error("range mismatch: id recorded for table {actual} while range for {expected} is open")]
    RangeMismatch {
        /// Table of the currently open range.
        expected: String,
        /// Table the caller tried to record an id for.
        actual: String,
    },

    /// A table was opened out of apply order.
    #[error("table {to} opened while {from} was current; tables must advance in apply order")]
    TableOutOfOrder {
        /// Table of the currently open range.
        from: String,
        /// Table the caller tried to open.
        to: String,
    },

    /// An identifier fell outside the open range's legal bounds.
    #[error("id out of range for table {table}: not strictly inside the table bounds and above the current end")]
    IdOutOfRange {
        /// Table of the currently open range.
        table: String,
    },

    /// A range operation was attempted with no range set in progress.
    #[error("no range set in progress")]
    NotStarted,

    /// A new range set was started while one was already in progress.
    #[error("a range set is already in progress")]
    AlreadyStarted,

    /// A continuation was requested from a terminal range set.
    #[error("cannot continue: the previous range set closed the identifier space")]
    SpaceClosed,

    /// An unusable range appeared anywhere but the trailing position.
    #[error("unusable range for table {table} is not the trailing entry")]
    UnusableRange {
        /// Table of the offending range.
        table: String,
    },

    /// A range set was finished without a single usable range.
    #[error("range set contains no usable range")]
    EmptyRangeSet,

    /// A single row is larger than the configured maximum batch size.
    #[error("row in table {table} is {size} bytes, exceeding the {limit} byte batch limit")]
    RowTooLarge {
        /// Table the row belongs to.
        table: String,
        /// Estimated row size in bytes.
        size: usize,
        /// Configured maximum batch size in bytes.
        limit: usize,
    },

    /// An entity violated a structural invariant.
    #[error("invalid entity: {0}")]
    InvalidEntity(String),
}
