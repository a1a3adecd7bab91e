//! # Rowsync Protocol
//!
//! Identifier, knowledge and batching model for rowsync.
//!
//! This crate provides:
//! - [`SyncId`] ordered row identifiers and the [`IdRegistry`] deriving
//!   them from table name + primary key
//! - [`SyncKnowledge`], the combinable, sliceable summary of changes a
//!   replica has already seen
//! - [`RangeSetBuilder`] / [`BatchRangeSet`] for carving the identifier
//!   space into per-batch ranges
//! - [`RowSorter`] for turning an unordered set of changed rows into
//!   ordered, size-bounded batches
//! - Change-set messages and conflict types
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Key Invariants
//!
//! - `increment(x)` is the unique representable successor of `x`
//! - Per-table ranges partition `[zero, infinity)` with no gap or overlap
//! - Batch N's maximum id per table is below batch N+1's minimum, with no
//!   id skipped or duplicated across a run
//! - Combining every batch's knowledge slice equals slicing the full range

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod knowledge;
mod messages;
mod range;
mod sorter;
mod sync_id;

pub use entity::{Entity, FieldValue, ServiceMetadata};
pub use error::{ProtocolError, ProtocolResult};
pub use knowledge::SyncKnowledge;
pub use messages::{ChangeSet, ChangeSetResponse, ConflictResolutionPolicy, SyncConflict};
pub use range::{BatchRange, BatchRangeSet, RangeSetBuilder};
pub use sorter::{RowSorter, SortedBatch, SortedBatches};
pub use sync_id::{IdFormat, IdRegistry, SyncId, TableBounds, DEFAULT_ID_LENGTH, MAX_TABLES};
