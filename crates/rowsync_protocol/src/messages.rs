//! Change-set messages exchanged between the replicas.

use crate::entity::Entity;
use serde::{Deserialize, Serialize};

/// Policy for resolving a row modified on both sides since last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConflictResolutionPolicy {
    /// The server-side version wins.
    #[default]
    ServerWins,
    /// The client-side version wins.
    ClientWins,
}

/// An ordered batch of changed entities plus its continuation token.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Entities in apply order.
    pub data: Vec<Entity>,
    /// Opaque continuation token owned by the server.
    pub server_blob: Vec<u8>,
    /// True if this is the final batch of the exchange.
    pub is_last_batch: bool,
}

impl ChangeSet {
    /// Creates a change set.
    pub fn new(data: Vec<Entity>, server_blob: Vec<u8>, is_last_batch: bool) -> Self {
        Self {
            data,
            server_blob,
            is_last_batch,
        }
    }

    /// An empty, terminal change set.
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            server_blob: Vec::new(),
            is_last_batch: true,
        }
    }

    /// Returns true if the set carries no entities.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Outcome of one conflicting or failed row in an upload.
///
/// `live` is always the authoritative server-side value after resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncConflict {
    /// Both sides modified the row; resolved by policy.
    Conflict {
        /// Authoritative value after resolution.
        live: Entity,
        /// The version that lost the resolution.
        losing: Entity,
        /// Policy that decided the outcome.
        resolution: ConflictResolutionPolicy,
    },
    /// The row failed to apply (broken invariant, rejected insert, or a
    /// rejection before the row reached storage).
    Error {
        /// Authoritative server-side value: the current row, or a
        /// synthesized tombstone when the row does not exist.
        live: Entity,
        /// The client entity that failed.
        error_entity: Entity,
        /// Human-readable failure description.
        description: String,
    },
}

impl SyncConflict {
    /// Returns true for the `Conflict` variant.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncConflict::Conflict { .. })
    }

    /// Returns true for the `Error` variant.
    pub fn is_error(&self) -> bool {
        matches!(self, SyncConflict::Error { .. })
    }

    /// The authoritative server-side entity.
    pub fn live(&self) -> &Entity {
        match self {
            SyncConflict::Conflict { live, .. } => live,
            SyncConflict::Error { live, .. } => live,
        }
    }
}

/// Server response to an uploaded change set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChangeSetResponse {
    /// Opaque continuation token after the upload was applied.
    pub server_blob: Vec<u8>,
    /// Conflicts first, then errors, in upload order within each group.
    pub conflicts: Vec<SyncConflict>,
    /// Applied entities; accepted inserts carry their fresh permanent id
    /// and their original temp id.
    pub updated_items: Vec<Entity>,
    /// Hard error that aborted the exchange, if any.
    pub error: Option<String>,
}

impl ChangeSetResponse {
    /// Returns true if the response reports a hard error.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Number of `Conflict` entries.
    pub fn conflict_count(&self) -> usize {
        self.conflicts.iter().filter(|c| c.is_conflict()).count()
    }

    /// Number of `Error` entries.
    pub fn error_count(&self) -> usize {
        self.conflicts.iter().filter(|c| c.is_error()).count()
    }
}
