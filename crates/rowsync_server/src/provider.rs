//! Change provider contract: the server-side storage boundary.

use crate::error::ServerResult;
use parking_lot::Mutex;
use rowsync_protocol::{Entity, FieldValue, IdRegistry, SyncId};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-row result of applying one uploaded entity.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The row was applied.
    Applied,
    /// Both sides modified the row since last sync.
    Conflict {
        /// The server's current version of the row.
        server_version: Entity,
    },
    /// The row failed to apply.
    Error {
        /// Failure description.
        description: String,
        /// The server's current version, when the row exists.
        server_version: Option<Entity>,
    },
    /// The provider refused to insert the row.
    RejectedInsert {
        /// Rejection reason.
        reason: String,
    },
}

/// One uploaded entity paired with what the provider did with it.
#[derive(Debug, Clone, PartialEq)]
pub struct RowOutcome {
    /// The entity as the client uploaded it.
    pub entity: Entity,
    /// What happened to it.
    pub outcome: ApplyOutcome,
}

/// Result of applying one uploaded change set.
///
/// Per-row failures never abort the batch; every uploaded entity gets
/// exactly one outcome, in upload order.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    /// Continuation token after the batch was applied.
    pub server_blob: Vec<u8>,
    /// One outcome per uploaded entity, in upload order.
    pub outcomes: Vec<RowOutcome>,
}

/// The storage boundary the server workflows run against.
///
/// Transient retry and backoff are the provider's own concern; callers
/// only see success or a final error.
pub trait ChangeProvider: Send + Sync {
    /// Returns all rows changed since the client's acknowledged state.
    fn get_changes(&self) -> ServerResult<Vec<Entity>>;

    /// Applies an uploaded batch and reports one outcome per row.
    fn apply_changes(&self, server_blob: &[u8], entities: &[Entity]) -> ServerResult<ApplyReport>;

    /// Fetches the current server-side row for a primary key.
    fn fetch_row(&self, table: &str, key: &[FieldValue]) -> ServerResult<Option<Entity>>;
}

/// An in-memory change provider for tests.
///
/// Rows live in per-table maps keyed by derived row id. Conflicts,
/// errors and insert rejections are scripted per primary key.
pub struct MemoryChangeProvider {
    registry: Arc<IdRegistry>,
    inner: Mutex<ProviderState>,
}

#[derive(Default)]
struct ProviderState {
    rows: BTreeMap<SyncId, Entity>,
    conflicts: BTreeMap<SyncId, Entity>,
    errors: BTreeMap<SyncId, String>,
    rejects: BTreeMap<SyncId, String>,
    apply_count: u64,
}

impl MemoryChangeProvider {
    /// Creates an empty provider over the registry's table set.
    pub fn new(registry: Arc<IdRegistry>) -> Self {
        Self {
            registry,
            inner: Mutex::new(ProviderState::default()),
        }
    }

    fn row_id(&self, table: &str, key: &[FieldValue]) -> ServerResult<SyncId> {
        Ok(self.registry.row_id(table, key)?)
    }

    /// Seeds a server-side row.
    pub fn insert_row(&self, entity: Entity) -> ServerResult<()> {
        let id = self.row_id(&entity.table, &entity.key)?;
        self.inner.lock().rows.insert(id, entity);
        Ok(())
    }

    /// Scripts a conflict for the given key; `server_version` is the
    /// row the server currently holds.
    pub fn script_conflict(&self, server_version: Entity) -> ServerResult<()> {
        let id = self.row_id(&server_version.table, &server_version.key)?;
        let mut state = self.inner.lock();
        state.rows.insert(id.clone(), server_version.clone());
        state.conflicts.insert(id, server_version);
        Ok(())
    }

    /// Scripts an apply error for the given key.
    pub fn script_error(
        &self,
        table: &str,
        key: &[FieldValue],
        description: impl Into<String>,
    ) -> ServerResult<()> {
        let id = self.row_id(table, key)?;
        self.inner.lock().errors.insert(id, description.into());
        Ok(())
    }

    /// Scripts an insert rejection for the given key.
    pub fn script_reject(
        &self,
        table: &str,
        key: &[FieldValue],
        reason: impl Into<String>,
    ) -> ServerResult<()> {
        let id = self.row_id(table, key)?;
        self.inner.lock().rejects.insert(id, reason.into());
        Ok(())
    }

    /// Number of `apply_changes` calls observed.
    pub fn apply_count(&self) -> u64 {
        self.inner.lock().apply_count
    }

    /// Number of rows currently stored.
    pub fn row_count(&self) -> usize {
        self.inner.lock().rows.len()
    }
}

impl ChangeProvider for MemoryChangeProvider {
    fn get_changes(&self) -> ServerResult<Vec<Entity>> {
        Ok(self.inner.lock().rows.values().cloned().collect())
    }

    fn apply_changes(&self, _server_blob: &[u8], entities: &[Entity]) -> ServerResult<ApplyReport> {
        let mut state = self.inner.lock();
        state.apply_count += 1;
        let blob = state.apply_count.to_be_bytes().to_vec();

        let mut outcomes = Vec::with_capacity(entities.len());
        for entity in entities {
            let id = self.registry.row_id(&entity.table, &entity.key)?;
            let outcome = if let Some(reason) = state.rejects.get(&id) {
                ApplyOutcome::RejectedInsert {
                    reason: reason.clone(),
                }
            } else if let Some(server_version) = state.conflicts.get(&id) {
                ApplyOutcome::Conflict {
                    server_version: server_version.clone(),
                }
            } else if let Some(description) = state.errors.get(&id) {
                ApplyOutcome::Error {
                    description: description.clone(),
                    server_version: state.rows.get(&id).cloned(),
                }
            } else {
                if entity.metadata.is_tombstone {
                    state.rows.remove(&id);
                } else {
                    state.rows.insert(id, entity.clone());
                }
                ApplyOutcome::Applied
            };
            outcomes.push(RowOutcome {
                entity: entity.clone(),
                outcome,
            });
        }

        Ok(ApplyReport {
            server_blob: blob,
            outcomes,
        })
    }

    fn fetch_row(&self, table: &str, key: &[FieldValue]) -> ServerResult<Option<Entity>> {
        let id = self.row_id(table, key)?;
        Ok(self.inner.lock().rows.get(&id).cloned())
    }
}

impl std::fmt::Debug for MemoryChangeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChangeProvider")
            .field("rows", &self.inner.lock().rows.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<IdRegistry> {
        Arc::new(IdRegistry::new(["orders"]).unwrap())
    }

    fn order(n: i64) -> Entity {
        Entity::new("orders", vec![FieldValue::I64(n)])
    }

    #[test]
    fn applied_rows_are_stored_and_tombstones_remove() {
        let provider = MemoryChangeProvider::new(registry());
        let report = provider.apply_changes(&[], &[order(1), order(2)]).unwrap();
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.outcome == ApplyOutcome::Applied));
        assert_eq!(provider.row_count(), 2);

        let tombstone = Entity::tombstone("orders", vec![FieldValue::I64(1)]);
        provider.apply_changes(&[], &[tombstone]).unwrap();
        assert_eq!(provider.row_count(), 1);
        assert!(provider
            .fetch_row("orders", &[FieldValue::I64(1)])
            .unwrap()
            .is_none());
    }

    #[test]
    fn scripted_outcomes() {
        let provider = MemoryChangeProvider::new(registry());
        provider
            .script_conflict(order(1).with_field("status", FieldValue::Text("shipped".into())))
            .unwrap();
        provider
            .script_error("orders", &[FieldValue::I64(2)], "check constraint")
            .unwrap();
        provider
            .script_reject("orders", &[FieldValue::I64(3)], "quota exceeded")
            .unwrap();

        let report = provider
            .apply_changes(&[], &[order(1), order(2), order(3), order(4)])
            .unwrap();
        assert!(matches!(
            report.outcomes[0].outcome,
            ApplyOutcome::Conflict { .. }
        ));
        assert!(matches!(
            report.outcomes[1].outcome,
            ApplyOutcome::Error { .. }
        ));
        assert!(matches!(
            report.outcomes[2].outcome,
            ApplyOutcome::RejectedInsert { .. }
        ));
        assert_eq!(report.outcomes[3].outcome, ApplyOutcome::Applied);
    }

    #[test]
    fn blob_advances_per_apply() {
        let provider = MemoryChangeProvider::new(registry());
        let first = provider.apply_changes(&[], &[]).unwrap();
        let second = provider.apply_changes(&first.server_blob, &[]).unwrap();
        assert_ne!(first.server_blob, second.server_blob);
    }
}
