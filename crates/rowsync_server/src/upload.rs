//! Upload reconciliation: applies an uploaded change set and classifies
//! every row into exactly one response group.
//!
//! The response carries three groups in a fixed order: conflicts first,
//! then errors, then the accepted inserts with their freshly assigned
//! permanent ids. Every primary key in the merged incoming+rejected set
//! appears in exactly one group; a duplicate key aborts the exchange.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::provider::{ApplyOutcome, ChangeProvider, RowOutcome};
use rowsync_protocol::{
    ChangeSet, ChangeSetResponse, ConflictResolutionPolicy, Entity, IdRegistry, SyncConflict,
    SyncId,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// An entity rejected before it reached storage, e.g. by a validation
/// hook in front of the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedEntity {
    /// The rejected client entity.
    pub entity: Entity,
    /// Why it was rejected.
    pub reason: String,
}

impl RejectedEntity {
    /// Creates a rejection record.
    pub fn new(entity: Entity, reason: impl Into<String>) -> Self {
        Self {
            entity,
            reason: reason.into(),
        }
    }
}

/// Reconciles one uploaded change set against the provider.
pub struct UploadReconciler {
    registry: Arc<IdRegistry>,
    provider: Arc<dyn ChangeProvider>,
    policy: ConflictResolutionPolicy,
    max_upload_rows: usize,
}

impl UploadReconciler {
    /// Creates a reconciler with the given policy and limits.
    pub fn new(
        registry: Arc<IdRegistry>,
        provider: Arc<dyn ChangeProvider>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            registry,
            provider,
            policy: config.policy,
            max_upload_rows: config.max_upload_rows,
        }
    }

    /// Processes one uploaded change set.
    ///
    /// `rejected` carries entities turned away before storage; they are
    /// resolved against the current server state and reported on the
    /// error channel alongside the provider's own failures.
    pub fn process(
        &self,
        incoming: ChangeSet,
        rejected: Vec<RejectedEntity>,
    ) -> ServerResult<ChangeSetResponse> {
        if incoming.data.len() > self.max_upload_rows {
            return Err(ServerError::InvalidRequest(format!(
                "uploaded change set has {} rows, limit is {}",
                incoming.data.len(),
                self.max_upload_rows
            )));
        }
        for entity in &incoming.data {
            if entity.key.is_empty() {
                return Err(ServerError::InvalidRequest(format!(
                    "entity in table `{}` has an empty primary key",
                    entity.table
                )));
            }
            if !entity.is_valid_for_upload() {
                return Err(ServerError::InvalidRequest(format!(
                    "entity in table `{}` carries neither a permanent id nor a temp id",
                    entity.table
                )));
            }
        }
        self.check_duplicates(&incoming.data, &rejected)?;

        debug!(
            rows = incoming.data.len(),
            rejected = rejected.len(),
            "applying uploaded change set"
        );
        let report = self
            .provider
            .apply_changes(&incoming.server_blob, &incoming.data)?;

        let mut conflicts = Vec::new();
        let mut errors = Vec::new();
        let mut updated_items = Vec::new();

        for RowOutcome { entity, outcome } in report.outcomes {
            match outcome {
                ApplyOutcome::Applied => {
                    updated_items.push(self.accept(entity)?);
                }
                ApplyOutcome::Conflict { server_version } => {
                    conflicts.push(self.resolve_conflict(entity, server_version)?);
                }
                ApplyOutcome::Error {
                    description,
                    server_version,
                } => {
                    errors.push(self.row_error(entity, description, server_version)?);
                }
                ApplyOutcome::RejectedInsert { reason } => {
                    // The candidate set shrinks: no permanent id is
                    // assigned for this row.
                    errors.push(self.row_error(entity, reason, None)?);
                }
            }
        }

        for RejectedEntity { entity, reason } in rejected {
            errors.push(self.row_error(entity, reason, None)?);
        }

        if !conflicts.is_empty() || !errors.is_empty() {
            warn!(
                conflicts = conflicts.len(),
                errors = errors.len(),
                "upload finished with per-row failures"
            );
        }

        conflicts.extend(errors);
        Ok(ChangeSetResponse {
            server_blob: report.server_blob,
            conflicts,
            updated_items,
            error: None,
        })
    }

    /// Rejects requests in which the same primary key appears twice
    /// across the incoming and pre-rejected entities.
    fn check_duplicates(
        &self,
        incoming: &[Entity],
        rejected: &[RejectedEntity],
    ) -> ServerResult<()> {
        let mut seen: BTreeSet<SyncId> = BTreeSet::new();
        let all = incoming
            .iter()
            .chain(rejected.iter().map(|r| &r.entity));
        for entity in all {
            let id = self.registry.row_id(&entity.table, &entity.key)?;
            if !seen.insert(id) {
                return Err(ServerError::DuplicateKey {
                    table: entity.table.clone(),
                    key: format!("{:?}", entity.key),
                });
            }
        }
        Ok(())
    }

    /// Finalizes an applied row: an insert candidate gets its permanent
    /// id, derived deterministically from table name and primary key,
    /// and keeps its temp id so the client can match it back up.
    fn accept(&self, entity: Entity) -> ServerResult<Entity> {
        if entity.is_insert_candidate() {
            let id = self.registry.permanent_id(&entity.table, &entity.key)?;
            Ok(entity.with_id(id))
        } else {
            Ok(entity)
        }
    }

    fn resolve_conflict(
        &self,
        client: Entity,
        server_version: Entity,
    ) -> ServerResult<SyncConflict> {
        let (live, losing) = match self.policy {
            // The client entity already carries its own temp id, so the
            // losing side stays matchable without extra tagging.
            ConflictResolutionPolicy::ServerWins => (server_version, client),
            // The server lost: tag its version with the client temp id
            // so the client can pair the loser with its own row.
            ConflictResolutionPolicy::ClientWins => {
                let losing = match &client.metadata.temp_id {
                    Some(temp_id) => server_version.with_temp_id(temp_id.clone()),
                    None => server_version,
                };
                (self.accept(client)?, losing)
            }
        };
        Ok(SyncConflict::Conflict {
            live,
            losing,
            resolution: self.policy,
        })
    }

    /// Builds the error-channel entry for a failed row. The live side is
    /// the current server row, or a primary-key-only tombstone when the
    /// row does not exist; both sides carry the client temp id when one
    /// is known.
    fn row_error(
        &self,
        entity: Entity,
        description: String,
        server_version: Option<Entity>,
    ) -> ServerResult<SyncConflict> {
        let current = match server_version {
            Some(row) => Some(row),
            None => self.provider.fetch_row(&entity.table, &entity.key)?,
        };
        let mut live =
            current.unwrap_or_else(|| Entity::tombstone(entity.table.clone(), entity.key.clone()));
        if let Some(temp_id) = &entity.metadata.temp_id {
            live = live.with_temp_id(temp_id.clone());
        }
        Ok(SyncConflict::Error {
            live,
            error_entity: entity,
            description,
        })
    }
}
