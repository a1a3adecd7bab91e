//! Local store contract: the client-side replica the session syncs.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use rowsync_protocol::{ChangeSet, ChangeSetResponse, Entity};
use uuid::Uuid;

/// The client-side local store a sync session reads from and writes to.
///
/// Implementations own their change tracking; the session only sequences
/// the calls. Every session that successfully opens must be closed exactly
/// once, which the orchestrator guarantees on all exit paths.
pub trait LocalStore: Send + Sync {
    /// Opens a local session for one sync run.
    fn open_session(&self) -> SyncResult<()>;

    /// Closes the local session.
    fn close_session(&self) -> SyncResult<()>;

    /// Returns the locally changed rows as a change set tagged with the
    /// run id. An empty set means there is nothing to upload.
    fn get_change_set(&self, run_id: Uuid) -> SyncResult<ChangeSet>;

    /// Returns the last server blob acknowledged by this replica.
    fn get_server_blob(&self) -> SyncResult<Vec<u8>>;

    /// Observes the server's response to an uploaded change set.
    ///
    /// Called exactly once per upload, before any hard error in the
    /// response is surfaced, so dirty/uploaded bookkeeping stays
    /// consistent.
    fn on_change_set_uploaded(&self, run_id: Uuid, response: &ChangeSetResponse) -> SyncResult<()>;

    /// Applies a downloaded change set, including its server blob.
    fn save_change_set(&self, change_set: ChangeSet) -> SyncResult<()>;
}

/// An in-memory local store for tests and examples.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    inner: Mutex<MemoryStoreState>,
}

#[derive(Debug, Default)]
struct MemoryStoreState {
    open_count: u64,
    close_count: u64,
    session_open: bool,
    pending: Vec<Entity>,
    server_blob: Vec<u8>,
    saved: Vec<ChangeSet>,
    upload_responses: Vec<(Uuid, ChangeSetResponse)>,
    fail_open: bool,
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues rows for the next upload.
    pub fn add_pending(&self, entity: Entity) {
        self.inner.lock().pending.push(entity);
    }

    /// Makes the next `open_session` fail.
    pub fn fail_next_open(&self) {
        self.inner.lock().fail_open = true;
    }

    /// Number of `open_session` calls that succeeded.
    pub fn open_count(&self) -> u64 {
        self.inner.lock().open_count
    }

    /// Number of `close_session` calls.
    pub fn close_count(&self) -> u64 {
        self.inner.lock().close_count
    }

    /// Change sets saved from downloads, in arrival order.
    pub fn saved_change_sets(&self) -> Vec<ChangeSet> {
        self.inner.lock().saved.clone()
    }

    /// Upload responses observed, in arrival order.
    pub fn upload_responses(&self) -> Vec<(Uuid, ChangeSetResponse)> {
        self.inner.lock().upload_responses.clone()
    }

    /// The last acknowledged server blob.
    pub fn server_blob(&self) -> Vec<u8> {
        self.inner.lock().server_blob.clone()
    }

    /// Returns true while a session is open.
    pub fn is_session_open(&self) -> bool {
        self.inner.lock().session_open
    }
}

impl LocalStore for MemoryLocalStore {
    fn open_session(&self) -> SyncResult<()> {
        let mut state = self.inner.lock();
        if state.fail_open {
            state.fail_open = false;
            return Err(SyncError::Store("session open failed".into()));
        }
        state.open_count += 1;
        state.session_open = true;
        Ok(())
    }

    fn close_session(&self) -> SyncResult<()> {
        let mut state = self.inner.lock();
        state.close_count += 1;
        state.session_open = false;
        Ok(())
    }

    fn get_change_set(&self, _run_id: Uuid) -> SyncResult<ChangeSet> {
        let state = self.inner.lock();
        Ok(ChangeSet::new(
            state.pending.clone(),
            state.server_blob.clone(),
            true,
        ))
    }

    fn get_server_blob(&self) -> SyncResult<Vec<u8>> {
        Ok(self.inner.lock().server_blob.clone())
    }

    fn on_change_set_uploaded(&self, run_id: Uuid, response: &ChangeSetResponse) -> SyncResult<()> {
        let mut state = self.inner.lock();
        if !response.is_error() {
            state.pending.clear();
            state.server_blob = response.server_blob.clone();
        }
        state.upload_responses.push((run_id, response.clone()));
        Ok(())
    }

    fn save_change_set(&self, change_set: ChangeSet) -> SyncResult<()> {
        let mut state = self.inner.lock();
        state.server_blob = change_set.server_blob.clone();
        state.saved.push(change_set);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::FieldValue;

    #[test]
    fn open_close_counting() {
        let store = MemoryLocalStore::new();
        store.open_session().unwrap();
        assert!(store.is_session_open());
        store.close_session().unwrap();
        assert!(!store.is_session_open());
        assert_eq!(store.open_count(), 1);
        assert_eq!(store.close_count(), 1);
    }

    #[test]
    fn fail_next_open_is_one_shot() {
        let store = MemoryLocalStore::new();
        store.fail_next_open();
        assert!(store.open_session().is_err());
        assert!(store.open_session().is_ok());
    }

    #[test]
    fn upload_response_clears_pending_on_success() {
        let store = MemoryLocalStore::new();
        store.add_pending(Entity::new("t", vec![FieldValue::I64(1)]).with_temp_id("tmp-1"));

        let run_id = Uuid::new_v4();
        let cs = store.get_change_set(run_id).unwrap();
        assert_eq!(cs.data.len(), 1);

        let response = ChangeSetResponse {
            server_blob: vec![9],
            ..Default::default()
        };
        store.on_change_set_uploaded(run_id, &response).unwrap();

        assert!(store.get_change_set(run_id).unwrap().is_empty());
        assert_eq!(store.server_blob(), vec![9]);
    }

    #[test]
    fn error_response_keeps_pending() {
        let store = MemoryLocalStore::new();
        store.add_pending(Entity::new("t", vec![FieldValue::I64(1)]).with_temp_id("tmp-1"));

        let run_id = Uuid::new_v4();
        let response = ChangeSetResponse {
            error: Some("boom".into()),
            ..Default::default()
        };
        store.on_change_set_uploaded(run_id, &response).unwrap();

        // The store observed the response but kept its dirty rows.
        assert_eq!(store.upload_responses().len(), 1);
        assert_eq!(store.get_change_set(run_id).unwrap().data.len(), 1);
    }

    #[test]
    fn save_change_set_advances_blob() {
        let store = MemoryLocalStore::new();
        store
            .save_change_set(ChangeSet::new(Vec::new(), vec![1, 2], false))
            .unwrap();
        assert_eq!(store.server_blob(), vec![1, 2]);
        assert_eq!(store.saved_change_sets().len(), 1);
    }
}
