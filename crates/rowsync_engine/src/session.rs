//! The sync session orchestrator.
//!
//! A [`SyncSession`] drives one exchange at a time against a server:
//! open the local session, upload the locally changed rows in a single
//! pass, page the server's changes down until the last batch, and close
//! the local session on every exit path. Ordinary failures never surface
//! as `Err`; they land in [`SessionStats`] so the caller always gets the
//! counters for the work that did complete. Only internal-consistency
//! faults propagate.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::store::LocalStore;
use crate::transport::SyncTransport;
use parking_lot::Mutex;
use rowsync_protocol::ProtocolError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cooperative cancellation handle shared between the caller and a run.
///
/// Cancellation is checked before every network round-trip; work already
/// in flight completes and is reflected in the statistics.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Counters and outcome of one sync run. Immutable once returned.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Change sets sent to the server.
    pub change_sets_uploaded: u64,
    /// Rows sent to the server, counted from non-error responses only.
    pub rows_uploaded: u64,
    /// Change sets received from the server.
    pub change_sets_downloaded: u64,
    /// Rows received from the server.
    pub rows_downloaded: u64,
    /// Conflicts the server resolved during the upload.
    pub conflicts: u64,
    /// Rows the server failed to apply during the upload.
    pub errors: u64,
    /// True if the run was cancelled cooperatively.
    pub cancelled: bool,
    /// Ordinary failure that ended the run, if any.
    pub error: Option<SyncError>,
    /// Wall-clock time the run started.
    pub started_at: Option<SystemTime>,
    /// Wall-clock time the run finished.
    pub finished_at: Option<SystemTime>,
}

impl SessionStats {
    fn begin() -> Self {
        Self {
            started_at: Some(SystemTime::now()),
            ..Self::default()
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(SystemTime::now());
        self
    }

    /// Returns true if the run finished without failure or cancellation.
    pub fn succeeded(&self) -> bool {
        !self.cancelled && self.error.is_none()
    }

    /// Wall-clock duration of the run, if both timestamps are present.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start).ok(),
            _ => None,
        }
    }
}

/// Partial statistics produced by one step of the run and merged
/// functionally into the run's [`SessionStats`].
#[derive(Debug, Default)]
struct StepStats {
    change_sets_uploaded: u64,
    rows_uploaded: u64,
    change_sets_downloaded: u64,
    rows_downloaded: u64,
    conflicts: u64,
    errors: u64,
    failure: Option<SyncError>,
}

impl StepStats {
    fn failed(mut self, failure: SyncError) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Orchestrates upload-then-download exchanges between a [`LocalStore`]
/// and a [`SyncTransport`].
///
/// An instance is non-reentrant: a second `run` while one is in flight
/// returns [`SyncError::AlreadyRunning`]. Once a run completes the
/// instance can be reused.
pub struct SyncSession {
    config: SyncConfig,
    store: Arc<dyn LocalStore>,
    transport: Arc<dyn SyncTransport>,
    busy: Mutex<bool>,
}

impl SyncSession {
    /// Creates a session over the given store and transport.
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn LocalStore>,
        transport: Arc<dyn SyncTransport>,
    ) -> Self {
        Self {
            config,
            store,
            transport,
            busy: Mutex::new(false),
        }
    }

    /// The configuration this session runs with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Runs one full sync exchange.
    ///
    /// Returns `Err` only for [`SyncError::AlreadyRunning`] and for
    /// internal-consistency faults; every other outcome, including
    /// cancellation, is reported through the returned [`SessionStats`].
    pub fn run(&self, token: &CancellationToken) -> SyncResult<SessionStats> {
        {
            let mut busy = self.busy.lock();
            if *busy {
                return Err(SyncError::AlreadyRunning);
            }
            *busy = true;
        }
        let result = self.run_exclusive(token);
        *self.busy.lock() = false;
        result
    }

    fn run_exclusive(&self, token: &CancellationToken) -> SyncResult<SessionStats> {
        let span = tracing::info_span!("sync_run");
        let _guard = span.enter();

        let mut stats = SessionStats::begin();
        info!("sync run started");

        if let Err(error) = self.store.open_session() {
            if let SyncError::Internal(fault) = error {
                return Err(fault.into());
            }
            warn!(%error, "failed to open local session");
            stats.error = Some(error);
            return Ok(stats.finish());
        }

        let upload = self.upload_step(token);
        let upload_clean = upload.failure.is_none();
        let mut fault = Self::absorb(upload, &mut stats);

        // An upload failure of any kind skips the download phase; the
        // server blob has not advanced, so downloading would redeliver.
        if fault.is_none() && upload_clean {
            let download = self.download_step(token);
            fault = Self::absorb(download, &mut stats);
        }

        let close_result = self.store.close_session();
        if let Some(protocol_fault) = fault {
            return Err(protocol_fault.into());
        }
        if let Err(error) = close_result {
            if let SyncError::Internal(fault) = error {
                return Err(fault.into());
            }
            warn!(%error, "failed to close local session");
            if stats.error.is_none() && !stats.cancelled {
                stats.error = Some(error);
            }
        }

        let stats = stats.finish();
        info!(
            uploaded = stats.rows_uploaded,
            downloaded = stats.rows_downloaded,
            conflicts = stats.conflicts,
            errors = stats.errors,
            cancelled = stats.cancelled,
            succeeded = stats.succeeded(),
            "sync run finished"
        );
        Ok(stats)
    }

    /// Folds a step's counters into the run stats and classifies its
    /// failure: cancellation flips the flag, internal faults are handed
    /// back to the caller, everything else becomes the run's error.
    fn absorb(step: StepStats, stats: &mut SessionStats) -> Option<ProtocolError> {
        stats.change_sets_uploaded += step.change_sets_uploaded;
        stats.rows_uploaded += step.rows_uploaded;
        stats.change_sets_downloaded += step.change_sets_downloaded;
        stats.rows_downloaded += step.rows_downloaded;
        stats.conflicts += step.conflicts;
        stats.errors += step.errors;
        match step.failure {
            None => None,
            Some(SyncError::Cancelled) => {
                info!("sync run cancelled");
                stats.cancelled = true;
                None
            }
            Some(SyncError::Internal(fault)) => Some(fault),
            Some(other) => {
                warn!(error = %other, "sync step failed");
                stats.error = Some(other);
                None
            }
        }
    }

    fn upload_step(&self, token: &CancellationToken) -> StepStats {
        let mut step = StepStats::default();
        if token.is_cancelled() {
            return step.failed(SyncError::Cancelled);
        }

        let run_id = Uuid::new_v4();
        let change_set = match self.store.get_change_set(run_id) {
            Ok(change_set) => change_set,
            Err(error) => return step.failed(error),
        };
        if change_set.is_empty() {
            debug!(%run_id, "no local changes, skipping upload");
            return step;
        }

        debug!(%run_id, rows = change_set.data.len(), "uploading change set");
        let response = match self.transport.upload(&self.config, &change_set) {
            Ok(response) => response,
            Err(error) => return step.failed(error),
        };

        // The store observes the response before any hard error in it is
        // surfaced, so its dirty/uploaded bookkeeping stays consistent.
        if let Err(error) = self.store.on_change_set_uploaded(run_id, &response) {
            return step.failed(error);
        }

        step.conflicts = response.conflict_count() as u64;
        step.errors = response.error_count() as u64;
        if let Some(message) = response.error {
            return step.failed(SyncError::Server(message));
        }

        step.change_sets_uploaded = 1;
        step.rows_uploaded = change_set.data.len() as u64;
        step
    }

    fn download_step(&self, token: &CancellationToken) -> StepStats {
        let mut step = StepStats::default();
        loop {
            if token.is_cancelled() {
                return step.failed(SyncError::Cancelled);
            }

            let server_blob = match self.store.get_server_blob() {
                Ok(blob) => blob,
                Err(error) => return step.failed(error),
            };
            let page = match self.transport.download(&self.config, &server_blob) {
                Ok(page) => page,
                Err(error) => return step.failed(error),
            };
            let Some(change_set) = page else {
                debug!("server has nothing further to send");
                return step;
            };

            let rows = change_set.data.len();
            let is_last = change_set.is_last_batch;
            debug!(rows, is_last, "received download page");
            if let Err(error) = self.store.save_change_set(change_set) {
                return step.failed(error);
            }
            step.change_sets_downloaded += 1;
            step.rows_downloaded += rows as u64;

            if is_last || rows == 0 {
                return step;
            }
        }
    }
}
