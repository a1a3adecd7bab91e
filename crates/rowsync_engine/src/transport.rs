//! Transport contract between the session and the server.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use rowsync_protocol::{ChangeSet, ChangeSetResponse};
use std::collections::VecDeque;

/// Delivers change sets to the server and pages results back.
///
/// The transport is the only network boundary the session crosses; it must
/// preserve entity order and deliver the `is_last_batch` flag and server
/// blob unchanged. The session's configuration is passed on every call so
/// the implementation can honor the selected serialization format and the
/// table set it negotiates with the server.
pub trait SyncTransport: Send + Sync {
    /// Uploads a change set and returns the server's response.
    fn upload(&self, config: &SyncConfig, change_set: &ChangeSet)
        -> SyncResult<ChangeSetResponse>;

    /// Requests the next download page for the given server blob.
    ///
    /// `None` means the server has nothing further to send.
    fn download(&self, config: &SyncConfig, server_blob: &[u8])
        -> SyncResult<Option<ChangeSet>>;
}

/// A scripted transport for tests.
#[derive(Debug, Default)]
pub struct MockTransport {
    upload_response: Mutex<Option<ChangeSetResponse>>,
    download_pages: Mutex<VecDeque<Option<ChangeSet>>>,
    upload_error: Mutex<Option<SyncError>>,
    download_error: Mutex<Option<SyncError>>,
    upload_calls: Mutex<u64>,
    download_calls: Mutex<u64>,
    last_config: Mutex<Option<SyncConfig>>,
}

impl MockTransport {
    /// Creates an empty mock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the response returned by `upload`.
    pub fn set_upload_response(&self, response: ChangeSetResponse) {
        *self.upload_response.lock() = Some(response);
    }

    /// Queues one download page. Queue order is serve order.
    pub fn push_download_page(&self, page: Option<ChangeSet>) {
        self.download_pages.lock().push_back(page);
    }

    /// Makes the next `upload` fail.
    pub fn fail_next_upload(&self, error: SyncError) {
        *self.upload_error.lock() = Some(error);
    }

    /// Makes the next `download` fail.
    pub fn fail_next_download(&self, error: SyncError) {
        *self.download_error.lock() = Some(error);
    }

    /// Number of upload calls observed.
    pub fn upload_calls(&self) -> u64 {
        *self.upload_calls.lock()
    }

    /// Number of download calls observed.
    pub fn download_calls(&self) -> u64 {
        *self.download_calls.lock()
    }

    /// The configuration seen on the most recent call, if any.
    pub fn last_config(&self) -> Option<SyncConfig> {
        self.last_config.lock().clone()
    }
}

impl SyncTransport for MockTransport {
    fn upload(
        &self,
        config: &SyncConfig,
        _change_set: &ChangeSet,
    ) -> SyncResult<ChangeSetResponse> {
        *self.upload_calls.lock() += 1;
        *self.last_config.lock() = Some(config.clone());
        if let Some(error) = self.upload_error.lock().take() {
            return Err(error);
        }
        self.upload_response
            .lock()
            .clone()
            .ok_or_else(|| SyncError::transport_fatal("no mock upload response set"))
    }

    fn download(&self, config: &SyncConfig, _server_blob: &[u8]) -> SyncResult<Option<ChangeSet>> {
        *self.download_calls.lock() += 1;
        *self.last_config.lock() = Some(config.clone());
        if let Some(error) = self.download_error.lock().take() {
            return Err(error);
        }
        Ok(self.download_pages.lock().pop_front().unwrap_or(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SyncConfig {
        SyncConfig::builder().table("orders").build()
    }

    #[test]
    fn mock_serves_pages_in_order() {
        let transport = MockTransport::new();
        transport.push_download_page(Some(ChangeSet::new(Vec::new(), vec![1], false)));
        transport.push_download_page(Some(ChangeSet::new(Vec::new(), vec![2], true)));

        let first = transport.download(&config(), &[]).unwrap().unwrap();
        assert_eq!(first.server_blob, vec![1]);
        let second = transport.download(&config(), &[]).unwrap().unwrap();
        assert!(second.is_last_batch);
        assert!(transport.download(&config(), &[]).unwrap().is_none());
        assert_eq!(transport.download_calls(), 3);
    }

    #[test]
    fn mock_upload_without_script_fails() {
        let transport = MockTransport::new();
        assert!(transport.upload(&config(), &ChangeSet::empty()).is_err());
    }

    #[test]
    fn injected_errors_are_one_shot() {
        let transport = MockTransport::new();
        transport.set_upload_response(ChangeSetResponse::default());
        transport.fail_next_upload(SyncError::transport_retryable("flake"));

        assert!(transport.upload(&config(), &ChangeSet::empty()).is_err());
        assert!(transport.upload(&config(), &ChangeSet::empty()).is_ok());
    }
}
