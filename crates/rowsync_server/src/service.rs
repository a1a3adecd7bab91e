//! Server facade tying upload reconciliation and download assembly to
//! one provider.

use crate::config::ServerConfig;
use crate::download::DownloadAssembler;
use crate::error::ServerResult;
use crate::provider::ChangeProvider;
use crate::upload::{RejectedEntity, UploadReconciler};
use parking_lot::Mutex;
use rowsync_protocol::{ChangeSet, ChangeSetResponse, IdRegistry, SyncKnowledge};
use std::sync::Arc;
use tracing::info;

/// Serves one client's upload and download exchanges.
///
/// Download pages are assembled lazily on the first download request of
/// an exchange and served strictly sequentially; serving the terminal
/// page ends the exchange, so the next request starts a fresh one over
/// the provider's then-current rows.
pub struct SyncService {
    registry: Arc<IdRegistry>,
    provider: Arc<dyn ChangeProvider>,
    config: ServerConfig,
    exchange: Mutex<Option<DownloadAssembler>>,
}

impl SyncService {
    /// Creates a service over the given provider.
    pub fn new(
        registry: Arc<IdRegistry>,
        provider: Arc<dyn ChangeProvider>,
        config: ServerConfig,
    ) -> Self {
        Self {
            registry,
            provider,
            config,
            exchange: Mutex::new(None),
        }
    }

    /// Handles an uploaded change set.
    pub fn handle_upload(&self, incoming: ChangeSet) -> ServerResult<ChangeSetResponse> {
        let span = tracing::info_span!("handle_upload", rows = incoming.data.len());
        let _guard = span.enter();
        let reconciler = UploadReconciler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.provider),
            &self.config,
        );
        let response = reconciler.process(incoming, Vec::new())?;
        info!(
            applied = response.updated_items.len(),
            conflicts = response.conflict_count(),
            errors = response.error_count(),
            "upload reconciled"
        );
        Ok(response)
    }

    /// Handles an upload together with entities rejected before storage.
    pub fn handle_upload_with_rejections(
        &self,
        incoming: ChangeSet,
        rejected: Vec<RejectedEntity>,
    ) -> ServerResult<ChangeSetResponse> {
        let reconciler = UploadReconciler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.provider),
            &self.config,
        );
        reconciler.process(incoming, rejected)
    }

    /// Handles one download request.
    ///
    /// The first request of an exchange ignores the incoming blob (the
    /// client sends whatever it last acknowledged) and serves the first
    /// page; subsequent requests must carry the cursor returned with the
    /// previous page.
    pub fn handle_download(&self, server_blob: &[u8]) -> ServerResult<Option<ChangeSet>> {
        let span = tracing::info_span!("handle_download");
        let _guard = span.enter();

        let mut exchange = self.exchange.lock();
        let page = match exchange.as_ref() {
            None => {
                let assembler = DownloadAssembler::assemble(
                    Arc::clone(&self.registry),
                    self.provider.as_ref(),
                    &self.config,
                    SyncKnowledge::full(),
                )?;
                let page = assembler.page(&[])?;
                *exchange = Some(assembler);
                page
            }
            Some(assembler) => assembler.page(server_blob)?,
        };

        if page.is_last_batch {
            *exchange = None;
        }
        info!(rows = page.data.len(), is_last = page.is_last_batch, "page served");
        Ok(Some(page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryChangeProvider;
    use rowsync_protocol::{Entity, FieldValue};

    fn service(max_batch_kib: usize) -> (SyncService, Arc<MemoryChangeProvider>) {
        let registry = Arc::new(IdRegistry::new(["orders"]).unwrap());
        let provider = Arc::new(MemoryChangeProvider::new(registry.clone()));
        let service = SyncService::new(
            registry,
            provider.clone(),
            ServerConfig::default().with_max_batch_kib(max_batch_kib),
        );
        (service, provider)
    }

    #[test]
    fn upload_then_download_round_trip() {
        let (service, provider) = service(512);

        let uploaded = Entity::new("orders", vec![FieldValue::I64(1)]).with_temp_id("tmp-1");
        let response = service
            .handle_upload(ChangeSet::new(vec![uploaded], Vec::new(), true))
            .unwrap();
        assert_eq!(response.updated_items.len(), 1);
        assert_eq!(provider.row_count(), 1);

        let page = service.handle_download(&response.server_blob).unwrap().unwrap();
        assert_eq!(page.data.len(), 1);
        assert!(page.is_last_batch);
    }

    #[test]
    fn multi_page_download_is_sequential() {
        let (service, provider) = service(1);
        for n in 0..20 {
            provider
                .insert_row(
                    Entity::new("orders", vec![FieldValue::I64(n)])
                        .with_id(format!("srv-{n}"))
                        .with_field("payload", FieldValue::Bytes(vec![0; 200])),
                )
                .unwrap();
        }

        let mut blob = Vec::new();
        let mut rows = 0;
        loop {
            let page = service.handle_download(&blob).unwrap().unwrap();
            rows += page.data.len();
            if page.is_last_batch {
                break;
            }
            blob = page.server_blob;
        }
        assert_eq!(rows, 20);

        // The exchange ended; the next request starts a fresh one.
        let page = service.handle_download(&[]).unwrap().unwrap();
        assert!(!page.data.is_empty());
    }
}
