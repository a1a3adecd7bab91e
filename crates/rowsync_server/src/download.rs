//! Download assembly: batches the server's changed rows and serves them
//! to the client one page at a time.
//!
//! Pages are produced through the row sorter, so each one is a
//! size-bounded, ordered slice of the changed rows. The continuation
//! cursor is the page ordinal, encoded as eight big-endian bytes and
//! opaque to the client; an empty cursor means the first page. Pages are
//! served strictly sequentially.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::provider::ChangeProvider;
use rowsync_protocol::{ChangeSet, IdRegistry, RowSorter, SortedBatch, SyncKnowledge};
use std::sync::Arc;
use tracing::debug;

/// One assembled download exchange: the batches for a client, fixed at
/// assembly time and served by cursor.
#[derive(Debug)]
pub struct DownloadAssembler {
    pages: Vec<SortedBatch>,
}

impl DownloadAssembler {
    /// Assembles the download pages for one exchange.
    ///
    /// Fetches the provider's changed rows, sorts them, and cuts them
    /// into size-bounded batches. There is always at least one page: the
    /// terminal batch, which may carry no rows.
    pub fn assemble(
        registry: Arc<IdRegistry>,
        provider: &dyn ChangeProvider,
        config: &ServerConfig,
        knowledge: SyncKnowledge,
    ) -> ServerResult<Self> {
        let mut sorter = RowSorter::new(registry);
        sorter.add_rows(provider.get_changes()?)?;
        debug!(rows = sorter.row_count(), "assembling download pages");

        let mut pages = Vec::new();
        for batch in sorter.into_batches(config.max_batch_bytes(), knowledge) {
            pages.push(batch?);
        }
        Ok(Self { pages })
    }

    /// Number of pages in this exchange.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Serves the page the cursor points at.
    ///
    /// A cursor past the terminal page is an invalid request, never a
    /// silent empty page.
    pub fn page(&self, cursor: &[u8]) -> ServerResult<ChangeSet> {
        let ordinal = decode_cursor(cursor)?;
        let batch = self
            .pages
            .get(ordinal)
            .ok_or_else(|| {
                ServerError::InvalidRequest(format!(
                    "download cursor {ordinal} is past the terminal page"
                ))
            })?;
        debug!(ordinal, rows = batch.rows.len(), is_last = batch.is_last, "serving page");
        Ok(ChangeSet::new(
            batch.rows.clone(),
            encode_cursor(ordinal + 1),
            batch.is_last,
        ))
    }
}

fn encode_cursor(ordinal: usize) -> Vec<u8> {
    (ordinal as u64).to_be_bytes().to_vec()
}

fn decode_cursor(cursor: &[u8]) -> ServerResult<usize> {
    if cursor.is_empty() {
        return Ok(0);
    }
    let bytes: [u8; 8] = cursor.try_into().map_err(|_| {
        ServerError::InvalidRequest(format!("malformed download cursor of {} bytes", cursor.len()))
    })?;
    Ok(u64::from_be_bytes(bytes) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryChangeProvider;
    use rowsync_protocol::{Entity, FieldValue};

    fn registry() -> Arc<IdRegistry> {
        Arc::new(IdRegistry::new(["orders"]).unwrap())
    }

    fn assembler(provider: &MemoryChangeProvider, max_batch_kib: usize) -> DownloadAssembler {
        DownloadAssembler::assemble(
            registry(),
            provider,
            &ServerConfig::default().with_max_batch_kib(max_batch_kib),
            SyncKnowledge::full(),
        )
        .unwrap()
    }

    fn seeded_provider(rows: i64) -> MemoryChangeProvider {
        let provider = MemoryChangeProvider::new(registry());
        for n in 0..rows {
            provider
                .insert_row(
                    Entity::new("orders", vec![FieldValue::I64(n)])
                        .with_id(format!("srv-{n}"))
                        .with_field("payload", FieldValue::Bytes(vec![0; 200])),
                )
                .unwrap();
        }
        provider
    }

    #[test]
    fn pages_cover_all_rows_in_order() {
        let provider = seeded_provider(20);
        // 200-byte payloads against a 1 KiB bound force several pages.
        let assembler = assembler(&provider, 1);
        assert!(assembler.page_count() > 1);

        let mut cursor = Vec::new();
        let mut collected = Vec::new();
        loop {
            let page = assembler.page(&cursor).unwrap();
            collected.extend(page.data);
            if page.is_last_batch {
                break;
            }
            cursor = page.server_blob;
        }
        assert_eq!(collected.len(), 20);
        for (n, entity) in collected.iter().enumerate() {
            assert_eq!(entity.key, vec![FieldValue::I64(n as i64)]);
        }
    }

    #[test]
    fn empty_provider_serves_one_terminal_page() {
        let provider = MemoryChangeProvider::new(registry());
        let assembler = assembler(&provider, 1);
        assert_eq!(assembler.page_count(), 1);

        let page = assembler.page(&[]).unwrap();
        assert!(page.is_empty());
        assert!(page.is_last_batch);
    }

    #[test]
    fn cursor_past_terminal_is_invalid() {
        let provider = seeded_provider(1);
        let assembler = assembler(&provider, 512);
        let page = assembler.page(&[]).unwrap();
        assert!(page.is_last_batch);

        let result = assembler.page(&page.server_blob);
        assert!(matches!(result, Err(ServerError::InvalidRequest(_))));
    }

    #[test]
    fn malformed_cursor_is_invalid() {
        let provider = seeded_provider(1);
        let assembler = assembler(&provider, 512);
        assert!(matches!(
            assembler.page(&[1, 2, 3]),
            Err(ServerError::InvalidRequest(_))
        ));
    }
}
