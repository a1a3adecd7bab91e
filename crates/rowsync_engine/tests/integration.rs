//! Client ↔ server integration: a full sync session driven against the
//! server workflows through an in-memory transport.

use rowsync_engine::{
    CancellationToken, MemoryLocalStore, SyncConfig, SyncError, SyncResult, SyncSession,
    SyncTransport,
};
use rowsync_protocol::{
    ChangeSet, ChangeSetResponse, ConflictResolutionPolicy, Entity, FieldValue, IdRegistry,
};
use rowsync_server::{MemoryChangeProvider, ServerConfig, ServerError, SyncService};
use std::sync::Arc;

/// Loopback transport handing change sets straight to a [`SyncService`].
struct LoopbackTransport {
    service: SyncService,
}

fn to_sync_error(error: ServerError) -> SyncError {
    match error {
        ServerError::Provider { message, retryable } => SyncError::Transport { message, retryable },
        other => SyncError::Server(other.to_string()),
    }
}

impl SyncTransport for LoopbackTransport {
    fn upload(
        &self,
        _config: &SyncConfig,
        change_set: &ChangeSet,
    ) -> SyncResult<ChangeSetResponse> {
        self.service
            .handle_upload(change_set.clone())
            .map_err(to_sync_error)
    }

    fn download(&self, _config: &SyncConfig, server_blob: &[u8]) -> SyncResult<Option<ChangeSet>> {
        self.service
            .handle_download(server_blob)
            .map_err(to_sync_error)
    }
}

struct Fixture {
    store: Arc<MemoryLocalStore>,
    provider: Arc<MemoryChangeProvider>,
    session: SyncSession,
}

fn fixture(policy: ConflictResolutionPolicy, max_batch_kib: usize) -> Fixture {
    let config = SyncConfig::builder()
        .policy(policy)
        .max_batch_kib(max_batch_kib)
        .tables(["orders", "customers"])
        .build();

    // The server side is wired from the same configuration the session
    // runs with, so both ends agree on tables, policy and batch size.
    let registry = Arc::new(IdRegistry::new(config.tables().iter().cloned()).unwrap());
    let provider = Arc::new(MemoryChangeProvider::new(registry.clone()));
    let service = SyncService::new(
        registry,
        provider.clone(),
        ServerConfig::default()
            .with_policy(config.policy())
            .with_max_batch_kib(config.max_batch_kib()),
    );

    let store = Arc::new(MemoryLocalStore::new());
    let session = SyncSession::new(config, store.clone(), Arc::new(LoopbackTransport { service }));
    Fixture {
        store,
        provider,
        session,
    }
}

fn order(n: i64) -> Entity {
    Entity::new("orders", vec![FieldValue::I64(n)])
        .with_temp_id(format!("tmp-{n}"))
        .with_field("payload", FieldValue::Bytes(vec![0; 200]))
}

#[test]
fn upload_then_download_full_session() {
    let f = fixture(ConflictResolutionPolicy::ServerWins, 512);
    f.store.add_pending(order(1));
    f.store.add_pending(order(2));
    f.provider
        .insert_row(
            Entity::new("customers", vec![FieldValue::I64(9)]).with_id("cust-9"),
        )
        .unwrap();

    let stats = f.session.run(&CancellationToken::new()).unwrap();

    assert!(stats.succeeded());
    assert_eq!(stats.rows_uploaded, 2);
    // Download returns the uploaded orders plus the pre-existing
    // customer, orders table first.
    assert_eq!(stats.rows_downloaded, 3);
    let saved = f.store.saved_change_sets();
    let rows: Vec<&Entity> = saved.iter().flat_map(|cs| cs.data.iter()).collect();
    assert_eq!(rows[0].table, "orders");
    assert_eq!(rows[2].table, "customers");
    // The session closed its local session exactly once.
    assert_eq!(f.store.open_count(), 1);
    assert_eq!(f.store.close_count(), 1);
}

#[test]
fn accepted_inserts_carry_permanent_ids_back_to_the_client() {
    let f = fixture(ConflictResolutionPolicy::ServerWins, 512);
    f.store.add_pending(order(1));

    let stats = f.session.run(&CancellationToken::new()).unwrap();
    assert!(stats.succeeded());

    let responses = f.store.upload_responses();
    assert_eq!(responses.len(), 1);
    let response = &responses[0].1;
    assert_eq!(response.updated_items.len(), 1);
    assert!(response.updated_items[0].has_permanent_id());
    assert_eq!(
        response.updated_items[0].metadata.temp_id.as_deref(),
        Some("tmp-1")
    );
}

#[test]
fn server_wins_conflict_reaches_the_client_stats() {
    let f = fixture(ConflictResolutionPolicy::ServerWins, 512);
    let server_row = Entity::new("orders", vec![FieldValue::I64(1)])
        .with_id("srv-1")
        .with_field("status", FieldValue::Text("shipped".into()));
    f.provider.script_conflict(server_row.clone()).unwrap();
    f.store.add_pending(order(1));
    f.store.add_pending(order(2));

    let stats = f.session.run(&CancellationToken::new()).unwrap();

    assert!(stats.succeeded());
    assert_eq!(stats.conflicts, 1);
    assert_eq!(stats.errors, 0);
    let response = &f.store.upload_responses()[0].1;
    let live = response.conflicts[0].live();
    assert_eq!(live.metadata.id, "srv-1");
}

#[test]
fn multi_page_download_lands_in_the_store_in_order() {
    let f = fixture(ConflictResolutionPolicy::ServerWins, 1);
    for n in 0..20 {
        f.provider
            .insert_row(order(n).with_id(format!("srv-{n}")))
            .unwrap();
    }

    let stats = f.session.run(&CancellationToken::new()).unwrap();

    assert!(stats.succeeded());
    assert_eq!(stats.rows_downloaded, 20);
    assert!(stats.change_sets_downloaded > 1);
    let saved = f.store.saved_change_sets();
    assert!(saved.last().unwrap().is_last_batch);
    let keys: Vec<i64> = saved
        .iter()
        .flat_map(|cs| cs.data.iter())
        .map(|e| match e.key[0] {
            FieldValue::I64(n) => n,
            _ => panic!("unexpected key type"),
        })
        .collect();
    let mut sorted = keys.clone();
    sorted.sort_unstable();
    assert_eq!(keys, sorted);
    assert_eq!(keys.len(), 20);
}

#[test]
fn provider_failure_surfaces_as_transport_error() {
    struct FailingProvider;
    impl rowsync_server::ChangeProvider for FailingProvider {
        fn get_changes(&self) -> rowsync_server::ServerResult<Vec<Entity>> {
            Err(ServerError::provider_retryable("deadlock"))
        }
        fn apply_changes(
            &self,
            _server_blob: &[u8],
            _entities: &[Entity],
        ) -> rowsync_server::ServerResult<rowsync_server::ApplyReport> {
            Err(ServerError::provider_retryable("deadlock"))
        }
        fn fetch_row(
            &self,
            _table: &str,
            _key: &[FieldValue],
        ) -> rowsync_server::ServerResult<Option<Entity>> {
            Ok(None)
        }
    }

    let registry = Arc::new(IdRegistry::new(["orders"]).unwrap());
    let service = SyncService::new(registry, Arc::new(FailingProvider), ServerConfig::default());
    let store = Arc::new(MemoryLocalStore::new());
    let session = SyncSession::new(
        SyncConfig::builder().table("orders").build(),
        store.clone(),
        Arc::new(LoopbackTransport { service }),
    );

    let stats = session.run(&CancellationToken::new()).unwrap();
    match stats.error {
        Some(SyncError::Transport { retryable, .. }) => assert!(retryable),
        other => panic!("expected transport error, got {other:?}"),
    }
    assert_eq!(store.close_count(), 1);
}
