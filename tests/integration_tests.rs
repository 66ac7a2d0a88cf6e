use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rust_decimal_macros::dec;
use time::macros::date;

use txsync::orchestrator::SyncOrchestrator;
use txsync::storage::InMemoryStorage;
use txsync::sync_loop::{CursorMode, SyncLoopSettings};
use txsync::testing::{account, page, removed, tx, Fault, FaultyStore, ScriptedProvider};
use txsync::SqliteStorage;
use txsync_core::{
    AccountInfo, Category, ChangesPage, ConnectionRegistry, ConnectionStatus,
    CreateConnectionCommand, Credential, CursorStore, FlowKind, Institution, ProviderClient,
    ProviderError, ReviewCommand, StorageBackend, SyncErrorKind, TransactionStore,
};

const CLIENT: &str = "client-1";

fn fast_settings() -> SyncLoopSettings {
    SyncLoopSettings {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        mode: CursorMode::Webhook,
        poll_attempts: 2,
        poll_interval: Duration::from_millis(1),
    }
}

fn connection(id: &str, institution: &str) -> CreateConnectionCommand {
    CreateConnectionCommand {
        id: Arc::from(id),
        client_id: Arc::from(CLIENT),
        item_id: Arc::from(format!("item-{}", id).as_str()),
        credential: Credential::new("access-token"),
        institution: Institution {
            id: Arc::from("ins_1"),
            name: Arc::from(institution),
        },
        is_test: false,
    }
}

fn setup_with<S>(store: Arc<S>, settings: SyncLoopSettings) -> (Arc<S>, Arc<ScriptedProvider>, SyncOrchestrator)
where
    S: StorageBackend + 'static,
{
    store.create_connection(&connection("conn-1", "First Bank")).unwrap();
    let provider = Arc::new(ScriptedProvider::new().with_accounts(vec![
        account("chk", "depository"),
        account("card", "credit"),
    ]));
    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        provider.clone(),
        settings,
        Duration::from_secs(5),
    );
    (store, provider, orchestrator)
}

fn setup() -> (Arc<InMemoryStorage>, Arc<ScriptedProvider>, SyncOrchestrator) {
    setup_with(Arc::new(InMemoryStorage::new()), fast_settings())
}

fn modified_page(modified: Vec<txsync_core::TxRecord>, next_cursor: &str) -> ChangesPage {
    ChangesPage {
        modified,
        next_cursor: next_cursor.to_string(),
        ..Default::default()
    }
}

fn removed_page(ids: &[&str], next_cursor: &str) -> ChangesPage {
    ChangesPage {
        removed: ids.iter().map(|id| removed(id)).collect(),
        next_cursor: next_cursor.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_first_sync_adds_and_commits_cursor() {
    let (store, provider, orchestrator) = setup();
    provider.push_page(page(
        vec![tx("t1", "chk", dec!(-20.00), "Paycheck Co", date!(2024 - 01 - 31))],
        "c1",
        false,
    ));

    let result = orchestrator.sync(CLIENT, None).await;

    assert!(result.is_success(), "{}", result);
    assert_eq!(result.items_processed, 1);
    assert_eq!(result.added, 1);
    let row = store.get_transaction("t1").unwrap().unwrap();
    assert_eq!(row.flow_kind, FlowKind::Income);
    assert_eq!(row.suggested_category, Category::Income);
    assert_eq!(row.connection_id.as_ref(), "conn-1");
    assert_eq!(store.load_cursor("conn-1").unwrap().as_deref(), Some("c1"));
    assert_eq!(provider.requested_cursors(), vec![None]);
}

#[tokio::test]
async fn test_next_sync_resumes_from_committed_cursor() {
    let (store, provider, orchestrator) = setup();
    provider.push_page(page(vec![tx("t1", "chk", dec!(10), "Deposit", date!(2024 - 01 - 01))], "c1", false));
    provider.push_page(page(vec![tx("t2", "card", dec!(30), "Shell Oil", date!(2024 - 01 - 02))], "c2", false));

    orchestrator.sync(CLIENT, None).await;
    orchestrator.sync(CLIENT, None).await;

    assert_eq!(provider.requested_cursors(), vec![None, Some("c1".to_string())]);
    assert_eq!(store.load_cursor("conn-1").unwrap().as_deref(), Some("c2"));
    assert_eq!(store.list_transactions(CLIENT).unwrap().len(), 2);
}

#[tokio::test]
async fn test_mutation_retry_leaves_no_duplicates() {
    let (store, provider, orchestrator) = setup();
    provider.push_page(page(vec![tx("t1", "chk", dec!(-5), "Starbucks", date!(2024 - 02 - 01))], "c1", true));
    provider.push_error(ProviderError::retryable("TRANSACTIONS_SYNC_MUTATION_DURING_PAGINATION"));
    provider.push_page(page(vec![tx("t1", "chk", dec!(-5), "Starbucks", date!(2024 - 02 - 01))], "c1", true));
    provider.push_page(page(vec![tx("t2", "chk", dec!(-7), "Whole Foods", date!(2024 - 02 - 02))], "c2", false));

    let result = orchestrator.sync(CLIENT, None).await;

    assert!(result.is_success(), "{}", result);
    assert_eq!(result.added, 2);
    assert_eq!(result.connections[0].duplicates, 0);
    assert_eq!(
        provider.requested_cursors(),
        vec![None, Some("c1".to_string()), None, Some("c1".to_string())]
    );
    assert_eq!(store.list_transactions(CLIENT).unwrap().len(), 2);
    assert_eq!(store.load_cursor("conn-1").unwrap().as_deref(), Some("c2"));
}

#[tokio::test]
async fn test_exhausted_retries_commit_nothing() {
    let settings = SyncLoopSettings {
        max_retries: 2,
        ..fast_settings()
    };
    let (store, provider, orchestrator) = setup_with(Arc::new(InMemoryStorage::new()), settings);
    provider.push_page(page(vec![tx("t1", "chk", dec!(-5), "Starbucks", date!(2024 - 02 - 01))], "c1", true));
    for _ in 0..3 {
        provider.push_error(ProviderError::retryable("mutated"));
    }

    let result = orchestrator.sync(CLIENT, None).await;

    assert!(!result.is_success());
    assert_eq!(result.errors[0].kind, SyncErrorKind::PaginationRetriesExhausted);
    assert_eq!(result.connections[0].status, ConnectionStatus::Failed);
    assert!(store.list_transactions(CLIENT).unwrap().is_empty());
    assert_eq!(store.load_cursor("conn-1").unwrap(), None);
}

#[tokio::test]
async fn test_removal_is_idempotent() {
    let (store, provider, orchestrator) = setup();
    provider.push_page(page(vec![tx("t1", "chk", dec!(-12), "Chipotle", date!(2024 - 03 - 01))], "c1", false));
    provider.push_page(removed_page(&["t1"], "c2"));
    provider.push_page(removed_page(&["t1"], "c3"));

    orchestrator.sync(CLIENT, None).await;
    let second = orchestrator.sync(CLIENT, None).await;
    let third = orchestrator.sync(CLIENT, None).await;

    assert_eq!(second.removed, 1);
    assert!(third.is_success(), "{}", third);
    assert_eq!(third.removed, 0);
    assert!(store.get_transaction("t1").unwrap().is_none());
    assert_eq!(store.load_cursor("conn-1").unwrap().as_deref(), Some("c3"));
}

#[tokio::test]
async fn test_review_survives_resync() {
    let (store, provider, orchestrator) = setup();
    provider.push_page(page(vec![tx("t1", "card", dec!(80), "Delta Air Lines", date!(2024 - 04 - 01))], "c1", false));
    orchestrator.sync(CLIENT, None).await;

    store
        .apply_review(
            CLIENT,
            "t1",
            &ReviewCommand {
                user_category: Some(Category::Education),
                is_reviewed: Some(true),
                notes: Some(Arc::from("conference travel")),
            },
        )
        .unwrap();

    provider.push_page(modified_page(
        vec![tx("t1", "card", dec!(95), "Delta Air Lines", date!(2024 - 04 - 02))],
        "c2",
    ));
    let result = orchestrator.sync(CLIENT, None).await;

    assert_eq!(result.modified, 1);
    let row = store.get_transaction("t1").unwrap().unwrap();
    assert_eq!(row.amount, dec!(95));
    assert_eq!(row.date, date!(2024 - 04 - 02));
    assert_eq!(row.user_category, Some(Category::Education));
    assert!(row.is_reviewed);
    assert_eq!(row.notes.as_deref(), Some("conference travel"));
    assert_eq!(row.effective_category(), Category::Education);
}

#[tokio::test]
async fn test_failed_connection_does_not_block_siblings() {
    let store = Arc::new(InMemoryStorage::new());
    store.create_connection(&connection("conn-a", "First Bank")).unwrap();
    store.create_connection(&connection("conn-b", "Second Credit Union")).unwrap();
    let provider = Arc::new(ScriptedProvider::new().with_accounts(vec![account("chk", "depository")]));
    let orchestrator = SyncOrchestrator::new(store.clone(), provider.clone(), fast_settings(), Duration::from_secs(5));

    provider.push_error(ProviderError::credential("ITEM_LOGIN_REQUIRED"));
    provider.push_page(page(vec![tx("t1", "chk", dec!(-4), "Uber", date!(2024 - 05 - 01))], "b1", false));

    let result = orchestrator.sync(CLIENT, None).await;

    assert_eq!(result.items_processed, 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].connection_id, "conn-a");
    assert_eq!(result.errors[0].institution, "First Bank");
    assert_eq!(result.errors[0].kind, SyncErrorKind::Credential);
    assert_eq!(result.added, 1);
    assert_eq!(store.load_cursor("conn-a").unwrap(), None);
    assert_eq!(store.load_cursor("conn-b").unwrap().as_deref(), Some("b1"));
    assert!(result.to_string().starts_with("1 of 2 accounts synced; 1 failed: First Bank"));
}

#[tokio::test]
async fn test_inactive_and_test_connections_are_skipped() {
    let store = Arc::new(InMemoryStorage::new());
    let mut sandbox = connection("conn-test", "Sandbox Bank");
    sandbox.is_test = true;
    store.create_connection(&sandbox).unwrap();
    store.create_connection(&connection("conn-off", "First Bank")).unwrap();
    store.set_active("conn-off", false).unwrap();
    let provider = Arc::new(ScriptedProvider::new());
    let orchestrator = SyncOrchestrator::new(store, provider.clone(), fast_settings(), Duration::from_secs(5));

    let result = orchestrator.sync(CLIENT, None).await;

    assert!(result.is_success());
    assert_eq!(result.items_processed, 0);
    assert!(provider.requested_cursors().is_empty());
}

#[tokio::test]
async fn test_scoped_sync_touches_one_connection() {
    let (store, provider, orchestrator) = setup();
    store.create_connection(&connection("conn-2", "Other Bank")).unwrap();
    provider.push_page(page(vec![], "x1", false));

    let result = orchestrator.sync(CLIENT, Some("conn-2")).await;
    assert!(result.is_success());
    assert_eq!(result.items_processed, 1);
    assert_eq!(store.load_cursor("conn-2").unwrap().as_deref(), Some("x1"));
    assert_eq!(store.load_cursor("conn-1").unwrap(), None);

    let missing = orchestrator.sync(CLIENT, Some("conn-404")).await;
    assert_eq!(missing.errors[0].kind, SyncErrorKind::NotFound);
}

#[tokio::test]
async fn test_no_changes_leaves_cursor_alone() {
    let (store, provider, orchestrator) = setup();
    store.commit_cursor("conn-1", "c7").unwrap();
    provider.push_page(page(vec![], "", false));

    let result = orchestrator.sync(CLIENT, None).await;

    assert!(result.is_success());
    assert_eq!(result.connections[0].status, ConnectionStatus::NotReady);
    assert_eq!(store.load_cursor("conn-1").unwrap().as_deref(), Some("c7"));
}

#[tokio::test]
async fn test_poll_mode_waits_for_data() {
    let settings = SyncLoopSettings {
        mode: CursorMode::Poll,
        ..fast_settings()
    };
    let (store, provider, orchestrator) = setup_with(Arc::new(InMemoryStorage::new()), settings);
    provider.push_page(page(vec![], "", false));
    provider.push_page(page(vec![tx("t1", "chk", dec!(100), "Direct Deposit", date!(2024 - 06 - 01))], "p1", false));

    let result = orchestrator.sync(CLIENT, None).await;

    assert!(result.is_success(), "{}", result);
    assert_eq!(result.added, 1);
    assert_eq!(store.load_cursor("conn-1").unwrap().as_deref(), Some("p1"));
}

#[tokio::test]
async fn test_account_lookup_failure_fails_connection() {
    let (store, provider, orchestrator) = setup();
    provider.set_accounts(Err(ProviderError::fatal("INTERNAL_SERVER_ERROR")));
    provider.push_page(page(vec![tx("t1", "chk", dec!(-1), "Vending", date!(2024 - 06 - 02))], "c1", false));

    let result = orchestrator.sync(CLIENT, None).await;

    assert_eq!(result.errors[0].kind, SyncErrorKind::Provider);
    assert!(store.get_transaction("t1").unwrap().is_none());
    assert_eq!(store.load_cursor("conn-1").unwrap(), None);
}

struct StalledProvider;

#[async_trait]
impl ProviderClient for StalledProvider {
    async fn fetch_accounts(&self, _credential: &Credential) -> Result<Vec<AccountInfo>, ProviderError> {
        Ok(Vec::new())
    }

    async fn fetch_changes_page(&self, _credential: &Credential, _cursor: Option<&str>) -> Result<ChangesPage, ProviderError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(ChangesPage::default())
    }
}

#[tokio::test]
async fn test_connection_timeout_is_reported() {
    let store = Arc::new(InMemoryStorage::new());
    store.create_connection(&connection("conn-1", "Slow Bank")).unwrap();
    let orchestrator = SyncOrchestrator::new(
        store.clone(),
        Arc::new(StalledProvider),
        fast_settings(),
        Duration::from_millis(20),
    );

    let result = orchestrator.sync(CLIENT, None).await;

    assert_eq!(result.errors[0].kind, SyncErrorKind::Timeout);
    assert_eq!(store.load_cursor("conn-1").unwrap(), None);
}

#[tokio::test]
async fn test_sqlite_backend_end_to_end() {
    let store = Arc::new(SqliteStorage::new(":memory:").unwrap());
    let (store, provider, orchestrator) = setup_with(store, fast_settings());
    provider.push_page(page(
        vec![
            tx("t1", "chk", dec!(-20.00), "Paycheck Co", date!(2024 - 01 - 31)),
            tx("t2", "card", dec!(-150.00), "Payment Thank You", date!(2024 - 01 - 31)),
        ],
        "c1",
        false,
    ));
    provider.push_page(removed_page(&["t2"], "c2"));

    orchestrator.sync(CLIENT, None).await;
    let second = orchestrator.sync(CLIENT, None).await;

    assert!(second.is_success(), "{}", second);
    let rows = store.list_transactions(CLIENT).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].flow_kind, FlowKind::Income);
    assert_eq!(store.load_cursor("conn-1").unwrap().as_deref(), Some("c2"));
}

#[tokio::test]
async fn test_locked_database_blocks_cursor_commit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.db");
    let path = path.to_str().unwrap();
    let store = Arc::new(SqliteStorage::new(path).unwrap());
    store.set_busy_timeout(Duration::from_millis(20)).unwrap();
    let (store, provider, orchestrator) = setup_with(store, fast_settings());
    provider.push_page(page(vec![tx("t1", "chk", dec!(-4.50), "Coffee", date!(2024 - 07 - 01))], "c1", false));

    let writer = rusqlite::Connection::open(path).unwrap();
    writer.execute_batch("BEGIN IMMEDIATE").unwrap();
    let result = orchestrator.sync(CLIENT, None).await;
    writer.execute_batch("ROLLBACK").unwrap();

    assert!(!result.is_success());
    assert_eq!(result.errors[0].kind, SyncErrorKind::Persistence);
    assert_eq!(result.connections[0].status, ConnectionStatus::Failed);
    assert!(store.get_transaction("t1").unwrap().is_none());
    assert_eq!(store.load_cursor("conn-1").unwrap(), None);

    provider.push_page(page(vec![tx("t1", "chk", dec!(-4.50), "Coffee", date!(2024 - 07 - 01))], "c1", false));
    let retry = orchestrator.sync(CLIENT, None).await;
    assert!(retry.is_success(), "{}", retry);
    assert!(store.get_transaction("t1").unwrap().is_some());
    assert_eq!(store.load_cursor("conn-1").unwrap().as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_rejected_record_surfaces_in_errors() {
    let (store, provider, orchestrator) = setup_with(Arc::new(FaultyStore::new()), fast_settings());
    store.create_connection(&connection("conn-2", "Second Bank")).unwrap();
    store.fail("t2", Fault::Record);
    provider.push_page(page(
        vec![
            tx("t1", "chk", dec!(-12.00), "Bookstore", date!(2024 - 07 - 02)),
            tx("t2", "chk", dec!(-30.00), "Hardware", date!(2024 - 07 - 02)),
        ],
        "c1",
        false,
    ));
    provider.push_page(page(vec![tx("t3", "chk", dec!(-8.00), "Bakery", date!(2024 - 07 - 02))], "d1", false));

    let result = orchestrator.sync(CLIENT, None).await;

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].connection_id, "conn-1");
    assert_eq!(result.errors[0].kind, SyncErrorKind::Persistence);
    assert!(result.errors[0].message.contains("t2"));
    assert_eq!(result.connections[0].status, ConnectionStatus::Partial);
    assert_eq!(result.connections[1].status, ConnectionStatus::Synced);
    assert_eq!(result.added, 2);
    assert_eq!(
        result.to_string(),
        "1 of 2 accounts synced; 1 failed: First Bank (1 transaction not saved: t2)"
    );
    assert_eq!(store.load_cursor("conn-1").unwrap().as_deref(), Some("c1"));
    assert_eq!(store.load_cursor("conn-2").unwrap().as_deref(), Some("d1"));
}
