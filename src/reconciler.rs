use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

use txsync_core::{
    AccountInfo, AccountType, InsertOutcome, PageSet, StorageBackend, StorageError,
    TransactionCommand, TxRecord, UpdateOutcome,
};

use crate::categorize;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The backend itself failed; what was written is unknown.
    #[error("persistence failed while applying {transaction_id}: {source}")]
    Fatal {
        transaction_id: String,
        #[source]
        source: StorageError,
    },
}

/// Account type and subtype snapshot, resolved once per sync.
#[derive(Debug, Clone, Default)]
pub struct AccountContext {
    accounts: HashMap<Arc<str>, (Option<AccountType>, Option<Arc<str>>)>,
}

impl AccountContext {
    pub fn from_accounts(accounts: &[AccountInfo]) -> Self {
        let accounts = accounts
            .iter()
            .map(|a| {
                (
                    a.account_id.clone(),
                    (AccountType::from_provider(&a.account_type), a.subtype.clone()),
                )
            })
            .collect();
        Self { accounts }
    }

    pub fn account_type(&self, account_id: &str) -> Option<AccountType> {
        self.accounts.get(account_id).and_then(|(t, _)| *t)
    }

    pub fn subtype(&self, account_id: &str) -> Option<Arc<str>> {
        self.accounts.get(account_id).and_then(|(_, s)| s.clone())
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    pub transaction_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: u32,
    pub modified: u32,
    pub removed: u32,
    pub duplicates: u32,
    pub missing_removals: u32,
    pub record_errors: Vec<RecordError>,
}

/// Applies a page-set to the transaction store: added, then modified, then
/// removed. Replaying the same page-set leaves the store unchanged.
pub struct Reconciler {
    store: Arc<dyn StorageBackend>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn StorageBackend>) -> Self {
        Self { store }
    }

    pub fn apply(
        &self,
        client_id: &Arc<str>,
        connection_id: &Arc<str>,
        accounts: &AccountContext,
        page_set: &PageSet,
    ) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::default();

        for record in &page_set.added {
            let command = build_command(client_id, connection_id, accounts, record);
            match self.store.insert_transaction(&command) {
                Ok(InsertOutcome::Inserted) => report.added += 1,
                Ok(InsertOutcome::Duplicate) => {
                    tracing::debug!(transaction_id = %record.transaction_id, "Duplicate add ignored");
                    report.duplicates += 1;
                }
                Err(e) => record_failure(&mut report, record.transaction_id.as_ref(), e)?,
            }
        }

        for record in &page_set.modified {
            let command = build_command(client_id, connection_id, accounts, record);
            match self.store.update_transaction(&command) {
                Ok(UpdateOutcome::Updated) => report.modified += 1,
                Ok(UpdateOutcome::Inserted) => {
                    tracing::debug!(transaction_id = %record.transaction_id, "Modified record was unknown, inserted");
                    report.modified += 1;
                }
                Err(e) => record_failure(&mut report, record.transaction_id.as_ref(), e)?,
            }
        }

        for record in &page_set.removed {
            match self.store.delete_transaction(client_id, &record.transaction_id) {
                Ok(true) => report.removed += 1,
                Ok(false) => report.missing_removals += 1,
                Err(e) => record_failure(&mut report, record.transaction_id.as_ref(), e)?,
            }
        }

        tracing::debug!(
            client_id = %client_id,
            connection_id = %connection_id,
            added = report.added,
            modified = report.modified,
            removed = report.removed,
            duplicates = report.duplicates,
            failed = report.record_errors.len(),
            "Page-set reconciled"
        );
        Ok(report)
    }
}

fn record_failure(report: &mut ReconcileReport, transaction_id: &str, error: StorageError) -> Result<(), ReconcileError> {
    if error.is_fatal() {
        return Err(ReconcileError::Fatal {
            transaction_id: transaction_id.to_string(),
            source: error,
        });
    }
    tracing::warn!(transaction_id, error = %error, "Failed to persist transaction");
    report.record_errors.push(RecordError {
        transaction_id: transaction_id.to_string(),
        message: error.to_string(),
    });
    Ok(())
}

fn build_command(client_id: &Arc<str>, connection_id: &Arc<str>, accounts: &AccountContext, record: &TxRecord) -> TransactionCommand {
    let account_type = accounts.account_type(&record.account_id);
    let classification = categorize::classify(record, account_type);
    TransactionCommand {
        transaction_id: record.transaction_id.clone(),
        client_id: client_id.clone(),
        connection_id: connection_id.clone(),
        account_id: record.account_id.clone(),
        account_type,
        account_subtype: accounts.subtype(&record.account_id),
        amount: record.amount,
        date: record.date,
        name: record.name.clone(),
        merchant_name: record.merchant_name.clone(),
        provider_category: categorize::provider_category_label(record),
        pending: record.pending,
        flow_kind: classification.flow_kind,
        suggested_category: classification.category,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use crate::testing::{account, removed, tx};
    use rust_decimal_macros::dec;
    use time::macros::date;
    use txsync_core::{
        Category, ConnectionRegistry, CreateConnectionCommand, CursorStore, FlowKind,
        ReviewCommand, Transaction, TransactionStore,
    };

    fn ids() -> (Arc<str>, Arc<str>) {
        (Arc::from("client-1"), Arc::from("conn-1"))
    }

    fn accounts() -> AccountContext {
        AccountContext::from_accounts(&[account("chk", "depository"), account("card", "credit")])
    }

    fn snapshot(store: &InMemoryStorage) -> Vec<Transaction> {
        store.list_transactions("client-1").unwrap()
    }

    #[test]
    fn replaying_a_page_set_is_idempotent() {
        let store = Arc::new(InMemoryStorage::new());
        let reconciler = Reconciler::new(store.clone());
        let (client, conn) = ids();
        let d = date!(2024 - 04 - 02);
        let page_set = PageSet {
            added: vec![
                tx("t1", "chk", dec!(-42.10), "Safeway", d),
                tx("t2", "card", dec!(18.00), "Netflix", d),
            ],
            modified: vec![tx("t1", "chk", dec!(-43.10), "Safeway", d)],
            removed: vec![removed("t2")],
            next_cursor: Some("c1".to_string()),
        };

        let first = reconciler.apply(&client, &conn, &accounts(), &page_set).unwrap();
        let after_first = snapshot(&store);
        let second = reconciler.apply(&client, &conn, &accounts(), &page_set).unwrap();

        assert_eq!(after_first, snapshot(&store));
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].amount, dec!(-43.10));
        assert_eq!(first.added, 2);
        assert_eq!(first.removed, 1);
        // t2 was removed by the first pass, so the replay re-adds then removes it again
        assert_eq!(second.duplicates, 1);
        assert_eq!(second.added, 1);
        assert_eq!(second.removed, 1);
    }

    #[test]
    fn account_type_snapshot_drives_classification() {
        let store = Arc::new(InMemoryStorage::new());
        let reconciler = Reconciler::new(store.clone());
        let (client, conn) = ids();
        let d = date!(2024 - 04 - 02);
        let page_set = PageSet {
            added: vec![
                tx("dep", "chk", dec!(50.00), "Misc Vendor", d),
                tx("cc", "card", dec!(50.00), "Misc Vendor", d),
                tx("unk", "mystery", dec!(-50.00), "Misc Vendor", d),
            ],
            ..Default::default()
        };
        reconciler.apply(&client, &conn, &accounts(), &page_set).unwrap();

        let dep = store.get_transaction("dep").unwrap().unwrap();
        let cc = store.get_transaction("cc").unwrap().unwrap();
        let unk = store.get_transaction("unk").unwrap().unwrap();
        assert_eq!(dep.flow_kind, FlowKind::Income);
        assert_eq!(dep.account_type, Some(AccountType::Depository));
        assert_eq!(cc.flow_kind, FlowKind::Expense);
        assert_eq!(unk.flow_kind, FlowKind::Expense);
        assert_eq!(unk.account_type, None);
    }

    #[test]
    fn modified_keeps_review_fields() {
        let store = Arc::new(InMemoryStorage::new());
        let reconciler = Reconciler::new(store.clone());
        let (client, conn) = ids();
        let d = date!(2024 - 04 - 02);
        reconciler
            .apply(&client, &conn, &accounts(), &PageSet {
                added: vec![tx("t1", "card", dec!(25), "Corner Cafe", d)],
                ..Default::default()
            })
            .unwrap();
        store
            .apply_review("client-1", "t1", &ReviewCommand {
                user_category: Some(Category::Entertainment),
                is_reviewed: Some(true),
                notes: Some(Arc::from("birthday")),
            })
            .unwrap();

        reconciler
            .apply(&client, &conn, &accounts(), &PageSet {
                modified: vec![tx("t1", "card", dec!(27.50), "Corner Cafe & Bar", d)],
                ..Default::default()
            })
            .unwrap();

        let row = store.get_transaction("t1").unwrap().unwrap();
        assert_eq!(row.amount, dec!(27.50));
        assert_eq!(row.name.as_ref(), "Corner Cafe & Bar");
        assert_eq!(row.suggested_category, Category::Dining);
        assert_eq!(row.user_category, Some(Category::Entertainment));
        assert!(row.is_reviewed);
        assert_eq!(row.notes.as_deref(), Some("birthday"));
    }

    /// Fails selected writes to exercise the error paths.
    struct FlakyStore {
        inner: InMemoryStorage,
        reject: &'static str,
        fatal: bool,
    }

    impl FlakyStore {
        fn fail(&self, id: &str) -> Result<(), StorageError> {
            if id != self.reject {
                return Ok(());
            }
            if self.fatal {
                Err(StorageError::Unavailable("disk gone".to_string()))
            } else {
                Err(StorageError::Other("constraint violated".to_string()))
            }
        }
    }

    impl TransactionStore for FlakyStore {
        fn insert_transaction(&self, command: &TransactionCommand) -> Result<InsertOutcome, StorageError> {
            self.fail(&command.transaction_id)?;
            self.inner.insert_transaction(command)
        }
        fn update_transaction(&self, command: &TransactionCommand) -> Result<UpdateOutcome, StorageError> {
            self.fail(&command.transaction_id)?;
            self.inner.update_transaction(command)
        }
        fn delete_transaction(&self, client_id: &str, transaction_id: &str) -> Result<bool, StorageError> {
            self.inner.delete_transaction(client_id, transaction_id)
        }
        fn get_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>, StorageError> {
            self.inner.get_transaction(transaction_id)
        }
        fn list_transactions(&self, client_id: &str) -> Result<Vec<Transaction>, StorageError> {
            self.inner.list_transactions(client_id)
        }
        fn apply_review(&self, client_id: &str, transaction_id: &str, review: &ReviewCommand) -> Result<Transaction, StorageError> {
            self.inner.apply_review(client_id, transaction_id, review)
        }
    }

    impl ConnectionRegistry for FlakyStore {
        fn create_connection(&self, command: &CreateConnectionCommand) -> Result<txsync_core::Connection, StorageError> {
            self.inner.create_connection(command)
        }
        fn get_connection(&self, connection_id: &str) -> Result<Option<txsync_core::Connection>, StorageError> {
            self.inner.get_connection(connection_id)
        }
        fn list_connections(&self, client_id: &str) -> Result<Vec<txsync_core::Connection>, StorageError> {
            self.inner.list_connections(client_id)
        }
        fn list_clients(&self) -> Result<Vec<Arc<str>>, StorageError> {
            self.inner.list_clients()
        }
        fn find_by_item_id(&self, item_id: &str) -> Result<Option<txsync_core::Connection>, StorageError> {
            self.inner.find_by_item_id(item_id)
        }
        fn set_active(&self, connection_id: &str, active: bool) -> Result<(), StorageError> {
            self.inner.set_active(connection_id, active)
        }
    }

    impl CursorStore for FlakyStore {
        fn load_cursor(&self, connection_id: &str) -> Result<Option<String>, StorageError> {
            self.inner.load_cursor(connection_id)
        }
        fn commit_cursor(&self, connection_id: &str, cursor: &str) -> Result<(), StorageError> {
            self.inner.commit_cursor(connection_id, cursor)
        }
    }

    #[test]
    fn record_failure_is_counted_and_processing_continues() {
        let store = Arc::new(FlakyStore { inner: InMemoryStorage::new(), reject: "bad", fatal: false });
        let reconciler = Reconciler::new(store.clone());
        let (client, conn) = ids();
        let d = date!(2024 - 04 - 02);
        let report = reconciler
            .apply(&client, &conn, &accounts(), &PageSet {
                added: vec![tx("bad", "chk", dec!(-1), "x", d), tx("good", "chk", dec!(-2), "y", d)],
                ..Default::default()
            })
            .unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.record_errors.len(), 1);
        assert_eq!(report.record_errors[0].transaction_id, "bad");
        assert!(store.get_transaction("good").unwrap().is_some());
    }

    #[test]
    fn backend_failure_aborts_reconciliation() {
        let store = Arc::new(FlakyStore { inner: InMemoryStorage::new(), reject: "bad", fatal: true });
        let reconciler = Reconciler::new(store.clone());
        let (client, conn) = ids();
        let d = date!(2024 - 04 - 02);
        let err = reconciler
            .apply(&client, &conn, &accounts(), &PageSet {
                added: vec![tx("bad", "chk", dec!(-1), "x", d), tx("good", "chk", dec!(-2), "y", d)],
                ..Default::default()
            })
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Fatal { ref transaction_id, .. } if transaction_id == "bad"));
        assert!(store.get_transaction("good").unwrap().is_none());
    }
}
