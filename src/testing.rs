//! Scripted provider, fault-injecting store, and record builders for
//! exercising the engine without a network.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use rust_decimal::Decimal;
use time::Date;

use txsync_core::{
    AccountInfo, Balances, ChangesPage, Connection, ConnectionRegistry, CreateConnectionCommand,
    Credential, CursorStore, InsertOutcome, ProviderClient, ProviderError, RemovedRecord,
    ReviewCommand, StorageError, Transaction, TransactionCommand, TransactionStore, TxRecord,
    UpdateOutcome,
};

use crate::storage::InMemoryStorage;

/// Replays a fixed sequence of change-stream responses and records every
/// cursor it was asked for.
pub struct ScriptedProvider {
    pages: Mutex<VecDeque<Result<ChangesPage, ProviderError>>>,
    accounts: Mutex<Result<Vec<AccountInfo>, ProviderError>>,
    requested: Mutex<Vec<Option<String>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(VecDeque::new()),
            accounts: Mutex::new(Ok(Vec::new())),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn with_accounts(self, accounts: Vec<AccountInfo>) -> Self {
        self.set_accounts(Ok(accounts));
        self
    }

    pub fn set_accounts(&self, accounts: Result<Vec<AccountInfo>, ProviderError>) {
        if let Ok(mut guard) = self.accounts.lock() {
            *guard = accounts;
        }
    }

    pub fn push_page(&self, page: ChangesPage) {
        self.push(Ok(page));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.push(Err(error));
    }

    pub fn push(&self, response: Result<ChangesPage, ProviderError>) {
        if let Ok(mut pages) = self.pages.lock() {
            pages.push_back(response);
        }
    }

    /// Cursors passed to `fetch_changes_page`, in call order.
    pub fn requested_cursors(&self) -> Vec<Option<String>> {
        self.requested.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.pages.lock().map(|p| p.len()).unwrap_or_default()
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn fetch_accounts(&self, _credential: &Credential) -> Result<Vec<AccountInfo>, ProviderError> {
        self.accounts
            .lock()
            .map_err(|_| ProviderError::fatal("scripted provider poisoned"))?
            .clone()
    }

    async fn fetch_changes_page(&self, _credential: &Credential, cursor: Option<&str>) -> Result<ChangesPage, ProviderError> {
        if let Ok(mut requested) = self.requested.lock() {
            requested.push(cursor.map(str::to_string));
        }
        self.pages
            .lock()
            .map_err(|_| ProviderError::fatal("scripted provider poisoned"))?
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::fatal("script exhausted")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The one record is rejected; the store itself is fine.
    Record,
    /// The backend is unusable, as with a locked or unreachable database.
    Backend,
}

/// In-memory store that fails writes for chosen transaction ids.
pub struct FaultyStore {
    inner: InMemoryStorage,
    faults: Mutex<HashMap<String, Fault>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStorage::new(),
            faults: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail(&self, transaction_id: &str, fault: Fault) {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(transaction_id.to_string(), fault);
        }
    }

    fn check(&self, transaction_id: &str) -> Result<(), StorageError> {
        let fault = self
            .faults
            .lock()
            .map_err(|_| StorageError::Unavailable("fault table poisoned".to_string()))?
            .get(transaction_id)
            .copied();
        match fault {
            Some(Fault::Record) => Err(StorageError::Other(format!("rejected {}", transaction_id))),
            Some(Fault::Backend) => Err(StorageError::Unavailable("database is locked".to_string())),
            None => Ok(()),
        }
    }
}

impl Default for FaultyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionStore for FaultyStore {
    fn insert_transaction(&self, command: &TransactionCommand) -> Result<InsertOutcome, StorageError> {
        self.check(&command.transaction_id)?;
        self.inner.insert_transaction(command)
    }

    fn update_transaction(&self, command: &TransactionCommand) -> Result<UpdateOutcome, StorageError> {
        self.check(&command.transaction_id)?;
        self.inner.update_transaction(command)
    }

    fn delete_transaction(&self, client_id: &str, transaction_id: &str) -> Result<bool, StorageError> {
        self.check(transaction_id)?;
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

impl ConnectionRegistry for FaultyStore {
    fn create_connection(&self, command: &CreateConnectionCommand) -> Result<Connection, StorageError> {
        self.inner.create_connection(command)
    }

    fn get_connection(&self, connection_id: &str) -> Result<Option<Connection>, StorageError> {
        self.inner.get_connection(connection_id)
    }

    fn list_connections(&self, client_id: &str) -> Result<Vec<Connection>, StorageError> {
        self.inner.list_connections(client_id)
    }

    fn list_clients(&self) -> Result<Vec<Arc<str>>, StorageError> {
        self.inner.list_clients()
    }

    fn find_by_item_id(&self, item_id: &str) -> Result<Option<Connection>, StorageError> {
        self.inner.find_by_item_id(item_id)
    }

    fn set_active(&self, connection_id: &str, active: bool) -> Result<(), StorageError> {
        self.inner.set_active(connection_id, active)
    }
}

impl CursorStore for FaultyStore {
    fn load_cursor(&self, connection_id: &str) -> Result<Option<String>, StorageError> {
        self.inner.load_cursor(connection_id)
    }

    fn commit_cursor(&self, connection_id: &str, cursor: &str) -> Result<(), StorageError> {
        self.inner.commit_cursor(connection_id, cursor)
    }
}

pub fn account(account_id: &str, account_type: &str) -> AccountInfo {
    AccountInfo {
        account_id: Arc::from(account_id),
        account_type: Arc::from(account_type),
        subtype: None,
        name: Arc::from(account_id),
        mask: None,
        balances: Balances::default(),
    }
}

pub fn tx(transaction_id: &str, account_id: &str, amount: Decimal, name: &str, date: Date) -> TxRecord {
    TxRecord {
        transaction_id: Arc::from(transaction_id),
        account_id: Arc::from(account_id),
        amount,
        date,
        name: Arc::from(name),
        merchant_name: None,
        category: Vec::new(),
        personal_finance_category: None,
        pending: false,
    }
}

pub fn removed(transaction_id: &str) -> RemovedRecord {
    RemovedRecord {
        transaction_id: Arc::from(transaction_id),
    }
}

pub fn page(added: Vec<TxRecord>, next_cursor: &str, has_more: bool) -> ChangesPage {
    ChangesPage {
        added,
        modified: Vec::new(),
        removed: Vec::new(),
        next_cursor: next_cursor.to_string(),
        has_more,
    }
}
