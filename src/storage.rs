use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, PoisonError, RwLock},
};

use time::OffsetDateTime;

use txsync_core::{
    Connection, CreateConnectionCommand, ReviewCommand, Transaction, TransactionCommand,
};

// Re-export core storage types so existing code using crate::storage::* still works
pub use txsync_core::storage::{
    ConnectionRegistry, CursorStore, InsertOutcome, StorageBackend, StorageError,
    TransactionStore, UpdateOutcome,
};

fn poisoned<T>(_: PoisonError<T>) -> StorageError {
    StorageError::Unavailable("in-memory store lock poisoned".to_string())
}

/// Process-local store, used by tests and the `memory` backend.
pub struct InMemoryStorage {
    connections: RwLock<BTreeMap<Arc<str>, Connection>>,
    transactions: RwLock<BTreeMap<Arc<str>, Transaction>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
            transactions: RwLock::new(BTreeMap::new()),
        }
    }
}

fn new_row(command: &TransactionCommand) -> Transaction {
    Transaction {
        transaction_id: command.transaction_id.clone(),
        client_id: command.client_id.clone(),
        connection_id: command.connection_id.clone(),
        account_id: command.account_id.clone(),
        account_type: command.account_type,
        account_subtype: command.account_subtype.clone(),
        amount: command.amount,
        date: command.date,
        name: command.name.clone(),
        merchant_name: command.merchant_name.clone(),
        provider_category: command.provider_category.clone(),
        pending: command.pending,
        flow_kind: command.flow_kind,
        suggested_category: command.suggested_category,
        user_category: None,
        is_reviewed: false,
        notes: None,
        created_at: OffsetDateTime::now_utc(),
    }
}

fn overwrite_provider_fields(row: &mut Transaction, command: &TransactionCommand) {
    row.connection_id = command.connection_id.clone();
    row.account_id = command.account_id.clone();
    row.account_type = command.account_type;
    row.account_subtype = command.account_subtype.clone();
    row.amount = command.amount;
    row.date = command.date;
    row.name = command.name.clone();
    row.merchant_name = command.merchant_name.clone();
    row.provider_category = command.provider_category.clone();
    row.pending = command.pending;
    row.flow_kind = command.flow_kind;
    row.suggested_category = command.suggested_category;
}

impl TransactionStore for InMemoryStorage {
    fn insert_transaction(&self, command: &TransactionCommand) -> Result<InsertOutcome, StorageError> {
        let mut transactions = self.transactions.write().map_err(poisoned)?;
        if let Some(existing) = transactions.get(&command.transaction_id) {
            if existing.client_id != command.client_id {
                return Err(StorageError::OwnershipMismatch(command.transaction_id.to_string()));
            }
            return Ok(InsertOutcome::Duplicate);
        }
        transactions.insert(command.transaction_id.clone(), new_row(command));
        Ok(InsertOutcome::Inserted)
    }

    fn update_transaction(&self, command: &TransactionCommand) -> Result<UpdateOutcome, StorageError> {
        let mut transactions = self.transactions.write().map_err(poisoned)?;
        match transactions.get_mut(&command.transaction_id) {
            Some(row) => {
                if row.client_id != command.client_id {
                    return Err(StorageError::OwnershipMismatch(command.transaction_id.to_string()));
                }
                overwrite_provider_fields(row, command);
                Ok(UpdateOutcome::Updated)
            }
            None => {
                transactions.insert(command.transaction_id.clone(), new_row(command));
                Ok(UpdateOutcome::Inserted)
            }
        }
    }

    fn delete_transaction(&self, client_id: &str, transaction_id: &str) -> Result<bool, StorageError> {
        let mut transactions = self.transactions.write().map_err(poisoned)?;
        let owned = transactions
            .get(transaction_id)
            .map(|row| row.client_id.as_ref() == client_id)
            .unwrap_or(false);
        if owned {
            transactions.remove(transaction_id);
        }
        Ok(owned)
    }

    fn get_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>, StorageError> {
        let transactions = self.transactions.read().map_err(poisoned)?;
        Ok(transactions.get(transaction_id).cloned())
    }

    fn list_transactions(&self, client_id: &str) -> Result<Vec<Transaction>, StorageError> {
        let transactions = self.transactions.read().map_err(poisoned)?;
        Ok(transactions
            .values()
            .filter(|t| t.client_id.as_ref() == client_id)
            .cloned()
            .collect())
    }

    fn apply_review(&self, client_id: &str, transaction_id: &str, review: &ReviewCommand) -> Result<Transaction, StorageError> {
        let mut transactions = self.transactions.write().map_err(poisoned)?;
        let row = transactions
            .get_mut(transaction_id)
            .filter(|row| row.client_id.as_ref() == client_id)
            .ok_or_else(|| StorageError::TransactionNotFound(transaction_id.to_string()))?;
        if let Some(category) = review.user_category {
            row.user_category = Some(category);
        }
        if let Some(reviewed) = review.is_reviewed {
            row.is_reviewed = reviewed;
        }
        if let Some(notes) = &review.notes {
            row.notes = Some(notes.clone());
        }
        Ok(row.clone())
    }
}

impl ConnectionRegistry for InMemoryStorage {
    fn create_connection(&self, command: &CreateConnectionCommand) -> Result<Connection, StorageError> {
        let mut connections = self.connections.write().map_err(poisoned)?;
        if connections.contains_key(&command.id) {
            return Err(StorageError::ConnectionAlreadyExists(command.id.to_string()));
        }
        let connection = Connection {
            id: command.id.clone(),
            client_id: command.client_id.clone(),
            item_id: command.item_id.clone(),
            credential: command.credential.clone(),
            institution: command.institution.clone(),
            active: true,
            is_test: command.is_test,
            cursor: None,
            created_at: OffsetDateTime::now_utc(),
        };
        connections.insert(command.id.clone(), connection.clone());
        Ok(connection)
    }

    fn get_connection(&self, connection_id: &str) -> Result<Option<Connection>, StorageError> {
        let connections = self.connections.read().map_err(poisoned)?;
        Ok(connections.get(connection_id).cloned())
    }

    fn list_connections(&self, client_id: &str) -> Result<Vec<Connection>, StorageError> {
        let connections = self.connections.read().map_err(poisoned)?;
        let mut result: Vec<Connection> = connections
            .values()
            .filter(|c| c.client_id.as_ref() == client_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(result)
    }

    fn list_clients(&self) -> Result<Vec<Arc<str>>, StorageError> {
        let connections = self.connections.read().map_err(poisoned)?;
        let clients: BTreeSet<Arc<str>> = connections
            .values()
            .filter(|c| c.active)
            .map(|c| c.client_id.clone())
            .collect();
        Ok(clients.into_iter().collect())
    }

    fn find_by_item_id(&self, item_id: &str) -> Result<Option<Connection>, StorageError> {
        let connections = self.connections.read().map_err(poisoned)?;
        Ok(connections
            .values()
            .find(|c| c.item_id.as_ref() == item_id)
            .cloned())
    }

    fn set_active(&self, connection_id: &str, active: bool) -> Result<(), StorageError> {
        let mut connections = self.connections.write().map_err(poisoned)?;
        let connection = connections
            .get_mut(connection_id)
            .ok_or_else(|| StorageError::ConnectionNotFound(connection_id.to_string()))?;
        connection.active = active;
        tracing::debug!(connection_id, active, "Connection activation changed");
        Ok(())
    }
}

impl CursorStore for InMemoryStorage {
    fn load_cursor(&self, connection_id: &str) -> Result<Option<String>, StorageError> {
        let connections = self.connections.read().map_err(poisoned)?;
        let connection = connections
            .get(connection_id)
            .ok_or_else(|| StorageError::ConnectionNotFound(connection_id.to_string()))?;
        Ok(connection.cursor.clone())
    }

    fn commit_cursor(&self, connection_id: &str, cursor: &str) -> Result<(), StorageError> {
        let mut connections = self.connections.write().map_err(poisoned)?;
        let connection = connections
            .get_mut(connection_id)
            .ok_or_else(|| StorageError::ConnectionNotFound(connection_id.to_string()))?;
        connection.cursor = Some(cursor.to_string());
        tracing::debug!(connection_id, cursor, "Cursor committed");
        Ok(())
    }
}
