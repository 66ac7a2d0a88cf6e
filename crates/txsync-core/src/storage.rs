use std::sync::Arc;

use crate::models::{
    read::{Connection, Transaction},
    write::{CreateConnectionCommand, ReviewCommand, TransactionCommand},
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),
    #[error("connection already exists: {0}")]
    ConnectionAlreadyExists(String),
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("transaction {0} belongs to a different client")]
    OwnershipMismatch(String),
}

impl StorageError {
    /// Backend-level failures that leave the store in an unknown state, as
    /// opposed to a problem with one particular record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::IOError(_) | StorageError::Unavailable(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same transaction id already existed; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    /// No prior row existed, so the record was inserted.
    Inserted,
}

pub trait TransactionStore: Send + Sync {
    fn insert_transaction(&self, command: &TransactionCommand) -> Result<InsertOutcome, StorageError>;
    /// Overwrites provider-owned fields, leaving review fields untouched.
    fn update_transaction(&self, command: &TransactionCommand) -> Result<UpdateOutcome, StorageError>;
    /// Returns whether a row was deleted. Missing rows are not an error.
    fn delete_transaction(&self, client_id: &str, transaction_id: &str) -> Result<bool, StorageError>;
    fn get_transaction(&self, transaction_id: &str) -> Result<Option<Transaction>, StorageError>;
    fn list_transactions(&self, client_id: &str) -> Result<Vec<Transaction>, StorageError>;
    fn apply_review(&self, client_id: &str, transaction_id: &str, review: &ReviewCommand) -> Result<Transaction, StorageError>;
}

pub trait ConnectionRegistry: Send + Sync {
    fn create_connection(&self, command: &CreateConnectionCommand) -> Result<Connection, StorageError>;
    fn get_connection(&self, connection_id: &str) -> Result<Option<Connection>, StorageError>;
    fn list_connections(&self, client_id: &str) -> Result<Vec<Connection>, StorageError>;
    /// Clients owning at least one active connection.
    fn list_clients(&self) -> Result<Vec<Arc<str>>, StorageError>;
    fn find_by_item_id(&self, item_id: &str) -> Result<Option<Connection>, StorageError>;
    fn set_active(&self, connection_id: &str, active: bool) -> Result<(), StorageError>;
}

pub trait CursorStore: Send + Sync {
    fn load_cursor(&self, connection_id: &str) -> Result<Option<String>, StorageError>;
    fn commit_cursor(&self, connection_id: &str, cursor: &str) -> Result<(), StorageError>;
}

/// Everything the sync engine needs from persistence.
pub trait StorageBackend: TransactionStore + ConnectionRegistry + CursorStore {}

impl<T> StorageBackend for T where T: TransactionStore + ConnectionRegistry + CursorStore {}
