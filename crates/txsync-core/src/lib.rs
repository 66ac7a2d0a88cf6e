//! Core types and traits for the txsync engine.
//!
//! This crate provides the storage traits, the provider client contract and
//! the shared domain models, so storage backends and provider adapters can
//! live in separate crates.

pub mod models;
pub mod provider;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{AccountType, Category, FlowKind};
pub use models::provider::{AccountInfo, Balances, ChangesPage, Credential, PageSet, PersonalFinanceCategory, RemovedRecord, TxRecord};
pub use models::read::{Connection, Institution, Transaction};
pub use models::summary::{ConnectionStatus, ConnectionSyncResult, SyncErrorEntry, SyncErrorKind, SyncResult};
pub use models::write::{CreateConnectionCommand, ReviewCommand, TransactionCommand};
pub use provider::{ProviderClient, ProviderError};
pub use storage::{ConnectionRegistry, CursorStore, InsertOutcome, StorageBackend, StorageError, TransactionStore, UpdateOutcome};
