//! Incremental transaction sync: pulls change pages from an aggregation
//! provider, classifies each record, and reconciles them into storage behind
//! a per-connection cursor.

pub mod categorize;
pub mod config;
pub mod http_provider;
pub mod orchestrator;
pub mod reconciler;
pub mod scheduler;
pub mod storage;
pub mod sync_loop;
pub mod testing;
pub mod webhook;

pub use txsync_core;
pub use txsync_sqlite::SqliteStorage;
