use std::fmt::Display;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    PaginationRetriesExhausted,
    Provider,
    Credential,
    Persistence,
    Timeout,
    Cancelled,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorEntry {
    pub connection_id: String,
    pub institution: String,
    pub kind: SyncErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Synced,
    /// Nothing pending upstream; no cursor was committed.
    NotReady,
    /// Cursor committed, but some records could not be saved.
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSyncResult {
    pub connection_id: String,
    pub institution: String,
    pub status: ConnectionStatus,
    pub added: u32,
    pub modified: u32,
    pub removed: u32,
    pub duplicates: u32,
    pub record_errors: u32,
    pub cursor: Option<String>,
}

impl ConnectionSyncResult {
    pub fn new(connection_id: &str, institution: &str) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            institution: institution.to_string(),
            status: ConnectionStatus::Failed,
            added: 0,
            modified: 0,
            removed: 0,
            duplicates: 0,
            record_errors: 0,
            cursor: None,
        }
    }
}

/// Outcome of one `sync(client, connection?)` call.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub client_id: String,
    pub items_processed: u32,
    pub added: u32,
    pub modified: u32,
    pub removed: u32,
    pub errors: Vec<SyncErrorEntry>,
    pub connections: Vec<ConnectionSyncResult>,
}

impl SyncResult {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: ConnectionSyncResult) {
        self.items_processed += 1;
        self.added += outcome.added;
        self.modified += outcome.modified;
        self.removed += outcome.removed;
        self.connections.push(outcome);
    }

    pub fn failed(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| c.status == ConnectionStatus::Failed)
            .count()
    }

    /// Connections whose changes were all applied.
    pub fn synced(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| matches!(c.status, ConnectionStatus::Synced | ConnectionStatus::NotReady))
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Display for SyncResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {} accounts synced", self.synced(), self.connections.len())?;
        if !self.errors.is_empty() {
            write!(f, "; {} failed: ", self.errors.len())?;
            let reasons: Vec<String> = self
                .errors
                .iter()
                .map(|e| format!("{} ({})", e.institution, e.message))
                .collect();
            f.write_str(&reasons.join(", "))?;
        }
        Ok(())
    }
}
