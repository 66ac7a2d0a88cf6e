//! Inbound change notifications from the provider.
//!
//! Authenticity of the notification is checked before it reaches this
//! module; here it is only routed to the connection it names.

use serde::Deserialize;
use thiserror::Error;

use txsync_core::{StorageError, SyncResult};

use crate::orchestrator::SyncOrchestrator;

const SYNC_CODES: [&str; 5] = [
    "SYNC_UPDATES_AVAILABLE",
    "INITIAL_UPDATE",
    "HISTORICAL_UPDATE",
    "DEFAULT_UPDATE",
    "TRANSACTIONS_REMOVED",
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookEvent {
    pub webhook_type: String,
    pub webhook_code: String,
    pub item_id: String,
}

impl WebhookEvent {
    pub fn triggers_sync(&self) -> bool {
        SYNC_CODES.contains(&self.webhook_code.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("no connection for item {0}")]
    UnknownItem(String),
    #[error("malformed notification: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub fn parse_event(body: &str) -> Result<WebhookEvent, WebhookError> {
    Ok(serde_json::from_str(body)?)
}

/// Run a scoped sync for the connection named by `event`. Codes that don't
/// signal new transaction data are acknowledged with `Ok(None)`.
pub async fn handle_notification(
    orchestrator: &SyncOrchestrator,
    event: &WebhookEvent,
) -> Result<Option<SyncResult>, WebhookError> {
    if !event.triggers_sync() {
        tracing::debug!(
            webhook_type = %event.webhook_type,
            webhook_code = %event.webhook_code,
            item_id = %event.item_id,
            "Ignoring notification"
        );
        return Ok(None);
    }

    let connection = orchestrator
        .store()
        .find_by_item_id(&event.item_id)?
        .ok_or_else(|| WebhookError::UnknownItem(event.item_id.clone()))?;

    tracing::info!(
        webhook_code = %event.webhook_code,
        connection_id = %connection.id,
        "Notification triggered sync"
    );
    let result = orchestrator
        .sync(&connection.client_id, Some(&connection.id))
        .await;
    Ok(Some(result))
}
