use std::{fmt::Display, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use txsync_core::{
    Connection, ConnectionStatus, ConnectionSyncResult, PageSet, ProviderClient, StorageBackend,
    SyncErrorEntry, SyncErrorKind, SyncResult,
};

use crate::{
    reconciler::{AccountContext, RecordError, ReconcileReport, Reconciler},
    sync_loop::{PagingEvent, SyncError, SyncLoop, SyncLoopSettings},
};

/// Where a single connection's sync attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Paginating,
    MutationRetry,
    Reconciling,
    Committing,
    Done,
    Failed,
}

impl Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Paginating => "paginating",
            SyncPhase::MutationRetry => "mutation_retry",
            SyncPhase::Reconciling => "reconciling",
            SyncPhase::Committing => "committing",
            SyncPhase::Done => "done",
            SyncPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

fn advance(phase: &mut SyncPhase, next: SyncPhase, connection: &Connection) {
    tracing::debug!(connection_id = %connection.id, from = %phase, to = %next, "Sync phase");
    *phase = next;
}

/// Entry point for on-demand and scheduled syncs of one client.
pub struct SyncOrchestrator {
    store: Arc<dyn StorageBackend>,
    provider: Arc<dyn ProviderClient>,
    sync_loop: SyncLoop,
    reconciler: Reconciler,
    connection_timeout: Duration,
}

impl SyncOrchestrator {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        provider: Arc<dyn ProviderClient>,
        settings: SyncLoopSettings,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            sync_loop: SyncLoop::new(provider.clone(), settings),
            reconciler: Reconciler::new(store.clone()),
            store,
            provider,
            connection_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn StorageBackend> {
        &self.store
    }

    pub async fn sync(&self, client_id: &str, connection_id: Option<&str>) -> SyncResult {
        self.sync_with_cancel(client_id, connection_id, &CancellationToken::new())
            .await
    }

    /// Sync every active, non-test connection of `client_id` (or just
    /// `connection_id`), one after the other. Failures are collected into
    /// the result rather than returned, so the remaining connections are
    /// still attempted.
    pub async fn sync_with_cancel(
        &self,
        client_id: &str,
        connection_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> SyncResult {
        let mut result = SyncResult::new(client_id);

        let connections = match self.store.list_connections(client_id) {
            Ok(connections) => connections,
            Err(e) => {
                tracing::error!(client_id, error = %e, "Failed to list connections");
                result.errors.push(SyncErrorEntry {
                    connection_id: connection_id.unwrap_or_default().to_string(),
                    institution: String::new(),
                    kind: SyncErrorKind::Persistence,
                    message: e.to_string(),
                });
                return result;
            }
        };

        let selected: Vec<Connection> = match connection_id {
            Some(id) => {
                let found: Vec<Connection> = connections.into_iter().filter(|c| c.id.as_ref() == id).collect();
                if found.is_empty() {
                    result.errors.push(SyncErrorEntry {
                        connection_id: id.to_string(),
                        institution: String::new(),
                        kind: SyncErrorKind::NotFound,
                        message: SyncError::ConnectionNotFound(id.to_string()).to_string(),
                    });
                }
                found
            }
            None => connections,
        };

        for connection in selected {
            if !connection.is_syncable() {
                tracing::debug!(
                    connection_id = %connection.id,
                    active = connection.active,
                    is_test = connection.is_test,
                    "Skipping connection"
                );
                continue;
            }

            let mut phase = SyncPhase::Idle;
            let attempt = tokio::time::timeout(
                self.connection_timeout,
                self.sync_connection(&connection, &mut phase, cancel),
            )
            .await
            .unwrap_or_else(|_| Err(SyncError::TimedOut(self.connection_timeout)));

            match attempt {
                Ok((outcome, record_errors)) => {
                    metrics::increment_counter!("txsync_connections_synced_total");
                    if !record_errors.is_empty() {
                        result.errors.push(SyncErrorEntry {
                            connection_id: connection.id.to_string(),
                            institution: connection.institution.name.to_string(),
                            kind: SyncErrorKind::Persistence,
                            message: unsaved_message(&record_errors),
                        });
                    }
                    result.record(outcome);
                }
                Err(e) => {
                    tracing::error!(
                        client_id,
                        connection_id = %connection.id,
                        phase = %phase,
                        error = %e,
                        "Connection sync failed"
                    );
                    advance(&mut phase, SyncPhase::Failed, &connection);
                    metrics::increment_counter!("txsync_connections_failed_total");
                    result.errors.push(SyncErrorEntry {
                        connection_id: connection.id.to_string(),
                        institution: connection.institution.name.to_string(),
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                    result.record(ConnectionSyncResult::new(&connection.id, &connection.institution.name));
                }
            }
        }

        tracing::info!(
            client_id,
            items = result.items_processed,
            added = result.added,
            modified = result.modified,
            removed = result.removed,
            failed = result.errors.len(),
            "Client sync finished"
        );
        result
    }

    /// Fetch everything, reconcile it, and only then commit the cursor. An
    /// error at any step returns before the commit, leaving the previously
    /// committed cursor in place. `phase` is left at the step that failed.
    ///
    /// Records the store rejected individually are returned alongside the
    /// outcome; they do not block the commit.
    async fn sync_connection(
        &self,
        connection: &Connection,
        phase: &mut SyncPhase,
        cancel: &CancellationToken,
    ) -> Result<(ConnectionSyncResult, Vec<RecordError>), SyncError> {
        let mut outcome = ConnectionSyncResult::new(&connection.id, &connection.institution.name);

        advance(phase, SyncPhase::Paginating, connection);
        let committed = self.store.load_cursor(&connection.id)?;
        let collected = {
            let mut on_event = |event: PagingEvent| match event {
                PagingEvent::MutationRetry { .. } => advance(phase, SyncPhase::MutationRetry, connection),
                PagingEvent::Resumed => advance(phase, SyncPhase::Paginating, connection),
            };
            self.sync_loop
                .collect_observed(connection, committed.as_deref(), cancel, &mut on_event)
                .await?
        };

        let next_cursor = match collected.page_set.next_cursor.clone() {
            Some(cursor) => cursor,
            None => {
                tracing::info!(connection_id = %connection.id, "No changes available yet, cursor unchanged");
                advance(phase, SyncPhase::Done, connection);
                outcome.status = ConnectionStatus::NotReady;
                outcome.cursor = committed;
                return Ok((outcome, Vec::new()));
            }
        };

        advance(phase, SyncPhase::Reconciling, connection);
        let report = self.reconcile(connection, &collected.page_set, cancel).await?;

        advance(phase, SyncPhase::Committing, connection);
        self.store.commit_cursor(&connection.id, &next_cursor)?;
        advance(phase, SyncPhase::Done, connection);

        metrics::counter!("txsync_transactions_added_total", report.added as u64);
        metrics::counter!("txsync_transactions_modified_total", report.modified as u64);
        metrics::counter!("txsync_transactions_removed_total", report.removed as u64);

        tracing::info!(
            connection_id = %connection.id,
            pages = collected.pages_fetched,
            retries = collected.mutation_retries,
            added = report.added,
            modified = report.modified,
            removed = report.removed,
            record_errors = report.record_errors.len(),
            "Connection synced"
        );

        outcome.status = if report.record_errors.is_empty() {
            ConnectionStatus::Synced
        } else {
            ConnectionStatus::Partial
        };
        outcome.added = report.added;
        outcome.modified = report.modified;
        outcome.removed = report.removed;
        outcome.duplicates = report.duplicates;
        outcome.record_errors = report.record_errors.len() as u32;
        outcome.cursor = Some(next_cursor);
        Ok((outcome, report.record_errors))
    }

    async fn reconcile(
        &self,
        connection: &Connection,
        page_set: &PageSet,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport, SyncError> {
        let accounts = if page_set.added.is_empty() && page_set.modified.is_empty() {
            AccountContext::default()
        } else {
            let accounts = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                r = self.provider.fetch_accounts(&connection.credential) => r?,
            };
            AccountContext::from_accounts(&accounts)
        };

        Ok(self
            .reconciler
            .apply(&connection.client_id, &connection.id, &accounts, page_set)?)
    }
}

fn unsaved_message(errors: &[RecordError]) -> String {
    let ids: Vec<&str> = errors.iter().map(|e| e.transaction_id.as_str()).collect();
    let noun = if ids.len() == 1 { "transaction" } else { "transactions" };
    format!("{} {} not saved: {}", ids.len(), noun, ids.join(", "))
}
