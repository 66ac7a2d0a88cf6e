use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use txsync_core::{Connection, PageSet, ProviderClient, ProviderError, StorageError, SyncErrorKind};

use crate::reconciler::ReconcileError;

/// How an empty `next_cursor` from the provider is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorMode {
    /// Nothing pending; stop and keep what was collected.
    #[default]
    Webhook,
    /// Data not ready yet; wait and ask again a bounded number of times.
    Poll,
}

#[derive(Debug, Clone)]
pub struct SyncLoopSettings {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub mode: CursorMode,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for SyncLoopSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            mode: CursorMode::Webhook,
            poll_attempts: 5,
            poll_interval: Duration::from_millis(2000),
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("change stream kept mutating during pagination ({attempts} attempts): {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("sync cancelled")]
    Cancelled,
    #[error("sync timed out after {0:?}")]
    TimedOut(Duration),
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),
}

impl SyncError {
    pub fn kind(&self) -> SyncErrorKind {
        match self {
            SyncError::RetriesExhausted { .. } => SyncErrorKind::PaginationRetriesExhausted,
            SyncError::Provider(ProviderError::Credential { .. }) => SyncErrorKind::Credential,
            SyncError::Provider(_) => SyncErrorKind::Provider,
            SyncError::Reconcile(_) | SyncError::Storage(_) => SyncErrorKind::Persistence,
            SyncError::Cancelled => SyncErrorKind::Cancelled,
            SyncError::TimedOut(_) => SyncErrorKind::Timeout,
            SyncError::ConnectionNotFound(_) => SyncErrorKind::NotFound,
        }
    }
}

/// What one pass over the change stream produced.
#[derive(Debug, Clone, Default)]
pub struct CollectedChanges {
    pub page_set: PageSet,
    pub pages_fetched: u32,
    pub mutation_retries: u32,
}

/// Progress notifications emitted while paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingEvent {
    /// The stream mutated; the loop is backing off before restarting.
    MutationRetry { attempt: u32, delay: Duration },
    /// Backoff finished and paging restarts from the committed cursor.
    Resumed,
}

/// Pulls every pending page for a connection before anything is persisted.
pub struct SyncLoop {
    provider: Arc<dyn ProviderClient>,
    settings: SyncLoopSettings,
}

impl SyncLoop {
    pub fn new(provider: Arc<dyn ProviderClient>, settings: SyncLoopSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &SyncLoopSettings {
        &self.settings
    }

    /// Collect the full page-set starting at `committed_cursor`.
    ///
    /// A mutation reported mid-pagination throws away everything gathered so
    /// far and restarts from `committed_cursor`; the partially advanced cursor
    /// is never a valid resumption point. Any error leaves nothing behind for
    /// the caller to commit.
    pub async fn collect(
        &self,
        connection: &Connection,
        committed_cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<CollectedChanges, SyncError> {
        self.collect_observed(connection, committed_cursor, cancel, &mut |_| {})
            .await
    }

    /// Like [`SyncLoop::collect`], reporting each mutation retry to `on_event`.
    pub async fn collect_observed(
        &self,
        connection: &Connection,
        committed_cursor: Option<&str>,
        cancel: &CancellationToken,
        on_event: &mut (dyn FnMut(PagingEvent) + Send),
    ) -> Result<CollectedChanges, SyncError> {
        let initial_cursor: Option<String> = committed_cursor
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        let mut cursor = initial_cursor.clone();
        let mut collected = CollectedChanges::default();
        let mut has_more = true;
        let mut retry_count: u32 = 0;
        let mut empty_polls: u32 = 0;

        while has_more {
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                r = self.provider.fetch_changes_page(&connection.credential, cursor.as_deref()) => r,
            };

            match response {
                Ok(mut page) => {
                    if page.next_cursor.is_empty() {
                        if self.settings.mode == CursorMode::Poll && empty_polls < self.settings.poll_attempts {
                            empty_polls += 1;
                            tracing::debug!(
                                connection_id = %connection.id,
                                attempt = empty_polls,
                                "Changes not ready, polling again"
                            );
                            self.pause(self.settings.poll_interval, cancel).await?;
                            continue;
                        }
                        tracing::info!(
                            connection_id = %connection.id,
                            pages = collected.pages_fetched,
                            "No further changes available"
                        );
                        break;
                    }

                    let next_cursor = std::mem::take(&mut page.next_cursor);
                    has_more = page.has_more;
                    tracing::debug!(
                        connection_id = %connection.id,
                        added = page.added.len(),
                        modified = page.modified.len(),
                        removed = page.removed.len(),
                        has_more,
                        "Fetched changes page"
                    );
                    collected.page_set.extend(page);
                    collected.page_set.next_cursor = Some(next_cursor.clone());
                    collected.pages_fetched += 1;
                    cursor = Some(next_cursor);
                    retry_count = 0;
                }
                Err(ProviderError::Retryable { reason }) => {
                    if retry_count >= self.settings.max_retries {
                        tracing::error!(
                            connection_id = %connection.id,
                            retries = retry_count,
                            reason = %reason,
                            "Pagination retries exhausted"
                        );
                        return Err(SyncError::RetriesExhausted {
                            attempts: retry_count + 1,
                            reason,
                        });
                    }
                    retry_count += 1;
                    collected.mutation_retries += 1;
                    metrics::increment_counter!("txsync_mutation_retries_total");

                    let delay = self.settings.base_delay * retry_count;
                    tracing::warn!(
                        connection_id = %connection.id,
                        attempt = retry_count,
                        max_retries = self.settings.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Change stream mutated during pagination, restarting from committed cursor"
                    );

                    collected.page_set.clear();
                    collected.pages_fetched = 0;
                    cursor = initial_cursor.clone();
                    has_more = true;
                    empty_polls = 0;
                    on_event(PagingEvent::MutationRetry {
                        attempt: retry_count,
                        delay,
                    });
                    self.pause(delay, cancel).await?;
                    on_event(PagingEvent::Resumed);
                }
                Err(e) => {
                    tracing::error!(connection_id = %connection.id, error = %e, "Provider error, aborting sync");
                    return Err(SyncError::Provider(e));
                }
            }
        }

        Ok(collected)
    }

    async fn pause(&self, delay: Duration, cancel: &CancellationToken) -> Result<(), SyncError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
