use std::{sync::Arc, time::Duration};

use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;

use txsync_core::{StorageError, SyncResult};

use crate::orchestrator::SyncOrchestrator;

/// Outcome of one pass over every client with an active connection.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub results: Vec<SyncResult>,
    /// Clients whose task panicked or was aborted before producing a result.
    pub lost: usize,
}

impl SweepReport {
    pub fn clients(&self) -> usize {
        self.results.len() + self.lost
    }

    pub fn failed_connections(&self) -> usize {
        self.results.iter().map(|r| r.errors.len()).sum()
    }
}

/// Periodically sweeps all clients, syncing at most `max_concurrent`
/// clients at a time. Connections of one client are still synced in order.
pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    interval: Duration,
    max_concurrent: usize,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, interval: Duration, max_concurrent: usize) -> Self {
        Self {
            orchestrator,
            interval,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn sweep(&self, cancel: &CancellationToken) -> Result<SweepReport, StorageError> {
        let clients = self.orchestrator.store().list_clients()?;
        tracing::info!(clients = clients.len(), "Starting sweep");

        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        for client_id in clients {
            let orchestrator = self.orchestrator.clone();
            let permits = permits.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                orchestrator.sync_with_cancel(&client_id, None, &cancel).await
            });
        }

        let mut report = SweepReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => report.results.push(result),
                Err(e) => {
                    tracing::error!(error = %e, "Client sync task did not complete");
                    report.lost += 1;
                }
            }
        }
        report.results.sort_by(|a, b| a.client_id.cmp(&b.client_id));

        tracing::info!(
            clients = report.clients(),
            failed_connections = report.failed_connections(),
            lost = report.lost,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Sweep immediately, then every `interval`, until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(&shutdown).await {
                        tracing::error!(error = %e, "Sweep failed to list clients");
                    }
                }
            }
        }
        tracing::info!("Scheduler stopped");
    }
}
