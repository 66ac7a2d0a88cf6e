use std::sync::Arc;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use txsync::{
    config::{CliArgs, Config, StorageKind},
    http_provider::HttpProviderClient,
    orchestrator::SyncOrchestrator,
    scheduler::SyncScheduler,
    storage::{InMemoryStorage, StorageBackend},
    SqliteStorage,
};
use txsync_core::{Credential, ProviderClient};

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        builder.json().flatten_event(true).init();
    } else {
        builder.init();
    }
}

fn open_storage(config: &Config) -> Arc<dyn StorageBackend> {
    match config.storage.backend {
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage; nothing survives a restart");
            Arc::new(InMemoryStorage::new())
        }
        StorageKind::Sqlite => {
            let path = config.storage.path.to_string_lossy();
            let opened = SqliteStorage::new(&path)
                .and_then(|storage| storage.set_busy_timeout(config.busy_timeout()).map(|_| storage));
            match opened {
                Ok(storage) => Arc::new(storage),
                Err(e) => {
                    eprintln!("Failed to open database {}: {}", path, e);
                    std::process::exit(1);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();
    let config = Config::load(&cli).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });
    init_logging(&config);

    if config.metrics.enabled {
        let addr = config.metrics_addr().unwrap_or_else(|e| {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        });
        if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
            eprintln!("Failed to start metrics exporter: {}", e);
            std::process::exit(1);
        }
        tracing::info!(%addr, "Metrics exporter listening");
    }

    let store = open_storage(&config);
    let provider: Arc<dyn ProviderClient> = match HttpProviderClient::new(
        &config.provider.base_url,
        &config.provider.client_id,
        Credential::new(&config.provider.secret),
        config.provider.page_size,
        config.provider_timeout(),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("Failed to create provider client: {}", e);
            std::process::exit(1);
        }
    };

    let orchestrator = Arc::new(SyncOrchestrator::new(
        store,
        provider,
        config.sync_loop_settings(),
        config.connection_timeout(),
    ));

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
        });
    }

    if let Some(client_id) = cli.client.as_deref() {
        let result = orchestrator
            .sync_with_cancel(client_id, cli.connection.as_deref(), &shutdown)
            .await;
        tracing::info!(client_id, summary = %result, "Sync complete");
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render result: {}", e),
        }
        if !result.is_success() {
            std::process::exit(2);
        }
        return;
    }

    let scheduler = SyncScheduler::new(
        orchestrator,
        config.sweep_interval(),
        config.sync.max_concurrent_clients,
    );
    tracing::info!(
        mode = ?config.sync.mode,
        interval_secs = config.sync.sweep_interval_secs,
        max_concurrent = config.sync.max_concurrent_clients,
        "Starting scheduler"
    );

    if cli.once {
        match scheduler.sweep(&shutdown).await {
            Ok(report) => {
                for result in &report.results {
                    println!("{}: {}", result.client_id, result);
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Sweep failed");
                std::process::exit(1);
            }
        }
    } else {
        scheduler.run(shutdown).await;
    }
}
