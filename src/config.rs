use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use serde::Deserialize;

use crate::sync_loop::{CursorMode, SyncLoopSettings};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid metrics listen address: {0}")]
    InvalidListenAddr(String),

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Parser, Debug)]
#[command(name = "txsync", about = "Incremental bank transaction sync engine")]
pub struct CliArgs {
    /// Path to config file
    #[arg(short, long, default_value = "txsync.toml")]
    pub config: String,

    /// Log level (overrides config file)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Sync a single client and exit
    #[arg(long)]
    pub client: Option<String>,

    /// Limit the client sync to one connection
    #[arg(long, requires = "client")]
    pub connection: Option<String>,

    /// Run one sweep over all clients and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageKind,

    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub secret: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default)]
    pub mode: CursorMode,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_max_concurrent_clients")]
    pub max_concurrent_clients: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("txsync.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_base_url() -> String {
    "https://sandbox.plaid.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_poll_attempts() -> u32 {
    5
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_connection_timeout_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_max_concurrent_clients() -> usize {
    4
}

fn default_metrics_listen() -> String {
    "0.0.0.0:9000".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            backend: StorageKind::default(),
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            base_url: default_base_url(),
            client_id: String::new(),
            secret: String::new(),
            timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            mode: CursorMode::default(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            connection_timeout_secs: default_connection_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_concurrent_clients: default_max_concurrent_clients(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

impl Config {
    /// Load the config file named on the command line, then apply CLI
    /// overrides. An unreadable or unparsable file falls back to the
    /// defaults; only invalid settings are an error.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(&cli.config) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                eprintln!("Warning: {}", e);
                Config::default()
            }),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    let err = ConfigError::Read {
                        path: cli.config.clone(),
                        source: e,
                    };
                    eprintln!("Warning: {}", err);
                }
                Config::default()
            }
        };

        // CLI overrides
        if let Some(ref level) = cli.log_level {
            config.logging.level = level.clone();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.max_concurrent_clients == 0 {
            return Err(ConfigError::Invalid {
                name: "sync.max_concurrent_clients",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.provider.page_size == 0 {
            return Err(ConfigError::Invalid {
                name: "provider.page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.metrics.enabled {
            self.metrics_addr()?;
        }
        Ok(())
    }

    pub fn sync_loop_settings(&self) -> SyncLoopSettings {
        SyncLoopSettings {
            max_retries: self.sync.max_retries,
            base_delay: Duration::from_millis(self.sync.base_delay_ms),
            mode: self.sync.mode,
            poll_attempts: self.sync.poll_attempts,
            poll_interval: Duration::from_millis(self.sync.poll_interval_ms),
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.connection_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sync.sweep_interval_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.busy_timeout_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider.timeout_secs)
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.metrics
            .listen
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(self.metrics.listen.clone()))
    }
}
