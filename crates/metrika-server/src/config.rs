use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line flags. Every flag can also come from the named environment
/// variable; a flag wins over its variable.
#[derive(Debug, Default, Parser)]
#[command(name = "metrika-server", about = "Metric ingest and query server", version)]
pub struct ServerArgs {
    /// Path to a TOML configuration file.
    #[arg(short = 'c', long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listen address.
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// gRPC listen address.
    #[arg(short = 'g', long, env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Snapshot period in seconds; 0 saves after every write.
    #[arg(short = 'i', long, env = "STORE_INTERVAL")]
    pub store_interval: Option<u64>,

    /// Snapshot file for the memory backend.
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<PathBuf>,

    /// Load the snapshot file on start.
    #[arg(short = 'r', long, env = "RESTORE")]
    pub restore: Option<bool>,

    /// Database DSN; empty selects the memory backend.
    #[arg(short = 'd', long, env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// HMAC-SHA256 secret shared with agents.
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// PEM file holding the RSA private key.
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// CIDR allowed to report, matched against X-Real-IP.
    #[arg(short = 't', long, env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_grpc_address")]
    pub grpc_address: String,
    /// Seconds between snapshots. 0 means save synchronously after each write.
    #[serde(default = "default_store_interval")]
    pub store_interval: u64,
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: PathBuf,
    #[serde(default = "default_restore")]
    pub restore: bool,
    #[serde(default)]
    pub database_dsn: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default)]
    pub trusted_subnet: String,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_grpc_address() -> String {
    "localhost:3200".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_file_storage_path() -> PathBuf {
    PathBuf::from("/tmp/metrics-db.json")
}

fn default_restore() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            grpc_address: default_grpc_address(),
            store_interval: default_store_interval(),
            file_storage_path: default_file_storage_path(),
            restore: default_restore(),
            database_dsn: String::new(),
            key: String::new(),
            crypto_key: None,
            trusted_subnet: String::new(),
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// Layers flags and environment over the optional config file over defaults.
    pub fn from_args(args: ServerArgs) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(v) = non_empty(args.address) {
            config.address = v;
        }
        if let Some(v) = non_empty(args.grpc_address) {
            config.grpc_address = v;
        }
        if let Some(v) = args.store_interval {
            config.store_interval = v;
        }
        if let Some(v) = args.file_storage_path {
            config.file_storage_path = v;
        }
        if let Some(v) = args.restore {
            config.restore = v;
        }
        if let Some(v) = non_empty(args.database_dsn) {
            config.database_dsn = v;
        }
        if let Some(v) = non_empty(args.key) {
            config.key = v;
        }
        if let Some(v) = args.crypto_key.filter(|p| !p.as_os_str().is_empty()) {
            config.crypto_key = Some(v);
        }
        if let Some(v) = non_empty(args.trusted_subnet) {
            config.trusted_subnet = v;
        }
        Ok(config)
    }

    pub fn uses_database(&self) -> bool {
        !self.database_dsn.trim().is_empty()
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        if self.file_storage_path.as_os_str().is_empty() {
            None
        } else {
            Some(&self.file_storage_path)
        }
    }

    /// `None` when snapshots are written synchronously.
    pub fn store_period(&self) -> Option<Duration> {
        (self.store_interval > 0).then(|| Duration::from_secs(self.store_interval))
    }
}
