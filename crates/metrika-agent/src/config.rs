use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Wire used to deliver reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Http,
    Grpc,
}

/// Command-line flags. Every flag can also come from the named environment
/// variable; a flag wins over its variable.
#[derive(Debug, Default, Parser)]
#[command(name = "metrika-agent", about = "Host metric sampler and reporter", version)]
pub struct AgentArgs {
    /// Path to a TOML configuration file.
    #[arg(short = 'c', long, env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// Server address to report to.
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Seconds between samples.
    #[arg(short = 'p', long, env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Seconds between reports.
    #[arg(short = 'r', long, env = "REPORT_INTERVAL")]
    pub report_interval: Option<u64>,

    /// Concurrent outbound requests.
    #[arg(short = 'l', long, env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    /// HMAC-SHA256 secret shared with the server.
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// PEM file holding the server's RSA public key.
    #[arg(long, env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    #[arg(short = 't', long, env = "TRANSPORT", value_enum)]
    pub transport: Option<TransportKind>,

    /// Only accept whitelisted metric names into the cache.
    #[arg(long, env = "RESTRICTED")]
    pub restricted: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub restricted: bool,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    1
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            poll_interval: default_poll_interval(),
            report_interval: default_report_interval(),
            rate_limit: default_rate_limit(),
            key: String::new(),
            crypto_key: None,
            transport: TransportKind::default(),
            restricted: false,
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Self =
            toml::from_str(&content).with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// Layers flags and environment over the optional config file over
    /// defaults, then validates the result.
    pub fn from_args(args: AgentArgs) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(v) = args.address.filter(|s| !s.trim().is_empty()) {
            config.address = v;
        }
        if let Some(v) = args.poll_interval {
            config.poll_interval = v;
        }
        if let Some(v) = args.report_interval {
            config.report_interval = v;
        }
        if let Some(v) = args.rate_limit {
            config.rate_limit = v;
        }
        if let Some(v) = args.key.filter(|s| !s.is_empty()) {
            config.key = v;
        }
        if let Some(v) = args.crypto_key.filter(|p| !p.as_os_str().is_empty()) {
            config.crypto_key = Some(v);
        }
        if let Some(v) = args.transport {
            config.transport = v;
        }
        if let Some(v) = args.restricted {
            config.restricted = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval == 0 {
            bail!("poll interval must be positive");
        }
        if self.report_interval == 0 {
            bail!("report interval must be positive");
        }
        if self.rate_limit == 0 {
            bail!("rate limit must be positive");
        }
        Ok(())
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn report_period(&self) -> Duration {
        Duration::from_secs(self.report_interval)
    }

    /// Server base URL; a bare `host:port` gets an `http://` scheme.
    pub fn endpoint(&self) -> String {
        let addr = self.address.trim().trim_end_matches('/');
        if addr.contains("://") {
            return addr.to_string();
        }
        format!("http://{addr}")
    }
}
