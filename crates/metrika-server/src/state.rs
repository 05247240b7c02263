use crate::config::ServerConfig;
use crate::service::MetricsService;
use anyhow::Context;
use metrika_common::Backoff;
use metrika_storage::MetricStore;
use metrika_transport::{keys, Compress, Encrypt, Pipeline, RsaPrivateKey, Sign, TrustedSubnet};
use std::sync::Arc;

/// Transforms wrapped around every request and response.
///
/// `inbound` is opened on request bodies. Responses are sealed with
/// `outbound`, or `outbound_gzip` when the caller accepts gzip.
pub struct Envelope {
    pub inbound: Pipeline,
    pub outbound: Pipeline,
    pub outbound_gzip: Pipeline,
    pub subnet: TrustedSubnet,
    signing: bool,
}

impl Envelope {
    pub fn new(key: &str, private_key: Option<RsaPrivateKey>, subnet: TrustedSubnet) -> Self {
        let mut inbound = Pipeline::new().with(Sign::new(key));
        if let Some(private) = private_key {
            inbound = inbound.with(Encrypt::receiver(private));
        }
        let inbound = inbound.with(Compress);

        Self {
            inbound,
            outbound: Pipeline::new().with(Sign::new(key)),
            outbound_gzip: Pipeline::new().with(Sign::new(key)).with(Compress),
            subnet,
            signing: !key.is_empty(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let private_key = match &config.crypto_key {
            Some(path) => Some(
                keys::load_private_key(path)
                    .with_context(|| format!("load private key {}", path.display()))?,
            ),
            None => None,
        };
        let subnet =
            TrustedSubnet::parse(&config.trusted_subnet).context("parse trusted subnet")?;

        let envelope = Self::new(&config.key, private_key, subnet);
        tracing::info!(
            inbound = ?envelope.inbound,
            signing = envelope.signing,
            trusted_subnet = envelope.subnet.is_enabled(),
            "Configured request envelope"
        );
        Ok(envelope)
    }

    /// Whether response bodies get a `HashSHA256` header.
    pub fn signs_responses(&self) -> bool {
        self.signing
    }
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MetricsService>,
    pub envelope: Arc<Envelope>,
}

impl AppState {
    /// Wires the service over `store`. Memory stores with a zero store
    /// interval snapshot synchronously after every write.
    pub fn new(config: &ServerConfig, store: Arc<dyn MetricStore>, envelope: Envelope) -> Self {
        let sync_snapshot = if config.uses_database() || config.store_period().is_some() {
            None
        } else {
            config.snapshot_path().map(|p| p.to_path_buf())
        };
        Self {
            service: Arc::new(MetricsService::new(store, Backoff::default(), sync_snapshot)),
            envelope: Arc::new(envelope),
        }
    }
}
