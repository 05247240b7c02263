//! Delivery of metric batches to the server.
//!
//! Both wires seal the encoded batch with the same [`Pipeline`] the server
//! opens: sign, then encrypt, then compress.

pub mod grpc;
pub mod http;

use crate::config::{AgentConfig, TransportKind};
use anyhow::Context;
use async_trait::async_trait;
use metrika_common::{Metric, Transient};
use metrika_transport::{keys, Compress, Encrypt, Pipeline, RsaPublicKey, Sign};
use std::net::{IpAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on a single outbound call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// The server refused the batch; sending it again will not help.
    #[error("batch rejected: {0}")]
    Rejected(String),

    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("encode batch: {0}")]
    Encode(String),
}

impl Transient for ReportError {
    fn is_transient(&self) -> bool {
        matches!(self, ReportError::Transient(_))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send_batch(&self, metrics: &[Metric]) -> Result<(), ReportError>;
}

/// Sender half of the envelope.
pub fn sender_pipeline(key: &str, public_key: Option<RsaPublicKey>) -> Pipeline {
    let mut pipeline = Pipeline::new().with(Sign::new(key));
    if let Some(public_key) = public_key {
        pipeline = pipeline.with(Encrypt::sender(public_key));
    }
    pipeline.with(Compress)
}

/// Local address the OS would use to reach `target` (`host:port`).
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn local_ip(target: &str) -> Option<IpAddr> {
    let authority = target
        .split_once("://")
        .map_or(target, |(_, rest)| rest)
        .split('/')
        .next()
        .unwrap_or_default();
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(authority).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// Builds the configured transport, loading the public key if one is set.
pub fn build(config: &AgentConfig) -> anyhow::Result<Arc<dyn Transport>> {
    let public_key = config
        .crypto_key
        .as_ref()
        .map(|path| {
            keys::load_public_key(path)
                .with_context(|| format!("load public key {}", path.display()))
        })
        .transpose()?;
    let pipeline = sender_pipeline(&config.key, public_key);
    let endpoint = config.endpoint();
    let real_ip = local_ip(&endpoint);

    tracing::info!(
        transport = ?config.transport,
        endpoint = %endpoint,
        envelope = ?pipeline,
        real_ip = ?real_ip,
        "Transport configured"
    );

    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Http => Arc::new(http::HttpTransport::new(&endpoint, pipeline, real_ip)?),
        TransportKind::Grpc => Arc::new(grpc::GrpcTransport::new(&endpoint, pipeline, real_ip)?),
    };
    Ok(transport)
}
