use super::{ReportError, Transport, REQUEST_TIMEOUT};
use async_trait::async_trait;
use bytes::Bytes;
use http::HeaderValue;
use http_body_util::{BodyExt, Full};
use metrika_common::proto::metric_service_client::MetricServiceClient;
use metrika_common::proto::{MetricProto, UpdateMetricsBatchRequest};
use metrika_common::Metric;
use metrika_transport::{Parcel, Pipeline, REAL_IP_HEADER};
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::Body;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tower::Service;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A [`Channel`] that seals every request body before it goes out.
///
/// The caller's address is attached as `x-real-ip` metadata first, so the
/// server's subnet check sees it.
#[derive(Clone)]
pub struct SealedChannel {
    inner: Channel,
    pipeline: Arc<Pipeline>,
    real_ip: Option<HeaderValue>,
}

impl SealedChannel {
    pub fn new(inner: Channel, pipeline: Arc<Pipeline>, real_ip: Option<HeaderValue>) -> Self {
        Self {
            inner,
            pipeline,
            real_ip,
        }
    }
}

impl Service<http::Request<Body>> for SealedChannel {
    type Response = <Channel as Service<http::Request<Body>>>::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Service::poll_ready(&mut self.inner, cx).map_err(Into::into)
    }

    fn call(&mut self, req: http::Request<Body>) -> Self::Future {
        // Keep the channel that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let pipeline = self.pipeline.clone();
        let real_ip = self.real_ip.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();
            let bytes = body.collect().await?.to_bytes();
            if let Some(ip) = real_ip {
                parts.headers.insert(REAL_IP_HEADER, ip);
            }

            let mut parcel = Parcel::new(std::mem::take(&mut parts.headers), bytes);
            pipeline.seal(&mut parcel)?;
            parts.headers = parcel.headers;

            let req = http::Request::from_parts(parts, Body::new(Full::<Bytes>::new(parcel.body)));
            inner.call(req).await.map_err(Into::into)
        })
    }
}

/// Batches sent through the `UpdateMetricsBatch` RPC.
pub struct GrpcTransport {
    client: MetricServiceClient<SealedChannel>,
}

impl GrpcTransport {
    /// The connection is established on first use, so a server that is not
    /// up yet only fails individual reports.
    pub fn new(endpoint: &str, pipeline: Pipeline, real_ip: Option<IpAddr>) -> anyhow::Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_string())?
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .connect_lazy();
        let real_ip = real_ip.and_then(|ip| HeaderValue::from_str(&ip.to_string()).ok());
        let sealed = SealedChannel::new(channel, Arc::new(pipeline), real_ip);
        Ok(Self {
            client: MetricServiceClient::new(sealed),
        })
    }
}

fn classify(status: tonic::Status) -> ReportError {
    let detail = format!("{:?}: {}", status.code(), status.message());
    match status.code() {
        Code::Unavailable
        | Code::Internal
        | Code::Unknown
        | Code::Cancelled
        | Code::DeadlineExceeded
        | Code::ResourceExhausted => ReportError::Transient(detail),
        _ => ReportError::Rejected(detail),
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn send_batch(&self, metrics: &[Metric]) -> Result<(), ReportError> {
        let request = UpdateMetricsBatchRequest {
            metrics: metrics.iter().map(MetricProto::from).collect(),
        };
        let mut client = self.client.clone();
        client
            .update_metrics_batch(request)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify(tonic::Status::unavailable("down")),
            ReportError::Transient(_)
        ));
        assert!(matches!(
            classify(tonic::Status::invalid_argument("bad")),
            ReportError::Rejected(_)
        ));
        assert!(matches!(
            classify(tonic::Status::unauthenticated("subnet")),
            ReportError::Rejected(_)
        ));
    }
}
