use super::{ReportError, Transport, REQUEST_TIMEOUT};
use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue};
use metrika_common::{Metric, MetricEnvelope};
use metrika_transport::{Parcel, Pipeline, REAL_IP_HEADER};
use std::net::IpAddr;

/// JSON batches posted to `/updates/`.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    pipeline: Pipeline,
    real_ip: Option<HeaderValue>,
}

impl HttpTransport {
    pub fn new(endpoint: &str, pipeline: Pipeline, real_ip: Option<IpAddr>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let real_ip = real_ip.and_then(|ip| HeaderValue::from_str(&ip.to_string()).ok());
        Ok(Self {
            client,
            url: format!("{}/updates/", endpoint.trim_end_matches('/')),
            pipeline,
            real_ip,
        })
    }

    fn seal(&self, metrics: &[Metric]) -> Result<Parcel, ReportError> {
        let envelopes: Vec<MetricEnvelope> = metrics.iter().map(MetricEnvelope::from).collect();
        let body = serde_json::to_vec(&envelopes).map_err(|e| ReportError::Encode(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ip) = &self.real_ip {
            headers.insert(REAL_IP_HEADER, ip.clone());
        }
        let mut parcel = Parcel::new(headers, body);
        self.pipeline
            .seal(&mut parcel)
            .map_err(|e| ReportError::Encode(e.to_string()))?;
        Ok(parcel)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send_batch(&self, metrics: &[Metric]) -> Result<(), ReportError> {
        let parcel = self.seal(metrics)?;
        let resp = self
            .client
            .post(&self.url)
            .headers(parcel.headers)
            .body(parcel.body)
            .send()
            .await
            .map_err(|e| ReportError::Transient(e.to_string()))?;

        let status = resp.status();
        // Drain body for connection reuse.
        let body = resp.text().await.unwrap_or_default();

        if status.is_success() {
            return Ok(());
        }
        let detail = format!("{status}: {}", body.trim());
        if status.is_server_error() {
            Err(ReportError::Transient(detail))
        } else {
            Err(ReportError::Rejected(detail))
        }
    }
}
