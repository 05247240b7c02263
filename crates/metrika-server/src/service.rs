use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metrika_common::{Backoff, Metric, MetricEnvelope, MetricError, MetricKind, MetricQuery};
use metrika_storage::{MetricStore, StorageError};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Rejected input on a write.
    #[error(transparent)]
    Invalid(#[from] MetricError),

    #[error("{0}")]
    BadRequest(String),

    /// Unknown type or name on a read.
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(StorageError),

    #[error("unsuccessful request processing: {0}")]
    UnsuccessRequestProcessing(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => ServiceError::NotFound(err.to_string()),
            StorageError::Metric(e) => ServiceError::Invalid(e),
            other => ServiceError::Storage(other),
        }
    }
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Invalid(_) | ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Storage(_) | ServiceError::UnsuccessRequestProcessing(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        (status, self.to_string()).into_response()
    }
}

impl From<ServiceError> for tonic::Status {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Invalid(_) | ServiceError::BadRequest(_) => {
                tonic::Status::invalid_argument(err.to_string())
            }
            ServiceError::NotFound(_) => tonic::Status::not_found(err.to_string()),
            ServiceError::Storage(_) | ServiceError::UnsuccessRequestProcessing(_) => {
                tracing::error!(error = %err, "RPC failed");
                tonic::Status::internal(err.to_string())
            }
        }
    }
}

/// Ingest and query operations shared by the HTTP and RPC front ends.
///
/// Storage calls are retried on transient errors. When `sync_snapshot` is set
/// every successful write is followed by a snapshot before returning.
pub struct MetricsService {
    store: Arc<dyn MetricStore>,
    backoff: Backoff,
    sync_snapshot: Option<PathBuf>,
}

impl MetricsService {
    pub fn new(store: Arc<dyn MetricStore>, backoff: Backoff, sync_snapshot: Option<PathBuf>) -> Self {
        Self {
            store,
            backoff,
            sync_snapshot,
        }
    }

    async fn after_write(&self) -> Result<(), ServiceError> {
        if let Some(path) = &self.sync_snapshot {
            self.backoff
                .retry(None, || self.store.save(path))
                .await?;
        }
        Ok(())
    }

    pub async fn update_one(&self, envelope: &MetricEnvelope) -> Result<MetricEnvelope, ServiceError> {
        let metric = Metric::try_from(envelope)?;
        let stored = self
            .backoff
            .retry(None, || self.store.update_metric(&metric))
            .await?;
        self.after_write().await?;
        Ok(MetricEnvelope::from(stored))
    }

    /// Rejects the whole batch if any element is invalid, before any write.
    pub async fn update_batch(&self, envelopes: &[MetricEnvelope]) -> Result<(), ServiceError> {
        let metrics = envelopes
            .iter()
            .map(Metric::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if metrics.is_empty() {
            return Ok(());
        }
        self.backoff
            .retry(None, || self.store.update_batch(&metrics))
            .await?;
        self.after_write().await?;
        Ok(())
    }

    /// Path form of a write: `/update/{kind}/{name}/{value}`.
    pub async fn update_raw(&self, kind: &str, name: &str, raw: &str) -> Result<(), ServiceError> {
        let kind: MetricKind = kind.parse()?;
        if name.is_empty() {
            return Err(MetricError::InvalidMetricName(String::new()).into());
        }
        let metric = Metric {
            name: name.to_string(),
            value: metrika_common::MetricValue::parse(kind, name, raw)?,
        };
        self.backoff
            .retry(None, || self.store.update_metric(&metric))
            .await?;
        self.after_write().await
    }

    pub async fn get_one(&self, query: &MetricQuery) -> Result<Metric, ServiceError> {
        let kind: MetricKind = query
            .kind
            .parse()
            .map_err(|e: MetricError| ServiceError::NotFound(e.to_string()))?;
        let metric = self
            .backoff
            .retry(None, || self.store.get_metric(kind, &query.name))
            .await?;
        Ok(metric)
    }

    /// Sorted, de-duplicated names of every stored metric.
    pub async fn names(&self) -> Result<Vec<String>, ServiceError> {
        let metrics = self.backoff.retry(None, || self.store.get_metrics()).await?;
        let names: BTreeSet<String> = metrics.into_iter().map(|m| m.name).collect();
        Ok(names.into_iter().collect())
    }

    /// [`names`](Self::names) joined by `",\n"`, as served on the index page.
    pub async fn get_all(&self) -> Result<String, ServiceError> {
        Ok(self.names().await?.join(",\n"))
    }

    pub async fn ping(&self) -> Result<(), ServiceError> {
        self.backoff.retry(None, || self.store.ping()).await?;
        Ok(())
    }
}
