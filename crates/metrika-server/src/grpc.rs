use crate::service::MetricsService;
use metrika_common::proto::metric_service_server::MetricService;
use metrika_common::proto::{
    GetMetricRequest, GetMetricResponse, GetMetricsRequest, GetMetricsResponse, PingRequest,
    PingResponse, UpdateMetricRequest, UpdateMetricResponse, UpdateMetricsBatchRequest,
    UpdateMetricsBatchResponse,
};
use metrika_common::{MetricEnvelope, MetricQuery};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// RPC front end over the same [`MetricsService`] the HTTP routes use.
pub struct MetricServiceImpl {
    service: Arc<MetricsService>,
}

impl MetricServiceImpl {
    pub fn new(service: Arc<MetricsService>) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl MetricService for MetricServiceImpl {
    async fn update_metric(
        &self,
        request: Request<UpdateMetricRequest>,
    ) -> Result<Response<UpdateMetricResponse>, Status> {
        let metric = request
            .into_inner()
            .metric
            .ok_or_else(|| Status::invalid_argument("metric is required"))?;
        let stored = self
            .service
            .update_one(&MetricEnvelope::from(metric))
            .await?;
        Ok(Response::new(UpdateMetricResponse {
            metric: Some(stored.into()),
        }))
    }

    async fn update_metrics_batch(
        &self,
        request: Request<UpdateMetricsBatchRequest>,
    ) -> Result<Response<UpdateMetricsBatchResponse>, Status> {
        let envelopes: Vec<MetricEnvelope> = request
            .into_inner()
            .metrics
            .into_iter()
            .map(MetricEnvelope::from)
            .collect();
        self.service.update_batch(&envelopes).await?;
        tracing::debug!(count = envelopes.len(), "Applied metric batch over RPC");
        Ok(Response::new(UpdateMetricsBatchResponse {}))
    }

    async fn get_metric(
        &self,
        request: Request<GetMetricRequest>,
    ) -> Result<Response<GetMetricResponse>, Status> {
        let req = request.into_inner();
        let metric = self
            .service
            .get_one(&MetricQuery {
                name: req.id,
                kind: req.r#type,
            })
            .await?;
        Ok(Response::new(GetMetricResponse {
            metric: Some((&metric).into()),
        }))
    }

    async fn get_metrics(
        &self,
        _request: Request<GetMetricsRequest>,
    ) -> Result<Response<GetMetricsResponse>, Status> {
        let names = self.service.names().await?;
        Ok(Response::new(GetMetricsResponse { names }))
    }

    async fn ping(&self, _request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        self.service.ping().await?;
        Ok(Response::new(PingResponse {}))
    }
}
