use crate::service::ServiceError;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrika_common::{MetricEnvelope, MetricQuery};
use serde::de::DeserializeOwned;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_metrics))
        .route("/ping", get(ping))
        .route("/update/", post(update_json))
        .route("/updates/", post(update_batch))
        .route("/update/{kind}/{name}/{value}", post(update_path))
        .route("/value/", post(value_json))
        .route("/value/{kind}/{name}", get(value_path))
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ServiceError> {
    serde_json::from_slice(body).map_err(|e| ServiceError::BadRequest(format!("invalid JSON: {e}")))
}

async fn list_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ServiceError> {
    let names = state.service.get_all().await?;
    Ok(([(header::CONTENT_TYPE, "text/html; charset=utf-8")], names))
}

async fn ping(State(state): State<AppState>) -> Result<StatusCode, ServiceError> {
    state.service.ping().await?;
    Ok(StatusCode::OK)
}

async fn update_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MetricEnvelope>, ServiceError> {
    let envelope: MetricEnvelope = parse_json(&body)?;
    let stored = state.service.update_one(&envelope).await?;
    Ok(Json(stored))
}

async fn update_batch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ServiceError> {
    let envelopes: Vec<MetricEnvelope> = parse_json(&body)?;
    state.service.update_batch(&envelopes).await?;
    tracing::debug!(count = envelopes.len(), "Applied metric batch");
    Ok(StatusCode::OK)
}

async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<StatusCode, ServiceError> {
    state.service.update_raw(&kind, &name, &value).await?;
    Ok(StatusCode::OK)
}

async fn value_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<MetricEnvelope>, ServiceError> {
    let query: MetricQuery = parse_json(&body)?;
    let metric = state.service.get_one(&query).await?;
    Ok(Json(MetricEnvelope::from(metric)))
}

async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<impl IntoResponse, ServiceError> {
    let metric = state.service.get_one(&MetricQuery { name, kind }).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        metric.value.to_string(),
    ))
}
