use crate::grpc::MetricServiceImpl;
use crate::middleware::{EnvelopeContext, Framing};
use crate::state::AppState;
use crate::{api, logging};
use axum::middleware;
use axum::Router;
use metrika_common::proto::metric_service_server::MetricServiceServer;

/// Layers shared by both listeners. Outermost first: subnet admission,
/// envelope (decompress, decrypt, verify), request logging.
fn with_envelope(router: Router, state: &AppState, framing: Framing) -> Router {
    let ctx = EnvelopeContext {
        envelope: state.envelope.clone(),
        framing,
    };
    router
        .layer(middleware::from_fn(logging::request_logging))
        .layer(middleware::from_fn_with_state(
            ctx.clone(),
            crate::middleware::envelope,
        ))
        .layer(middleware::from_fn_with_state(
            ctx,
            crate::middleware::trusted_subnet,
        ))
}

pub fn build_http_app(state: AppState) -> Router {
    let router = api::routes().with_state(state.clone());
    with_envelope(router, &state, Framing::Http)
}

/// The tonic service mounted as an axum router so it shares the HTTP layers.
pub fn build_rpc_app(state: AppState) -> Router {
    let service = MetricServiceServer::new(MetricServiceImpl::new(state.service.clone()));
    let router = tonic::service::Routes::new(service).into_axum_router();
    with_envelope(router, &state, Framing::Rpc)
}
