use crate::state::Envelope;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use metrika_transport::{EnvelopeError, Parcel};
use std::sync::Arc;

/// Largest request body accepted before the envelope is opened.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// How rejections are written back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Plain status code with a text body.
    Http,
    /// Trailers-only gRPC status.
    Rpc,
}

#[derive(Clone)]
pub struct EnvelopeContext {
    pub envelope: Arc<Envelope>,
    pub framing: Framing,
}

/// Trailers-only gRPC response carrying `code`.
fn grpc_status(code: tonic::Code, message: String) -> Response {
    tonic::Status::new(code, message).into_http::<Body>()
}

fn rejection(framing: Framing, status: StatusCode, code: tonic::Code, message: String) -> Response {
    match framing {
        Framing::Http => (status, message).into_response(),
        Framing::Rpc => grpc_status(code, message),
    }
}

fn reject(framing: Framing, err: &EnvelopeError) -> Response {
    let (status, code) = match err {
        EnvelopeError::UntrustedSubnet(_) => (StatusCode::FORBIDDEN, tonic::Code::Unauthenticated),
        EnvelopeError::UnsignedRequest
        | EnvelopeError::Decrypt(_)
        | EnvelopeError::Decompress(_) => (StatusCode::BAD_REQUEST, tonic::Code::InvalidArgument),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, tonic::Code::Internal),
    };
    rejection(framing, status, code, err.to_string())
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|enc| enc.trim().split(';').next() == Some("gzip"))
}

/// Rejects callers whose `X-Real-IP` falls outside the trusted subnet.
pub async fn trusted_subnet(
    State(ctx): State<EnvelopeContext>,
    req: Request,
    next: Next,
) -> Response {
    if let Err(err) = ctx.envelope.subnet.admit(req.headers()) {
        tracing::warn!(
            path = %req.uri().path(),
            error = %err,
            "Request rejected by trusted subnet"
        );
        return reject(ctx.framing, &err);
    }
    next.run(req).await
}

/// Opens the request envelope (decompress, decrypt, verify) before the
/// handler runs. HTTP responses are signed and, when accepted, gzipped.
pub async fn envelope(State(ctx): State<EnvelopeContext>, req: Request, next: Next) -> Response {
    let gzip = ctx.framing == Framing::Http && accepts_gzip(req.headers());

    let (mut parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read request body");
            return rejection(
                ctx.framing,
                StatusCode::BAD_REQUEST,
                tonic::Code::InvalidArgument,
                format!("failed to read body: {e}"),
            );
        }
    };

    let mut parcel = Parcel::new(std::mem::take(&mut parts.headers), bytes);
    if let Err(err) = ctx.envelope.inbound.open(&mut parcel) {
        tracing::warn!(path = %parts.uri.path(), error = %err, "Rejected request envelope");
        return reject(ctx.framing, &err);
    }
    parts.headers = parcel.headers;

    let response = next
        .run(Request::from_parts(parts, Body::from(parcel.body)))
        .await;

    match ctx.framing {
        // gRPC responses carry trailers and stay untouched.
        Framing::Rpc => response,
        Framing::Http => seal_response(&ctx.envelope, gzip, response).await,
    }
}

async fn seal_response(envelope: &Envelope, gzip: bool, response: Response) -> Response {
    if !gzip && !envelope.signs_responses() {
        return response;
    }
    let pipeline = if gzip {
        &envelope.outbound_gzip
    } else {
        &envelope.outbound
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut parcel = Parcel::new(std::mem::take(&mut parts.headers), bytes);
    if let Err(err) = pipeline.seal(&mut parcel) {
        tracing::error!(error = %err, "Failed to seal response");
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }
    parts.headers = parcel.headers;
    Response::from_parts(parts, Body::from(parcel.body))
}
