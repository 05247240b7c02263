use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;
use tracing::Instrument;

/// Response header echoing the id assigned to each request.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Maximum number of characters to log from request/response body.
const MAX_BODY_LOG_CHARS: usize = 200;

/// Generate a 16-character hex trace ID (8 random bytes).
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Truncate a UTF-8 string to at most `max` bytes, snapping to the nearest
/// char boundary so we never split a multi-byte character.
fn truncate_body(bytes: &[u8], max: usize) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.len() > max => {
            let mut end = max;
            while end > 0 && !s.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &s[..end])
        }
        Ok(s) => s.to_string(),
        Err(_) => "<non-utf8 body>".to_string(),
    }
}

fn format_elapsed(elapsed_us: u128) -> String {
    if elapsed_us < 1000 {
        format!("{elapsed_us}µs")
    } else if elapsed_us < 1_000_000 {
        format!("{}ms", elapsed_us / 1000)
    } else {
        format!("{:.1}s", elapsed_us as f64 / 1_000_000.0)
    }
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn is_grpc(headers: &HeaderMap) -> bool {
    content_type(headers).starts_with("application/grpc")
}

/// Bodies worth echoing into the log.
fn is_loggable(headers: &HeaderMap) -> bool {
    let ct = content_type(headers);
    ct.starts_with("application/json") || ct.starts_with("text/")
}

/// Request/response logging middleware.
///
/// Every request runs inside a `request` span carrying its trace id, so
/// handler and storage events are correlated. gRPC calls are logged from
/// headers only; their bodies are framed and their responses end in trailers.
pub async fn request_logging(req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    let span = tracing::info_span!("request", trace_id = %trace_id);
    async move {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let rpc = is_grpc(req.headers());

        let (req, req_snippet, size) = if !rpc && is_loggable(req.headers()) {
            let (parts, body) = req.into_parts();
            // The envelope layer has already buffered the body.
            let bytes = axum::body::to_bytes(body, usize::MAX)
                .await
                .unwrap_or_default();
            let snippet = truncate_body(&bytes, MAX_BODY_LOG_CHARS);
            let size = bytes.len();
            (Request::from_parts(parts, Body::from(bytes)), snippet, size)
        } else {
            let size = req
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            (req, String::new(), size)
        };

        if req_snippet.is_empty() {
            tracing::info!(method = %method, path = %uri, size, rpc, "--> request");
        } else {
            tracing::info!(
                method = %method,
                path = %uri,
                size,
                body = %req_snippet,
                "--> request"
            );
        }

        let start = Instant::now();
        let response = next.run(req).await;
        let elapsed = format_elapsed(start.elapsed().as_micros());
        let status = response.status().as_u16();

        let mut response = if rpc {
            let grpc_status = response
                .headers()
                .get("grpc-status")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_string();
            tracing::info!(status, grpc_status = %grpc_status, elapsed = %elapsed, "<-- response");
            response
        } else {
            let (parts, body) = response.into_parts();
            let bytes = axum::body::to_bytes(body, usize::MAX)
                .await
                .unwrap_or_default();
            let snippet = if is_loggable(&parts.headers) {
                truncate_body(&bytes, MAX_BODY_LOG_CHARS)
            } else {
                String::new()
            };
            let size = bytes.len();
            if parts.status.is_server_error() {
                tracing::error!(status, size, elapsed = %elapsed, body = %snippet, "<-- response");
            } else if parts.status.is_client_error() {
                tracing::warn!(status, size, elapsed = %elapsed, body = %snippet, "<-- response");
            } else {
                tracing::info!(status, size, elapsed = %elapsed, "<-- response");
            }
            Response::from_parts(parts, Body::from(bytes))
        };

        if let Ok(val) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert(TRACE_ID_HEADER, val);
        }
        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_is_sixteen_hex_chars() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_body("héllo".as_bytes(), 2), "h...");
        assert_eq!(truncate_body(b"short", 10), "short");
        assert_eq!(truncate_body(&[0xff, 0xfe], 10), "<non-utf8 body>");
    }

    #[test]
    fn elapsed_units() {
        assert_eq!(format_elapsed(999), "999µs");
        assert_eq!(format_elapsed(12_000), "12ms");
        assert_eq!(format_elapsed(1_500_000), "1.5s");
    }
}
