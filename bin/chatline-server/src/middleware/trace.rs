use axum::{
    body::{Body, Bytes, HttpBody},
    extract::Request,
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use http_body_util::BodyExt;
use std::time::Instant;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

pub static X_TRACE_ID: &str = "x-trace-id";

/// Bodies larger than this are never buffered for logging.
const MAX_LOGGED_BODY: u64 = 1024;

/// Bodies under these prefixes carry credentials, tokens or conversation
/// text and are never logged.
const REDACTED_PREFIXES: &[&str] = &["/auth", "/chat"];

/// Per-request span, `x-trace-id` propagation and start/finish logging.
///
/// Small JSON bodies are logged outside [`REDACTED_PREFIXES`].  Streaming responses pass through untouched,
/// since buffering them would hold back every fragment until the turn ends.
pub async fn trace_middleware(req: Request<Body>, next: Next) -> Response {
    let start_time = Instant::now();

    let trace_id = req
        .headers()
        .get(X_TRACE_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let trace_header = HeaderValue::from_str(&trace_id.to_string()).ok();

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %method,
        path = %path,
    );

    async move {
        info!("→ request started");
        let redacted = REDACTED_PREFIXES.iter().any(|p| path.starts_with(p));

        let (parts, body) = req.into_parts();
        let body = if !redacted && loggable(&parts.headers, &body) {
            Body::from(buffer_and_log("request", body).await)
        } else {
            body
        };
        let mut req = Request::from_parts(parts, body);
        if let Some(value) = &trace_header {
            req.headers_mut().insert(X_TRACE_ID, value.clone());
        }

        let response = next.run(req).await;

        let (parts, body) = response.into_parts();
        let body = if !redacted && loggable(&parts.headers, &body) {
            Body::from(buffer_and_log("response", body).await)
        } else {
            body
        };
        let mut response = Response::from_parts(parts, body);
        if let Some(value) = trace_header {
            response.headers_mut().insert(X_TRACE_ID, value);
        }

        info!(
            status = response.status().as_u16(),
            latency_ms = start_time.elapsed().as_millis(),
            "← response finished"
        );

        response
    }
    .instrument(span)
    .await
}

/// JSON with a known, small length.  Streams never have an exact size.
fn loggable(headers: &HeaderMap, body: &Body) -> bool {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));
    is_json
        && body
            .size_hint()
            .exact()
            .is_some_and(|len| len > 0 && len <= MAX_LOGGED_BODY)
}

async fn buffer_and_log(direction: &str, body: Body) -> Bytes {
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return Bytes::new(),
    };
    if let Ok(text) = std::str::from_utf8(&bytes) {
        info!("{} body: {}", direction, text);
    }
    bytes
}
