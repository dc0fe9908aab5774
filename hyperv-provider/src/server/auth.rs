//! Shared-secret authentication for the REST surface.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hyperv_api::{API_KEY_HEADER, ApiError};
use tonic::Code;
use tracing::warn;

/// Paths reachable without a key.
const EXEMPT_PATHS: [&str; 1] = ["/healthz"];

/// Reject requests whose `X-Api-Key` does not match the configured key.
pub async fn require_api_key(
    State(api_key): State<Arc<str>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if EXEMPT_PATHS.contains(&path.as_str()) {
        return next.run(request).await;
    }

    let supplied = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if supplied.is_empty() || !supplied.eq_ignore_ascii_case(&api_key) {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.to_string())
            .unwrap_or_default();
        warn!(path = %path, peer = %peer, "Access was denied");

        let body = Json(ApiError::new(Code::PermissionDenied, "Invalid API key"));
        return (StatusCode::FORBIDDEN, body).into_response();
    }

    next.run(request).await
}
