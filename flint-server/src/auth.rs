//! Bearer-token authentication.
//!
//! A single long-lived token protects every mutating endpoint (and the
//! serial-console ticket endpoint, since it hands the token out). The token
//! is 32 random bytes, hex-encoded.

use axum::{
    body::Body,
    extract::State,
    http::{header, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::http::AppState;

/// Generate a fresh API token: 32 random bytes, hex-encoded (64 chars).
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    hex::encode(bytes)
}

/// Validate token shape: exactly 64 hex characters, any case.
pub fn validate_token(token: &str) -> bool {
    token.len() == 64 && token.chars().all(|c| c.is_ascii_hexdigit())
}

/// Whether a request must present the bearer token.
pub fn requires_auth(method: &Method, path: &str) -> bool {
    if matches!(*method, Method::POST | Method::PUT | Method::DELETE) {
        return true;
    }
    // The ticket endpoint returns the token and is itself protected. The
    // `/ws` suffix variant authenticates via query parameter instead.
    path.ends_with("/serial-console")
}

/// Axum middleware enforcing the bearer token on mutating requests.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !requires_auth(request.method(), request.uri().path()) {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == state.token => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "unauthorized",
                "message": "missing or invalid bearer token",
            })),
        )
            .into_response(),
    }
}
