//! Bearer-token gate for the session-control routes.
//!
//! The token named by `server.api_token_env` is read once at startup and
//! only its SHA-256 digest is kept.  With no token configured every request
//! passes (dev mode); otherwise `Authorization: Bearer <token>` is required.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_token_hash.as_deref() else {
        return next.run(req).await;
    };

    if !token_matches(req.headers(), expected) {
        tracing::debug!(path = %req.uri().path(), "rejected request without valid API token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "success": false,
                "error": "invalid or missing API token",
            })),
        )
            .into_response();
    }

    next.run(req).await
}

/// Compare digests so the check neither short-circuits nor leaks the
/// token length.
fn token_matches(headers: &HeaderMap, expected_hash: &[u8]) -> bool {
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    let provided_hash = Sha256::digest(provided.as_bytes());
    bool::from(provided_hash.as_slice().ct_eq(expected_hash))
}
