pub mod auth;
pub mod health;
pub mod sessions;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;

use crate::state::AppState;

/// Prefix under which the session routes are also mounted.
pub const API_PREFIX: &str = "/api/whatsapp";

/// Build the full API router.
///
/// Session routes are mounted both at the root and under [`API_PREFIX`].
/// Reads a pairing page needs without a token (`/qr`, `/status`) are
/// public; everything that opens, drives or deletes a session is gated
/// behind the bearer-token middleware.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/qr/:number", get(sessions::qr_image))
        .route("/status/:number", get(sessions::status));

    let protected = Router::new()
        .route("/connect", post(sessions::connect))
        .route("/active", get(sessions::active))
        .route("/send", post(sessions::send))
        .route("/session/:number", delete(sessions::delete_session))
        .route("/directory", get(sessions::directory))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    let session_routes = public.merge(protected);

    Router::new()
        .route("/api/status", get(health::status))
        .merge(session_routes.clone())
        .nest(API_PREFIX, session_routes)
}
