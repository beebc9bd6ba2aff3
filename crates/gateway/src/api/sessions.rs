//! Session endpoints: connect, pairing image, status, send, delete.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;

use wg_domain::identity::normalize;

use crate::state::AppState;
use crate::supervisor::{ConnectOutcome, SupervisorError};

/// Map a supervisor failure onto a status code and JSON body.
fn error_response(e: SupervisorError) -> Response {
    let status = match &e {
        SupervisorError::InvalidIdentity(_) => StatusCode::BAD_REQUEST,
        SupervisorError::NotConnected(_) => StatusCode::NOT_FOUND,
        SupervisorError::EngineInit(_) | SupervisorError::Send(_) => StatusCode::BAD_GATEWAY,
        SupervisorError::Ended(_) => StatusCode::CONFLICT,
        SupervisorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::warn!(error = %e, "session request failed");
    }
    // Rejected input reads like the other 400s; failures carry `error`.
    let key = if status == StatusCode::BAD_REQUEST {
        "message"
    } else {
        "error"
    };
    (status, Json(json!({ "success": false, key: e.to_string() }))).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /connect
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ConnectBody {
    #[serde(default)]
    pub number: Option<String>,
}

/// Start pairing (or resume) a number.  Answers with the first pairing
/// artifact, or a status message when none is due.
pub async fn connect(
    State(state): State<AppState>,
    body: Option<Json<ConnectBody>>,
) -> Response {
    let Some(raw) = body
        .and_then(|Json(b)| b.number)
        .filter(|n| !n.trim().is_empty())
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": "Number required" })),
        )
            .into_response();
    };

    let outcome = match state.supervisor.connect(&raw).await {
        Ok(outcome) => outcome,
        Err(e) => return error_response(e),
    };
    let number = normalize(&raw);

    match outcome {
        ConnectOutcome::Pairing(payload) | ConnectOutcome::InProgress(Some(payload)) => {
            Json(payload).into_response()
        }
        ConnectOutcome::AlreadyConnected => Json(json!({
            "success": true,
            "message": "Already connected",
            "number": number,
            "connected": true,
        }))
        .into_response(),
        ConnectOutcome::Connected => Json(json!({
            "success": true,
            "message": "Connected",
            "number": number,
            "connected": true,
        }))
        .into_response(),
        ConnectOutcome::InProgress(None) => Json(json!({
            "success": true,
            "message": "Connection already in progress",
            "number": number,
            "connected": false,
        }))
        .into_response(),
        ConnectOutcome::Pending => Json(json!({
            "success": true,
            "message": "Connecting, check /status for progress",
            "number": number,
            "connected": false,
        }))
        .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /qr/:number
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn qr_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "QR not found" })),
    )
        .into_response()
}

/// The rendered QR, served only while its artifact is still pending.
pub async fn qr_image(State(state): State<AppState>, Path(number): Path<String>) -> Response {
    let Ok(identity) = state.supervisor.parse_identity(&number) else {
        return qr_not_found();
    };
    let Some(artifact) = state.supervisor.pending_artifact(&identity) else {
        return qr_not_found();
    };
    if artifact.image_path.is_none() {
        return qr_not_found();
    }

    match state.pairing.read_image(&identity).await {
        Ok(Some(png)) => (
            [
                (header::CONTENT_TYPE, "image/png"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            png,
        )
            .into_response(),
        Ok(None) => qr_not_found(),
        Err(e) => {
            tracing::warn!(identity = %identity, error = %e, "failed to read pairing image");
            qr_not_found()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /status/:number, GET /active
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn status(State(state): State<AppState>, Path(number): Path<String>) -> Response {
    match state.supervisor.status(&number) {
        Ok(status) => Json(status).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn active(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.supervisor.active())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /send
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SendBody {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Recipient; defaults to the sender's own chat.
    #[serde(default)]
    pub to: Option<String>,
}

pub async fn send(State(state): State<AppState>, body: Option<Json<SendBody>>) -> Response {
    let Some(Json(body)) = body else {
        return missing_send_fields();
    };
    let (Some(number), Some(message)) = (
        body.number.filter(|n| !n.trim().is_empty()),
        body.message.filter(|m| !m.is_empty()),
    ) else {
        return missing_send_fields();
    };

    match state
        .supervisor
        .send_text(&number, body.to.as_deref(), &message)
        .await
    {
        Ok(()) => Json(json!({ "success": true, "message": "Message sent" })).into_response(),
        Err(SupervisorError::NotConnected(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "Not connected" })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

fn missing_send_fields() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": "number and message required" })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /session/:number, GET /directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Log out and forget a number.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> Response {
    match state.supervisor.disconnect_and_forget(&number).await {
        Ok(true) => Json(json!({
            "success": true,
            "message": "Session deleted",
            "number": normalize(&number),
        }))
        .into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": "Session not found" })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Every number that ever completed a handshake, in first-seen order.
pub async fn directory(State(state): State<AppState>) -> impl IntoResponse {
    let numbers = state.directory.list().await;
    Json(json!({
        "count": numbers.len(),
        "numbers": numbers,
        "admins": state.admins.len(),
    }))
}
