//! Protocol engine boundary.
//!
//! The chat-network protocol (noise handshake, signal sessions, media) lives
//! outside this process.  The gateway only sees an [`EngineSession`] handle
//! for outbound actions and an ordered [`EngineEvent`] stream per open
//! session.  [`bridge::BridgeEngine`] speaks to an external engine process
//! over WebSocket; tests substitute a scripted engine.

pub mod bridge;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use wg_domain::Identity;
use wg_protocol::{status, InboundMessage};
use wg_sessions::{CredentialRecord, PairingChallenge};

/// Everything the engine needs to open (or resume) one identity.
pub struct OpenRequest<'a> {
    pub identity: &'a Identity,
    pub session_dir: &'a Path,
    pub credentials: &'a CredentialRecord,
}

/// A freshly opened engine session.
pub struct EngineLink {
    pub session: Arc<dyn EngineSession>,
    /// Closes when the underlying transport goes away.
    pub events: mpsc::Receiver<EngineEvent>,
}

/// Factory for engine sessions.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    async fn open(&self, request: OpenRequest<'_>) -> Result<EngineLink, EngineError>;
}

/// Outbound actions on an open engine session.
#[async_trait]
pub trait EngineSession: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> Result<(), EngineError>;

    /// Ask for a phone-number linking code instead of waiting for a QR.
    async fn request_pairing_code(&self, phone: &str) -> Result<String, EngineError>;

    /// Unlink the device from the account.
    async fn logout(&self) -> Result<(), EngineError>;

    /// Drop the transport without unlinking.  Idempotent.
    async fn close(&self);
}

/// Lifecycle events, delivered in order per session.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    PairingChallenge(PairingChallenge),
    CredentialsUpdated {
        material: serde_json::Value,
        registered: bool,
    },
    Connected,
    Message(InboundMessage),
    Disconnected(DisconnectReason),
}

/// Why an engine session went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The account unlinked this device.  Credentials are dead.
    LoggedOut,
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    RestartRequired,
    BadSession,
    /// The event stream ended without a close notice.
    StreamEnded,
    /// The engine could not be (re)opened.
    Unavailable(String),
    Other {
        status_code: Option<u16>,
        reason: Option<String>,
    },
}

impl DisconnectReason {
    pub fn from_status(status_code: Option<u16>, reason: Option<String>) -> Self {
        match status_code {
            Some(status::LOGGED_OUT) => Self::LoggedOut,
            Some(status::CONNECTION_CLOSED) => Self::ConnectionClosed,
            Some(status::CONNECTION_LOST) => Self::ConnectionLost,
            Some(status::CONNECTION_REPLACED) => Self::ConnectionReplaced,
            Some(status::RESTART_REQUIRED) => Self::RestartRequired,
            Some(status::BAD_SESSION) => Self::BadSession,
            _ => Self::Other {
                status_code,
                reason,
            },
        }
    }

    /// Only an explicit logout ends a session for good; everything else is
    /// retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoggedOut => f.write_str("logged out"),
            Self::ConnectionClosed => f.write_str("connection closed"),
            Self::ConnectionLost => f.write_str("connection lost"),
            Self::ConnectionReplaced => f.write_str("connection replaced"),
            Self::RestartRequired => f.write_str("restart required"),
            Self::BadSession => f.write_str("bad session"),
            Self::StreamEnded => f.write_str("event stream ended"),
            Self::Unavailable(e) => write!(f, "engine unavailable: {e}"),
            Self::Other {
                status_code,
                reason,
            } => {
                let code = status_code.map(|c| c.to_string());
                write!(
                    f,
                    "closed (status {}, {})",
                    code.as_deref().unwrap_or("none"),
                    reason.as_deref().unwrap_or("no reason")
                )
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("engine rejected request: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("engine session closed")]
    Closed,
}
