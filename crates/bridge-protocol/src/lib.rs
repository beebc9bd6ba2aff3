//! Bridge protocol: WebSocket frames exchanged between the gateway and the
//! chat-protocol engine process.
//!
//! The gateway opens one socket per identity and sends `open`.  The engine
//! answers with `ready`, then streams lifecycle events (`pairing_qr`,
//! `creds_update`, `connection_open`, `connection_close`, `message`).
//! Gateway requests (`send_text`, `request_pairing_code`, `logout`) carry a
//! `request_id` that the engine echoes in a `response` frame.

use serde::{Deserialize, Serialize};

/// Bumped on any incompatible change to [`BridgeFrame`].
pub const PROTOCOL_VERSION: u32 = 1;

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame {
    // ── Gateway → Engine ────────────────────────────────────────────
    /// Start (or resume) the engine session for one identity.
    Open {
        protocol_version: u32,
        identity: String,
        session_dir: String,
        /// Opaque credential material from the last `creds_update`
        /// (`null` for a fresh identity).
        credentials: serde_json::Value,
        registered: bool,
    },

    SendText {
        request_id: String,
        to: String,
        text: String,
    },

    /// Ask for a short linking code instead of a QR payload.
    RequestPairingCode {
        request_id: String,
        phone: String,
    },

    /// Invalidate the session server-side (unlink the device).
    Logout { request_id: String },

    /// Close the engine session without logging out.
    Close,

    // ── Engine → Gateway ────────────────────────────────────────────
    /// `open` accepted.
    Ready { engine_version: String },

    /// A fresh QR payload; replaces any earlier one.
    PairingQr { qr: String },

    /// Credential rotation; must be persisted before the next `open`.
    CredsUpdate {
        credentials: serde_json::Value,
        #[serde(default)]
        registered: bool,
    },

    /// Handshake completed; the session is live.
    ConnectionOpen {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_jid: Option<String>,
    },

    /// The engine connection dropped.
    ConnectionClose {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// An inbound chat message.
    Message { message: InboundMessage },

    /// Answer to a gateway request.
    Response {
        request_id: String,
        success: bool,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // ── Bidirectional ───────────────────────────────────────────────
    Ping { timestamp: i64 },
    Pong { timestamp: i64 },
}

/// Close status codes reported in `connection_close`.
pub mod status {
    pub const CONNECTION_CLOSED: u16 = 428;
    pub const CONNECTION_LOST: u16 = 408;
    pub const CONNECTION_REPLACED: u16 = 440;
    pub const LOGGED_OUT: u16 = 401;
    pub const BAD_SESSION: u16 = 500;
    pub const RESTART_REQUIRED: u16 = 515;
}

/// An inbound message as delivered by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMessage {
    pub key: MessageKey,
    /// `None` for protocol/stub messages with no user content.
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    /// Unix seconds as reported by the sender's device.
    #[serde(default)]
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageKey {
    /// Chat the message belongs to (a user or a group address).
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
    /// Author inside a group chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
    #[serde(default)]
    pub id: String,
}

/// The text-bearing content shapes the gateway understands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContent {
    /// Plain text message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    /// Text with a quote, link preview or mention context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text: Option<ExtendedText>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageKey {
    /// Whether the chat is a group (`...@g.us`).
    pub fn is_group(&self) -> bool {
        self.remote_jid.ends_with("@g.us")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_snake_case_tagged() {
        let json = serde_json::to_value(BridgeFrame::Logout {
            request_id: "r1".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "logout");
        assert_eq!(json["request_id"], "r1");
    }

    #[test]
    fn connection_close_fields_are_optional() {
        let frame: BridgeFrame = serde_json::from_str(r#"{"type":"connection_close"}"#).unwrap();
        match frame {
            BridgeFrame::ConnectionClose { status_code, reason } => {
                assert!(status_code.is_none());
                assert!(reason.is_none());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn message_frame_parses_extended_text() {
        let raw = r#"{
            "type": "message",
            "message": {
                "key": {"remote_jid": "123@g.us", "participant": "9471@s.whatsapp.net"},
                "content": {"extended_text": {"text": ".ping"}}
            }
        }"#;
        let frame: BridgeFrame = serde_json::from_str(raw).unwrap();
        let BridgeFrame::Message { message } = frame else {
            panic!("expected message frame");
        };
        assert!(message.key.is_group());
        assert!(!message.key.from_me);
        let text = message
            .content
            .and_then(|c| c.extended_text)
            .and_then(|e| e.text);
        assert_eq!(text.as_deref(), Some(".ping"));
    }

    #[test]
    fn creds_update_defaults_registered_to_false() {
        let frame: BridgeFrame =
            serde_json::from_str(r#"{"type":"creds_update","credentials":{"k":1}}"#).unwrap();
        assert!(matches!(
            frame,
            BridgeFrame::CredsUpdate { registered: false, .. }
        ));
    }
}
