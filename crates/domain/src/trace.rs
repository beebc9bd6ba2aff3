use serde::Serialize;

/// Structured lifecycle events emitted across all wagate crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionOpened {
        identity: String,
        registered: bool,
        attempt: u32,
    },
    PairingIssued {
        identity: String,
        kind: String,
    },
    CredentialsRotated {
        identity: String,
        registered: bool,
    },
    HandshakeCompleted {
        identity: String,
        first: bool,
    },
    DirectoryAppended {
        identity: String,
        total: usize,
    },
    Disconnected {
        identity: String,
        reason: String,
        terminal: bool,
    },
    ReconnectScheduled {
        identity: String,
        attempt: u32,
        delay_ms: u64,
    },
    SessionPurged {
        identity: String,
        reason: String,
    },
    CommandDispatched {
        identity: String,
        command: String,
        sender: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "wg_event");
    }
}
