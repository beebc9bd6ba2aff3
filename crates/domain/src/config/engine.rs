use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Protocol engine bridge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the chat-protocol engine lives.  The gateway opens one WebSocket
/// per identity at `<bridge_url>/sessions/<identity>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "d_bridge_url")]
    pub bridge_url: String,
    /// Environment variable holding the bridge's pre-shared token, sent as
    /// the `token` query parameter.  Unset = no token.
    #[serde(default = "d_token_env")]
    pub token_env: String,
    #[serde(default = "d_10")]
    pub connect_timeout_secs: u64,
    /// Timeout for request/response frames (sends, pairing codes, logout).
    #[serde(default = "d_20")]
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bridge_url: d_bridge_url(),
            token_env: d_token_env(),
            connect_timeout_secs: 10,
            request_timeout_secs: 20,
        }
    }
}

fn d_bridge_url() -> String {
    "ws://127.0.0.1:8790".into()
}
fn d_token_env() -> String {
    "WAGATE_BRIDGE_TOKEN".into()
}
fn d_10() -> u64 {
    10
}
fn d_20() -> u64 {
    20
}
