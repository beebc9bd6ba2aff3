use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session supervisor configuration: where per-identity state lives, how
/// identities are validated, and how dropped connections are retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Root of the per-identity credential directories
    /// (`<session_root>/session_<identity>/`).
    #[serde(default = "d_session_root")]
    pub session_root: PathBuf,

    /// Directory holding rendered pairing images (`<qr_root>/<identity>.png`).
    #[serde(default = "d_qr_root")]
    pub qr_root: PathBuf,

    /// Minimum number of digits a normalized identity must have.
    #[serde(default = "d_10")]
    pub min_identity_len: usize,

    /// How a new identity is paired.
    #[serde(default)]
    pub pairing_mode: PairingMode,

    /// Seconds after which an unclaimed pairing artifact is treated as gone.
    #[serde(default = "d_60")]
    pub qr_ttl_secs: u64,

    /// How long `POST /connect` waits for the first artifact or handshake
    /// before answering with "connecting".
    #[serde(default = "d_30")]
    pub reply_timeout_secs: u64,

    /// Retry policy for recoverable disconnects.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Maximum admin notifications in flight after a handshake.
    #[serde(default = "d_4")]
    pub notify_concurrency: usize,

    /// Reopen every registered identity from the directory at startup.
    #[serde(default = "d_true")]
    pub resume_on_start: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            session_root: d_session_root(),
            qr_root: d_qr_root(),
            min_identity_len: 10,
            pairing_mode: PairingMode::default(),
            qr_ttl_secs: 60,
            reply_timeout_secs: 30,
            reconnect: ReconnectConfig::default(),
            notify_concurrency: 4,
            resume_on_start: true,
        }
    }
}

/// Pairing artifact requested for an unregistered identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingMode {
    /// Wait for the engine to emit a scannable QR payload.
    #[default]
    Qr,
    /// Ask the engine for a short linking code bound to the phone number.
    Code,
}

/// Reconnect schedule after a recoverable disconnect.
///
/// The defaults retry every 5 seconds forever.  Raising `backoff_factor`
/// above `1.0` (with `max_delay_ms` as the cap) and setting `max_attempts`
/// turns it into a bounded exponential policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "d_5000")]
    pub initial_delay_ms: u64,
    #[serde(default = "d_5000")]
    pub max_delay_ms: u64,
    #[serde(default = "d_one")]
    pub backoff_factor: f64,
    /// `0` means unlimited.
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 5_000,
            max_delay_ms: 5_000,
            backoff_factor: 1.0,
            max_attempts: 0,
        }
    }
}

fn d_session_root() -> PathBuf {
    PathBuf::from("./session")
}
fn d_qr_root() -> PathBuf {
    PathBuf::from("./qr_codes")
}
fn d_10() -> usize {
    10
}
fn d_60() -> u64 {
    60
}
fn d_30() -> u64 {
    30
}
fn d_4() -> usize {
    4
}
fn d_5000() -> u64 {
    5_000
}
fn d_one() -> f64 {
    1.0
}
fn d_true() -> bool {
    true
}
