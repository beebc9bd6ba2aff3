use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bot persona
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Text surface of the per-session command interpreter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "d_name")]
    pub name: String,
    /// Command prefix; messages not starting with it are never dispatched.
    #[serde(default = "d_prefix")]
    pub prefix: String,
    /// Sent to the linked number once its first handshake completes.
    #[serde(default = "d_welcome")]
    pub welcome: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: d_name(),
            prefix: d_prefix(),
            welcome: d_welcome(),
        }
    }
}

fn d_name() -> String {
    "DTZ NOVA X MD".into()
}
fn d_prefix() -> String {
    ".".into()
}
fn d_welcome() -> String {
    "✅ DTZ NOVA X MD Connected!\n\nCommands:\n• .menu - Show commands\n• .movie [name] - Search movies\n• .owner - Contact".into()
}
