mod bot;
mod directory;
mod engine;
mod observability;
mod server;
mod sessions;

pub use bot::*;
pub use directory::*;
pub use engine::*;
pub use observability::*;
pub use server::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        if self.sessions.min_identity_len == 0
            || self.sessions.min_identity_len > crate::identity::MAX_IDENTITY_LEN
        {
            errors.push(ConfigError::error(
                "sessions.min_identity_len",
                format!(
                    "must be between 1 and {}",
                    crate::identity::MAX_IDENTITY_LEN
                ),
            ));
        }
        if self.sessions.reply_timeout_secs == 0 {
            errors.push(ConfigError::error(
                "sessions.reply_timeout_secs",
                "must be greater than 0",
            ));
        }
        if self.sessions.notify_concurrency == 0 {
            errors.push(ConfigError::error(
                "sessions.notify_concurrency",
                "must be greater than 0",
            ));
        }
        if self.sessions.reconnect.backoff_factor < 1.0 {
            errors.push(ConfigError::error(
                "sessions.reconnect.backoff_factor",
                "must be at least 1.0",
            ));
        }
        if self.sessions.reconnect.max_delay_ms < self.sessions.reconnect.initial_delay_ms {
            errors.push(ConfigError::warning(
                "sessions.reconnect.max_delay_ms",
                "smaller than initial_delay_ms; raised to initial_delay_ms",
            ));
        }
        if self.sessions.reconnect.max_attempts == 0 && self.sessions.reconnect.backoff_factor <= 1.0 {
            errors.push(ConfigError::warning(
                "sessions.reconnect",
                "unbounded fixed-delay retries; an unreachable engine is retried forever",
            ));
        }

        if !self.engine.bridge_url.starts_with("ws://") && !self.engine.bridge_url.starts_with("wss://") {
            errors.push(ConfigError::error(
                "engine.bridge_url",
                "must be a ws:// or wss:// URL",
            ));
        }

        if self.bot.prefix.is_empty() {
            errors.push(ConfigError::error("bot.prefix", "prefix must not be empty"));
        }

        if crate::identity::normalize(&self.directory.owner_number).is_empty() {
            errors.push(ConfigError::warning(
                "directory.owner_number",
                "no owner number; admin.json will be seeded empty",
            ));
        }

        // CORS: warn if wildcard is used.
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }
}
