//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use sha2::{Digest, Sha256};

use wg_domain::config::{Config, ConfigSeverity};
use wg_domain::Identity;
use wg_sessions::{AdminSet, CredentialStore, Directory, JsonFileStore, PairingChannel};

use crate::engine::bridge::BridgeEngine;
use crate::engine::ProtocolEngine;
use crate::router::build_default_router;
use crate::state::AppState;
use crate::supervisor::{ReconnectPolicy, Supervisor, SupervisorParts, SupervisorSettings};

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`] talking to the configured engine bridge.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let engine: Arc<dyn ProtocolEngine> = Arc::new(BridgeEngine::from_config(&config.engine));
    tracing::info!(bridge = %config.engine.bridge_url, "engine bridge configured");
    build_app_state_with_engine(config, engine).await
}

/// Same as [`build_app_state`] with an explicit engine.
pub async fn build_app_state_with_engine(
    config: Arc<Config>,
    engine: Arc<dyn ProtocolEngine>,
) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Storage roots ────────────────────────────────────────────────
    for dir in [&config.sessions.session_root, &config.sessions.qr_root] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let credentials = Arc::new(CredentialStore::new(&config.sessions.session_root));
    let pairing = Arc::new(PairingChannel::new(&config.sessions.qr_root));
    tracing::info!(
        session_root = %config.sessions.session_root.display(),
        qr_root = %config.sessions.qr_root.display(),
        "session storage ready"
    );

    // ── Directory + admins ───────────────────────────────────────────
    let directory = Arc::new(
        Directory::open(Box::new(JsonFileStore::new(&config.directory.numbers_path)))
            .await
            .context("loading number directory")?,
    );
    let owner = Identity::parse(&config.directory.owner_number, 1).ok();
    let admins = Arc::new(
        AdminSet::load_or_seed(&JsonFileStore::new(&config.directory.admins_path), owner.clone())
            .await
            .context("loading admin list")?,
    );
    tracing::info!(admins = admins.len(), "admin list loaded");

    // ── Command router ───────────────────────────────────────────────
    let router = Arc::new(build_default_router(&config.bot, owner));
    tracing::info!(
        prefix = %router.prefix(),
        commands = router.specs().len(),
        "command router ready"
    );

    // ── Supervisor ───────────────────────────────────────────────────
    let policy = ReconnectPolicy::from_config(&config.sessions.reconnect);
    tracing::info!(
        initial_delay_ms = policy.initial_delay.as_millis() as u64,
        max_attempts = policy.max_attempts,
        "reconnect policy set"
    );
    let supervisor = Supervisor::new(SupervisorParts {
        engine,
        credentials,
        pairing: pairing.clone(),
        directory: directory.clone(),
        admins: admins.clone(),
        router,
        policy,
        settings: SupervisorSettings::from_config(&config),
    });

    // ── API token (read once, hash for constant-time comparison) ─────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
            Some(t) => {
                tracing::info!(source = %format!("env:{env_var}"), "API bearer-token auth enabled");
                Some(Sha256::digest(t.as_bytes()).to_vec())
            }
            None => {
                tracing::warn!("API bearer-token auth DISABLED, set {env_var} to enable it");
                None
            }
        }
    };

    Ok(AppState {
        config,
        supervisor,
        pairing,
        directory,
        admins,
        api_token_hash,
        started_at: Instant::now(),
    })
}

/// Resume registered sessions when configured to.
pub fn spawn_background_tasks(state: &AppState) {
    if state.config.sessions.resume_on_start {
        let supervisor = state.supervisor.clone();
        tokio::spawn(async move {
            let started = supervisor.resume_registered().await;
            tracing::info!(sessions = started, "resuming registered sessions");
        });
    }
}
