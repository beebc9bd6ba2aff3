//! Session supervisor.
//!
//! Owns every per-identity session: opens engine sessions, turns pairing
//! challenges into artifacts, tracks live connections, reconnects after
//! recoverable drops and tears everything down on logout or delete.
//!
//! Each identity has at most one [`Slot`].  A slot is reserved under the
//! map lock before any await, so concurrent `connect` calls for the same
//! identity can never open two engine sessions.  The slot state is either
//! pairing (with an optional artifact), connected, or reconnecting, so a
//! pending artifact and a live connection cannot coexist.
//!
//! Every slot carries a generation number.  The per-session task re-checks
//! it before each state change, which makes a task orphaned by a delete
//! (and a later reconnect of the same number) harmless.
//!
//! Teardown (logout, delete, giving up) first moves the slot to closing.
//! A closing slot accepts no further state changes and answers `connect`
//! with in-progress; it is only removed once the credentials and pairing
//! image are gone, so a new connect never sees half-deleted state.

mod notify;
pub mod reconnect;

pub use notify::{notify_all, NotifyReport};
pub use reconnect::ReconnectPolicy;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};

use wg_domain::config::{Config, PairingMode};
use wg_domain::trace::TraceEvent;
use wg_domain::Identity;
use wg_protocol::InboundMessage;
use wg_sessions::{
    AdminSet, CredentialRecord, CredentialStore, Directory, PairingChallenge, PairingChannel,
    PairingPayload, PendingArtifact,
};

use crate::engine::{
    DisconnectReason, EngineError, EngineEvent, EngineLink, EngineSession, OpenRequest,
    ProtocolEngine,
};
use crate::router::{CommandRouter, SessionControl};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A live, handshaken engine session for one identity.
#[derive(Clone)]
pub struct Connection {
    identity: Identity,
    session: Arc<dyn EngineSession>,
    connected_at: DateTime<Utc>,
}

impl Connection {
    pub fn new(identity: Identity, session: Arc<dyn EngineSession>) -> Self {
        Self {
            identity,
            session,
            connected_at: Utc::now(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub async fn send_text(&self, to: &str, text: &str) -> Result<(), EngineError> {
        self.session.send_text(to, text).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("identity", &self.identity)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

/// Result of [`Supervisor::connect`].
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// A pairing artifact is ready to show to the user.
    Pairing(PairingPayload),
    /// The stored credentials were accepted; no pairing needed.
    Connected,
    AlreadyConnected,
    /// Another connect for this identity is still in flight.  Carries the
    /// current artifact when there is one.
    InProgress(Option<PairingPayload>),
    /// Nothing happened within the reply timeout; the session keeps going
    /// in the background.
    Pending,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("{0}")]
    InvalidIdentity(String),

    #[error("engine initialization failed: {0}")]
    EngineInit(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("no live connection for {0}")]
    NotConnected(Identity),

    #[error("send failed: {0}")]
    Send(String),

    #[error("session ended: {0}")]
    Ended(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pairing,
    Connected,
    Reconnecting,
    Closing,
}

/// `GET /status/:number` body.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub number: String,
    pub connected: bool,
    #[serde(rename = "qrPending")]
    pub qr_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<SessionState>,
    pub timestamp: DateTime<Utc>,
}

/// `GET /active` body.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSessions {
    pub count: usize,
    pub sessions: Vec<String>,
    #[serde(rename = "qrPending")]
    pub qr_pending: Vec<String>,
}

/// Tunables lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub min_identity_len: usize,
    pub pairing_mode: PairingMode,
    pub qr_ttl: Duration,
    pub reply_timeout: Duration,
    pub notify_concurrency: usize,
    pub bot_name: String,
    pub welcome: String,
}

impl SupervisorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            min_identity_len: cfg.sessions.min_identity_len,
            pairing_mode: cfg.sessions.pairing_mode,
            qr_ttl: Duration::from_secs(cfg.sessions.qr_ttl_secs),
            reply_timeout: Duration::from_secs(cfg.sessions.reply_timeout_secs),
            notify_concurrency: cfg.sessions.notify_concurrency,
            bot_name: cfg.bot.name.clone(),
            welcome: cfg.bot.welcome.clone(),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Collaborators wired into a [`Supervisor`].
pub struct SupervisorParts {
    pub engine: Arc<dyn ProtocolEngine>,
    pub credentials: Arc<CredentialStore>,
    pub pairing: Arc<PairingChannel>,
    pub directory: Arc<Directory>,
    pub admins: Arc<AdminSet>,
    pub router: Arc<CommandRouter>,
    pub policy: ReconnectPolicy,
    pub settings: SupervisorSettings,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Slot {
    generation: u64,
    cancel: CancellationToken,
    /// Cancelled once the slot's session task (or the connect that would
    /// spawn it) has finished.
    stopped: CancellationToken,
    /// Cancelled when the slot leaves the map.
    released: CancellationToken,
    state: SlotState,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.released.cancel();
    }
}

enum SlotState {
    Pairing { artifact: Option<PendingArtifact> },
    Connected { connection: Connection },
    Reconnecting { attempt: u32 },
    Closing,
}

impl Slot {
    fn connection(&self) -> Option<&Connection> {
        match &self.state {
            SlotState::Connected { connection } => Some(connection),
            _ => None,
        }
    }

    fn public_state(&self) -> SessionState {
        match self.state {
            SlotState::Pairing { .. } => SessionState::Pairing,
            SlotState::Connected { .. } => SessionState::Connected,
            SlotState::Reconnecting { .. } => SessionState::Reconnecting,
            SlotState::Closing => SessionState::Closing,
        }
    }

    fn is_closing(&self) -> bool {
        matches!(self.state, SlotState::Closing)
    }
}

enum Reservation {
    Existing(ConnectOutcome),
    Reserved {
        generation: u64,
        cancel: CancellationToken,
        stopped: CancellationToken,
    },
}

/// What `forget_identity` found when it claimed the slot.
enum Teardown {
    /// A live flow, now closing and owned by the caller.
    Owned {
        generation: u64,
        cancel: CancellationToken,
        stopped: CancellationToken,
        connection: Option<Connection>,
    },
    /// Another teardown is already running.
    Busy { released: CancellationToken },
    /// No slot existed; a closing placeholder now fences the purge.
    Fenced { generation: u64 },
}

type Responder = oneshot::Sender<Result<ConnectOutcome, SupervisorError>>;
type Opened = (EngineLink, CredentialRecord);

/// Per-task bookkeeping for one connect flow.
struct Flow {
    identity: Identity,
    generation: u64,
    cancel: CancellationToken,
    /// Answered at most once: first artifact, first handshake, or the end.
    responder: Option<Responder>,
    welcomed: bool,
    /// Consecutive failed reopen attempts.
    attempt: u32,
    /// Signals the slot's `stopped` token when the task ends.
    _stopped: DropGuard,
}

impl Flow {
    fn respond(&mut self, outcome: Result<ConnectOutcome, SupervisorError>) {
        if let Some(tx) = self.responder.take() {
            let _ = tx.send(outcome);
        }
    }
}

enum FlowEnd {
    Cancelled,
    Disconnected(DisconnectReason),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Supervisor {
    engine: Arc<dyn ProtocolEngine>,
    credentials: Arc<CredentialStore>,
    pairing: Arc<PairingChannel>,
    directory: Arc<Directory>,
    admins: Arc<AdminSet>,
    router: Arc<CommandRouter>,
    policy: ReconnectPolicy,
    settings: SupervisorSettings,
    slots: Mutex<HashMap<Identity, Slot>>,
    generations: AtomicU64,
}

impl Supervisor {
    pub fn new(parts: SupervisorParts) -> Arc<Self> {
        Arc::new(Self {
            engine: parts.engine,
            credentials: parts.credentials,
            pairing: parts.pairing,
            directory: parts.directory,
            admins: parts.admins,
            router: parts.router,
            policy: parts.policy,
            settings: parts.settings,
            slots: Mutex::new(HashMap::new()),
            generations: AtomicU64::new(0),
        })
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn parse_identity(&self, raw: &str) -> Result<Identity, SupervisorError> {
        Identity::parse(raw, self.settings.min_identity_len)
            .map_err(|e| SupervisorError::InvalidIdentity(e.to_string()))
    }

    // ── connect ──────────────────────────────────────────────────────

    /// Start (or join) the session for `raw` and wait, up to the reply
    /// timeout, for its first artifact or handshake.
    pub async fn connect(self: &Arc<Self>, raw: &str) -> Result<ConnectOutcome, SupervisorError> {
        let identity = self.parse_identity(raw)?;

        let (generation, cancel, stopped) = match self.reserve(&identity) {
            Reservation::Existing(outcome) => return Ok(outcome),
            Reservation::Reserved {
                generation,
                cancel,
                stopped,
            } => (generation, cancel, stopped.drop_guard()),
        };

        let opened = match self.open_link(&identity, 0).await {
            Ok(opened) => opened,
            Err(e) => {
                // A closing slot belongs to the teardown in progress.
                let mut slots = self.slots.lock();
                if slots
                    .get(&identity)
                    .is_some_and(|s| s.generation == generation && !s.is_closing())
                {
                    slots.remove(&identity);
                }
                drop(slots);
                tracing::warn!(identity = %identity, error = %e, "engine open failed");
                return Err(e);
            }
        };

        let (tx, rx) = oneshot::channel();
        let flow = Flow {
            identity: identity.clone(),
            generation,
            cancel,
            responder: Some(tx),
            welcomed: false,
            attempt: 0,
            _stopped: stopped,
        };
        tokio::spawn(Arc::clone(self).run_session(flow, opened));

        match tokio::time::timeout(self.settings.reply_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Task went away without answering (cancelled by a delete).
            Ok(Err(_)) => Err(SupervisorError::Ended("session cancelled".into())),
            Err(_) => {
                tracing::info!(identity = %identity, "no pairing artifact yet, answering pending");
                Ok(ConnectOutcome::Pending)
            }
        }
    }

    /// Check-and-reserve in one critical section.
    fn reserve(&self, identity: &Identity) -> Reservation {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(identity) {
            let outcome = match &slot.state {
                SlotState::Connected { .. } => ConnectOutcome::AlreadyConnected,
                SlotState::Pairing { artifact } => ConnectOutcome::InProgress(
                    self.live(artifact.as_ref()).map(PendingArtifact::payload),
                ),
                SlotState::Reconnecting { .. } | SlotState::Closing => {
                    ConnectOutcome::InProgress(None)
                }
            };
            return Reservation::Existing(outcome);
        }

        let generation = self.next_generation();
        let cancel = CancellationToken::new();
        let stopped = CancellationToken::new();
        slots.insert(
            identity.clone(),
            Slot {
                generation,
                cancel: cancel.clone(),
                stopped: stopped.clone(),
                released: CancellationToken::new(),
                state: SlotState::Pairing { artifact: None },
            },
        );
        Reservation::Reserved {
            generation,
            cancel,
            stopped,
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn open_link(&self, identity: &Identity, attempt: u32) -> Result<Opened, SupervisorError> {
        let record = self
            .credentials
            .load_or_create(identity)
            .await
            .map_err(|e| SupervisorError::Storage(e.to_string()))?;
        let session_dir = self.credentials.session_dir(identity);

        let link = self
            .engine
            .open(OpenRequest {
                identity,
                session_dir: &session_dir,
                credentials: &record,
            })
            .await
            .map_err(|e| SupervisorError::EngineInit(e.to_string()))?;

        TraceEvent::SessionOpened {
            identity: identity.to_string(),
            registered: record.registered,
            attempt,
        }
        .emit();
        Ok((link, record))
    }

    // ── Per-session task ─────────────────────────────────────────────

    async fn run_session(self: Arc<Self>, mut flow: Flow, first: Opened) {
        let mut opened: Result<Opened, String> = Ok(first);
        loop {
            let end = match opened {
                Ok((link, record)) => self.drive(&mut flow, link, record).await,
                Err(error) => FlowEnd::Disconnected(DisconnectReason::Unavailable(error)),
            };
            let reason = match end {
                FlowEnd::Cancelled => {
                    tracing::debug!(identity = %flow.identity, "session task cancelled");
                    return;
                }
                FlowEnd::Disconnected(reason) => reason,
            };
            if !self.owns(&flow) {
                return;
            }

            TraceEvent::Disconnected {
                identity: flow.identity.to_string(),
                reason: reason.to_string(),
                terminal: reason.is_terminal(),
            }
            .emit();

            if reason.is_terminal() {
                self.retire(&mut flow, &reason, true).await;
                return;
            }
            if self.policy.should_give_up(flow.attempt) {
                tracing::error!(
                    identity = %flow.identity,
                    attempts = flow.attempt,
                    "max reconnect attempts exhausted"
                );
                self.retire(&mut flow, &reason, false).await;
                return;
            }

            let delay = self.policy.delay_for_attempt(flow.attempt);
            flow.attempt += 1;
            let attempt = flow.attempt;
            let marked = self.with_owned_slot(&flow.identity, flow.generation, |slot| {
                slot.state = SlotState::Reconnecting { attempt };
            });
            if marked.is_none() {
                return;
            }
            TraceEvent::ReconnectScheduled {
                identity: flow.identity.to_string(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            }
            .emit();

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = flow.cancel.cancelled() => return,
            }
            if !self.owns(&flow) {
                return;
            }
            opened = self
                .open_link(&flow.identity, attempt)
                .await
                .map_err(|e| e.to_string());
        }
    }

    /// Pump one engine session until it ends or the flow is cancelled.
    async fn drive(self: &Arc<Self>, flow: &mut Flow, link: EngineLink, record: CredentialRecord) -> FlowEnd {
        let EngineLink {
            session,
            mut events,
        } = link;

        if !record.registered && self.settings.pairing_mode == PairingMode::Code {
            match session.request_pairing_code(flow.identity.as_str()).await {
                Ok(code) => self.on_pairing_challenge(flow, PairingChallenge::Code(code)).await,
                Err(e) => tracing::warn!(
                    identity = %flow.identity,
                    error = %e,
                    "pairing code request failed, waiting for engine challenge"
                ),
            }
        }

        let end = loop {
            let event = tokio::select! {
                biased;
                _ = flow.cancel.cancelled() => break FlowEnd::Cancelled,
                event = events.recv() => event,
            };
            match event {
                None => break FlowEnd::Disconnected(DisconnectReason::StreamEnded),
                Some(EngineEvent::Disconnected(reason)) => break FlowEnd::Disconnected(reason),
                Some(EngineEvent::PairingChallenge(challenge)) => {
                    self.on_pairing_challenge(flow, challenge).await
                }
                Some(EngineEvent::CredentialsUpdated {
                    material,
                    registered,
                }) => self.on_credentials(flow, material, registered).await,
                Some(EngineEvent::Connected) => self.on_connected(flow, &session).await,
                Some(EngineEvent::Message(message)) => self.on_message(flow, &session, message),
            }
        };

        session.close().await;
        end
    }

    async fn on_pairing_challenge(&self, flow: &mut Flow, challenge: PairingChallenge) {
        // The image path is shared by every flow of this identity.
        let wanted = self.with_owned_slot(&flow.identity, flow.generation, |slot| {
            slot.connection().is_none()
        });
        if wanted != Some(true) {
            tracing::debug!(identity = %flow.identity, "pairing challenge ignored, slot no longer pairing");
            return;
        }

        let artifact = match self.pairing.issue(&flow.identity, challenge).await {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(identity = %flow.identity, error = %e, "failed to materialize pairing challenge");
                return;
            }
        };

        let installed = self.with_owned_slot(&flow.identity, flow.generation, |slot| {
            if slot.connection().is_some() {
                return false;
            }
            slot.state = SlotState::Pairing {
                artifact: Some(artifact.clone()),
            };
            true
        });

        match installed {
            Some(true) => {
                tracing::info!(identity = %flow.identity, kind = artifact.challenge.kind(), "pairing artifact ready");
                flow.respond(Ok(ConnectOutcome::Pairing(artifact.payload())));
            }
            // Connected while rendering: the image is ours and stale.
            Some(false) => {
                if let Err(e) = self.pairing.discard(&flow.identity).await {
                    tracing::warn!(identity = %flow.identity, error = %e, "failed to discard stale pairing image");
                }
            }
            // Closing or replaced: whoever owns the slot now owns the image.
            None => {}
        }
    }

    async fn on_credentials(&self, flow: &Flow, material: serde_json::Value, registered: bool) {
        if !self.owns(flow) {
            return;
        }
        if let Err(e) = self
            .credentials
            .rotate(&flow.identity, material, registered)
            .await
        {
            tracing::error!(identity = %flow.identity, error = %e, "failed to persist rotated credentials");
        }
    }

    async fn on_connected(&self, flow: &mut Flow, session: &Arc<dyn EngineSession>) {
        let connection = Connection::new(flow.identity.clone(), session.clone());
        let installed = self.with_owned_slot(&flow.identity, flow.generation, |slot| {
            slot.state = SlotState::Connected {
                connection: connection.clone(),
            };
        });
        if installed.is_none() {
            return;
        }
        flow.attempt = 0;

        if let Err(e) = self.pairing.discard(&flow.identity).await {
            tracing::warn!(identity = %flow.identity, error = %e, "failed to discard pairing image");
        }
        if let Err(e) = self.directory.add_if_absent(&flow.identity).await {
            tracing::warn!(identity = %flow.identity, error = %e, "failed to record identity in directory");
        }

        let first = !flow.welcomed;
        flow.welcomed = true;
        TraceEvent::HandshakeCompleted {
            identity: flow.identity.to_string(),
            first,
        }
        .emit();
        flow.respond(Ok(ConnectOutcome::Connected));

        if first {
            tokio::spawn(notify::announce(
                connection,
                self.settings.welcome.clone(),
                self.admins.iter().cloned().collect(),
                self.settings.bot_name.clone(),
                self.settings.notify_concurrency,
            ));
        }
    }

    fn on_message(self: &Arc<Self>, flow: &Flow, session: &Arc<dyn EngineSession>, message: InboundMessage) {
        let connection = self
            .connection(&flow.identity)
            .unwrap_or_else(|| Connection::new(flow.identity.clone(), session.clone()));
        let router = self.router.clone();
        let control: Arc<dyn SessionControl> = self.clone();
        tokio::spawn(async move {
            router.dispatch(connection, control, message).await;
        });
    }

    /// Drop the slot for good.  A terminal (logged-out) end also deletes the
    /// credentials so the next connect starts a fresh pairing.
    async fn retire(&self, flow: &mut Flow, reason: &DisconnectReason, purge: bool) {
        let claimed = self.with_owned_slot(&flow.identity, flow.generation, |slot| {
            slot.state = SlotState::Closing;
        });
        if claimed.is_none() {
            // A delete got there first and does the cleanup.
            return;
        }

        if let Err(e) = self.pairing.discard(&flow.identity).await {
            tracing::warn!(identity = %flow.identity, error = %e, "failed to discard pairing image");
        }
        if purge {
            if let Err(e) = self.credentials.purge(&flow.identity).await {
                tracing::error!(identity = %flow.identity, error = %e, "failed to purge credentials");
            }
            TraceEvent::SessionPurged {
                identity: flow.identity.to_string(),
                reason: reason.to_string(),
            }
            .emit();
        }
        self.release(&flow.identity, flow.generation);
        flow.respond(Err(SupervisorError::Ended(reason.to_string())));
    }

    // ── Slot helpers ─────────────────────────────────────────────────

    /// Whether the flow still owns a slot that is not being torn down.
    fn owns(&self, flow: &Flow) -> bool {
        self.slots
            .lock()
            .get(&flow.identity)
            .is_some_and(|slot| slot.generation == flow.generation && !slot.is_closing())
    }

    /// Run `f` on the slot if `generation` owns it and it is not closing.
    fn with_owned_slot<R>(
        &self,
        identity: &Identity,
        generation: u64,
        f: impl FnOnce(&mut Slot) -> R,
    ) -> Option<R> {
        let mut slots = self.slots.lock();
        match slots.get_mut(identity) {
            Some(slot) if slot.generation == generation && !slot.is_closing() => Some(f(slot)),
            _ => None,
        }
    }

    fn release(&self, identity: &Identity, generation: u64) -> bool {
        let mut slots = self.slots.lock();
        if slots.get(identity).is_some_and(|s| s.generation == generation) {
            slots.remove(identity);
            return true;
        }
        false
    }

    fn live<'a>(&self, artifact: Option<&'a PendingArtifact>) -> Option<&'a PendingArtifact> {
        artifact.filter(|a| !a.is_expired(self.settings.qr_ttl, Utc::now()))
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn connection(&self, identity: &Identity) -> Option<Connection> {
        self.slots.lock().get(identity)?.connection().cloned()
    }

    /// The current, unexpired pairing artifact for `identity`.
    pub fn pending_artifact(&self, identity: &Identity) -> Option<PendingArtifact> {
        let slots = self.slots.lock();
        match &slots.get(identity)?.state {
            SlotState::Pairing { artifact } => self.live(artifact.as_ref()).cloned(),
            _ => None,
        }
    }

    pub fn state(&self, identity: &Identity) -> Option<SessionState> {
        self.slots.lock().get(identity).map(Slot::public_state)
    }

    pub fn status(&self, raw: &str) -> Result<SessionStatus, SupervisorError> {
        let identity = self.parse_identity(raw)?;
        let state = self.state(&identity);
        Ok(SessionStatus {
            number: identity.to_string(),
            connected: state == Some(SessionState::Connected),
            qr_pending: self.pending_artifact(&identity).is_some(),
            state,
            timestamp: Utc::now(),
        })
    }

    /// Connected identities (sorted) plus those waiting on a pairing.
    pub fn active(&self) -> ActiveSessions {
        let now = Utc::now();
        let slots = self.slots.lock();
        let mut sessions = Vec::new();
        let mut qr_pending = Vec::new();
        for (identity, slot) in slots.iter() {
            match &slot.state {
                SlotState::Connected { .. } => sessions.push(identity.to_string()),
                SlotState::Pairing {
                    artifact: Some(artifact),
                } if !artifact.is_expired(self.settings.qr_ttl, now) => {
                    qr_pending.push(identity.to_string())
                }
                _ => {}
            }
        }
        sessions.sort();
        qr_pending.sort();
        ActiveSessions {
            count: sessions.len(),
            sessions,
            qr_pending,
        }
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// Send a text through the live connection of `raw`.  `to` defaults to
    /// the identity's own chat; a bare number is turned into a direct-chat
    /// address, anything with an `@` is used as is.
    pub async fn send_text(&self, raw: &str, to: Option<&str>, text: &str) -> Result<(), SupervisorError> {
        let identity = self.parse_identity(raw)?;
        let connection = self
            .connection(&identity)
            .ok_or_else(|| SupervisorError::NotConnected(identity.clone()))?;

        let target = match to.map(str::trim).filter(|t| !t.is_empty()) {
            None => identity.jid(),
            Some(t) if t.contains('@') => t.to_string(),
            Some(t) => Identity::parse(t, 1)
                .map_err(|e| SupervisorError::InvalidIdentity(e.to_string()))?
                .jid(),
        };

        connection
            .send_text(&target, text)
            .await
            .map_err(|e| SupervisorError::Send(e.to_string()))
    }

    /// Log out, drop the slot and delete the persisted credentials and
    /// pairing image.  Returns whether anything existed.
    pub async fn disconnect_and_forget(&self, raw: &str) -> Result<bool, SupervisorError> {
        let identity = self.parse_identity(raw)?;
        self.forget_identity(&identity).await
    }

    async fn forget_identity(&self, identity: &Identity) -> Result<bool, SupervisorError> {
        let mut waited = false;
        let (generation, had_slot) = loop {
            match self.claim_for_teardown(identity) {
                Teardown::Owned {
                    generation,
                    cancel,
                    stopped,
                    connection,
                } => {
                    // Logout first: cancelling would close the transport under it.
                    if let Some(connection) = connection {
                        if let Err(e) = connection.session.logout().await {
                            tracing::warn!(identity = %identity, error = %e, "engine logout failed, removing local state anyway");
                        }
                        connection.session.close().await;
                    } else {
                        tracing::info!(identity = %identity, "no live connection to log out, removing local state only");
                    }
                    cancel.cancel();
                    // No write from the old task may land after the purge.
                    self.wait_stopped(identity, &stopped).await;
                    break (generation, true);
                }
                Teardown::Busy { released } => {
                    if tokio::time::timeout(self.settings.reply_timeout, released.cancelled())
                        .await
                        .is_err()
                    {
                        tracing::warn!(identity = %identity, "concurrent teardown still running, leaving it the cleanup");
                        return Ok(true);
                    }
                    waited = true;
                }
                Teardown::Fenced { generation } => break (generation, waited),
            }
        };

        let purged = self.credentials.purge(identity).await;
        if let Err(e) = self.pairing.discard(identity).await {
            tracing::warn!(identity = %identity, error = %e, "failed to discard pairing image");
        }
        self.release(identity, generation);
        let purged = purged.map_err(|e| SupervisorError::Storage(e.to_string()))?;

        let existed = had_slot || purged;
        if existed {
            TraceEvent::SessionPurged {
                identity: identity.to_string(),
                reason: "deleted".into(),
            }
            .emit();
        }
        Ok(existed)
    }

    /// Move the slot to closing (inserting a placeholder when there is
    /// none) so no connect can reserve it until the purge is done.
    fn claim_for_teardown(&self, identity: &Identity) -> Teardown {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(identity) {
            if slot.is_closing() {
                return Teardown::Busy {
                    released: slot.released.clone(),
                };
            }
            let connection = slot.connection().cloned();
            slot.state = SlotState::Closing;
            return Teardown::Owned {
                generation: slot.generation,
                cancel: slot.cancel.clone(),
                stopped: slot.stopped.clone(),
                connection,
            };
        }

        let generation = self.next_generation();
        let stopped = CancellationToken::new();
        stopped.cancel();
        slots.insert(
            identity.clone(),
            Slot {
                generation,
                cancel: CancellationToken::new(),
                stopped,
                released: CancellationToken::new(),
                state: SlotState::Closing,
            },
        );
        Teardown::Fenced { generation }
    }

    async fn wait_stopped(&self, identity: &Identity, stopped: &CancellationToken) {
        if tokio::time::timeout(self.settings.reply_timeout, stopped.cancelled())
            .await
            .is_err()
        {
            tracing::warn!(identity = %identity, "session task still running after cancel, purging anyway");
        }
    }

    /// Reopen every directory member whose credentials are registered.
    /// Returns how many were started.
    pub async fn resume_registered(self: &Arc<Self>) -> usize {
        let mut started = 0;
        for identity in self.directory.list().await {
            match self.credentials.load(&identity).await {
                Ok(Some(record)) if record.registered => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(identity = %identity, error = %e, "skipping resume, credentials unreadable");
                    continue;
                }
            }
            let this = Arc::clone(self);
            tokio::spawn(async move {
                match this.connect(identity.as_str()).await {
                    Ok(outcome) => tracing::info!(identity = %identity, outcome = ?outcome, "session resumed"),
                    Err(e) => tracing::warn!(identity = %identity, error = %e, "session resume failed"),
                }
            });
            started += 1;
        }
        started
    }

    /// Close every session without logging out, so credentials stay valid
    /// for the next start.
    pub async fn shutdown(&self) {
        let slots: Vec<(Identity, Slot)> = self.slots.lock().drain().collect();
        let count = slots.len();
        for (_, slot) in slots {
            slot.cancel.cancel();
            if let Some(connection) = slot.connection() {
                connection.session.close().await;
            }
        }
        tracing::info!(sessions = count, "supervisor shut down");
    }
}

#[async_trait]
impl SessionControl for Supervisor {
    fn is_admin(&self, identity: &Identity) -> bool {
        self.admins.contains(identity)
    }

    async fn forget(&self, identity: &Identity) -> Result<bool, SupervisorError> {
        self.forget_identity(identity).await
    }
}
