//! Shared test harness: a scripted in-process engine plus a fully wired
//! application state rooted in a temp directory.

#![allow(dead_code)]

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use wg_domain::config::Config;
use wg_domain::Identity;
use wg_gateway::engine::{
    DisconnectReason, EngineError, EngineEvent, EngineLink, EngineSession, OpenRequest,
    ProtocolEngine,
};
use wg_gateway::state::AppState;
use wg_protocol::{InboundMessage, MessageContent, MessageKey};
use wg_sessions::{CredentialStore, PairingChallenge};

pub const NUMBER: &str = "94712345678";
pub const OWNER: &str = "94752978237";

pub fn jid(number: &str) -> String {
    format!("{number}@s.whatsapp.net")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Hands every opened session to the test through a channel so the test
/// can play the engine's side of the conversation.
pub struct ScriptedEngine {
    opened: mpsc::UnboundedSender<EngineHandle>,
    opens: AtomicUsize,
    fail_opens: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EngineHandle>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            opened: tx,
            opens: AtomicUsize::new(0),
            fail_opens: AtomicUsize::new(0),
        });
        (engine, rx)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make the next `n` opens fail.
    pub fn fail_next_opens(&self, n: usize) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProtocolEngine for ScriptedEngine {
    async fn open(&self, request: OpenRequest<'_>) -> Result<EngineLink, EngineError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::Connect("scripted failure".into()));
        }

        let (events_tx, events_rx) = mpsc::channel(32);
        let session = Arc::new(ScriptedSession::default());
        let _ = self.opened.send(EngineHandle {
            identity: request.identity.clone(),
            registered: request.credentials.registered,
            events: events_tx,
            session: session.clone(),
        });
        Ok(EngineLink {
            session,
            events: events_rx,
        })
    }
}

/// The test's end of one opened engine session.
pub struct EngineHandle {
    pub identity: Identity,
    pub registered: bool,
    pub events: mpsc::Sender<EngineEvent>,
    pub session: Arc<ScriptedSession>,
}

impl EngineHandle {
    pub async fn emit(&self, event: EngineEvent) {
        self.events.send(event).await.expect("session task alive");
    }

    pub async fn qr(&self, payload: &str) {
        self.emit(EngineEvent::PairingChallenge(PairingChallenge::Qr(payload.into())))
            .await;
    }

    pub async fn register(&self) {
        self.emit(EngineEvent::CredentialsUpdated {
            material: serde_json::json!({ "noise_key": "abc" }),
            registered: true,
        })
        .await;
    }

    pub async fn connected(&self) {
        self.emit(EngineEvent::Connected).await;
    }

    pub async fn drop_with(&self, status: u16) {
        self.emit(EngineEvent::Disconnected(DisconnectReason::from_status(
            Some(status),
            None,
        )))
        .await;
    }

    pub async fn text_from(&self, chat: &str, participant: Option<&str>, text: &str) {
        self.emit(EngineEvent::Message(InboundMessage {
            key: MessageKey {
                remote_jid: chat.into(),
                from_me: false,
                participant: participant.map(str::to_string),
                id: uuid::Uuid::new_v4().to_string(),
            },
            content: Some(MessageContent {
                conversation: Some(text.into()),
                extended_text: None,
            }),
            push_name: None,
            timestamp: chrono::Utc::now().timestamp(),
        }))
        .await;
    }
}

#[derive(Default)]
pub struct ScriptedSession {
    sent: Mutex<Vec<(String, String)>>,
    unreachable: Mutex<HashSet<String>>,
    pub logged_out: AtomicBool,
    pub closed: AtomicBool,
    pub code_requests: AtomicUsize,
}

impl ScriptedSession {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, to: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(t, _)| t == to)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// Sends to `to` will fail.
    pub fn make_unreachable(&self, to: &str) {
        self.unreachable.lock().insert(to.into());
    }
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn send_text(&self, to: &str, text: &str) -> Result<(), EngineError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Closed);
        }
        if self.unreachable.lock().contains(to) {
            return Err(EngineError::Rejected(format!("{to} unreachable")));
        }
        self.sent.lock().push((to.into(), text.into()));
        Ok(())
    }

    async fn request_pairing_code(&self, _phone: &str) -> Result<String, EngineError> {
        self.code_requests.fetch_add(1, Ordering::SeqCst);
        Ok("ABCD-1234".into())
    }

    async fn logout(&self) -> Result<(), EngineError> {
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub state: AppState,
    pub engine: Arc<ScriptedEngine>,
    pub opened: mpsc::UnboundedReceiver<EngineHandle>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Defaults tuned for tests (fast reconnects), then `tweak`.
    pub async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sessions.session_root = dir.path().join("session");
        config.sessions.qr_root = dir.path().join("qr_codes");
        config.sessions.reply_timeout_secs = 5;
        config.sessions.reconnect.initial_delay_ms = 20;
        config.sessions.reconnect.max_delay_ms = 20;
        config.directory.numbers_path = dir.path().join("numbers.json");
        config.directory.admins_path = dir.path().join("admin.json");
        config.directory.owner_number = OWNER.into();
        tweak(&mut config);

        let (engine, opened) = ScriptedEngine::new();
        let state =
            wg_gateway::bootstrap::build_app_state_with_engine(Arc::new(config), engine.clone())
                .await
                .unwrap();
        Self {
            dir,
            state,
            engine,
            opened,
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::parse(NUMBER, 10).unwrap()
    }

    pub fn credentials(&self) -> CredentialStore {
        CredentialStore::new(&self.state.config.sessions.session_root)
    }

    pub fn app(&self) -> axum::Router {
        wg_gateway::api::router(self.state.clone()).with_state(self.state.clone())
    }

    pub async fn next_open(&mut self) -> EngineHandle {
        tokio::time::timeout(Duration::from_secs(2), self.opened.recv())
            .await
            .expect("engine open within 2s")
            .expect("engine channel open")
    }

    /// Drive `NUMBER` through QR pairing to a live connection.
    pub async fn connect_and_pair(&mut self) -> EngineHandle {
        let supervisor = self.state.supervisor.clone();
        let connect = tokio::spawn(async move { supervisor.connect(NUMBER).await });
        let handle = self.next_open().await;
        handle.qr("2@pairing-payload").await;
        connect.await.unwrap().unwrap();

        handle.register().await;
        handle.connected().await;
        let supervisor = self.state.supervisor.clone();
        let id = self.identity();
        eventually(|| supervisor.connection(&id).is_some()).await;
        // The directory entry is the last handshake side effect.
        let (directory, key) = (&self.state.directory, &id);
        eventually_async(|| async move { directory.contains(key).await }).await;
        handle
    }
}

/// Poll `check` until it holds, failing after ~2 seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

/// Async flavour of [`eventually`].
pub async fn eventually_async<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}
