//! WebSocket client for an external protocol engine process.
//!
//! One WebSocket per identity at `<bridge_url>/sessions/<identity>`.
//! The gateway sends `open`, waits for `ready`, then runs a writer task
//! (outbound frames) and a reader task (events + request responses).
//! Request/response pairs are correlated by `request_id` through a map of
//! oneshot senders, failed wholesale when the socket drops.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use wg_domain::config::EngineConfig;
use wg_protocol::{BridgeFrame, PROTOCOL_VERSION};
use wg_sessions::PairingChallenge;

use super::{
    DisconnectReason, EngineError, EngineEvent, EngineLink, EngineSession, OpenRequest,
    ProtocolEngine,
};

const EVENT_BUFFER: usize = 64;
const OUTBOUND_BUFFER: usize = 64;

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, EngineError>>>>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BridgeEngine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BridgeEngine {
    base_url: String,
    token: Option<String>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl BridgeEngine {
    /// Build from config; the bridge token is read once from
    /// `engine.token_env`.
    pub fn from_config(cfg: &EngineConfig) -> Self {
        let token = std::env::var(&cfg.token_env)
            .ok()
            .filter(|t| !t.is_empty());
        if token.is_none() {
            tracing::info!(env = %cfg.token_env, "no bridge token set, connecting unauthenticated");
        }
        Self {
            base_url: cfg.bridge_url.trim_end_matches('/').to_string(),
            token,
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            request_timeout: Duration::from_secs(cfg.request_timeout_secs),
        }
    }

    fn session_url(&self, identity: &str) -> String {
        match &self.token {
            Some(token) => format!("{}/sessions/{identity}?token={token}", self.base_url),
            None => format!("{}/sessions/{identity}", self.base_url),
        }
    }
}

#[async_trait]
impl ProtocolEngine for BridgeEngine {
    async fn open(&self, request: OpenRequest<'_>) -> Result<EngineLink, EngineError> {
        let identity = request.identity.to_string();
        let url = self.session_url(&identity);
        tracing::debug!(identity = %identity, bridge = %self.base_url, "connecting to engine bridge");

        let (ws, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(&url))
                .await
                .map_err(|_| EngineError::Timeout("bridge connect".into()))?
                .map_err(|e| EngineError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        // ── open → ready ─────────────────────────────────────────────
        let open = BridgeFrame::Open {
            protocol_version: PROTOCOL_VERSION,
            identity: identity.clone(),
            session_dir: request.session_dir.display().to_string(),
            credentials: request.credentials.material.clone(),
            registered: request.credentials.registered,
        };
        let json = serde_json::to_string(&open).map_err(|e| EngineError::Protocol(e.to_string()))?;
        sink.send(Message::Text(json))
            .await
            .map_err(|e| EngineError::Connect(e.to_string()))?;

        let ready = tokio::time::timeout(self.connect_timeout, async {
            while let Some(Ok(msg)) = stream.next().await {
                let Message::Text(text) = msg else { continue };
                match serde_json::from_str::<BridgeFrame>(&text) {
                    Ok(BridgeFrame::Ready { engine_version }) => return Ok(engine_version),
                    Ok(BridgeFrame::ConnectionClose {
                        status_code,
                        reason,
                    }) => {
                        return Err(EngineError::Handshake(
                            DisconnectReason::from_status(status_code, reason).to_string(),
                        ))
                    }
                    _ => {}
                }
            }
            Err(EngineError::Handshake("bridge closed before ready".into()))
        })
        .await
        .map_err(|_| EngineError::Timeout("waiting for ready".into()))??;

        tracing::info!(identity = %identity, engine_version = %ready, "engine session ready");

        // ── Writer / reader tasks ────────────────────────────────────
        let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(EVENT_BUFFER);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<BridgeFrame>(OUTBOUND_BUFFER);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    f = outbound_rx.recv() => f,
                    _ = writer_closed.cancelled() => None,
                };
                let Some(frame) = frame else { break };
                let last = matches!(frame, BridgeFrame::Close);
                let json = match serde_json::to_string(&frame) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize bridge frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() || last {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        let pong_tx = outbound_tx.clone();
        let reader_identity = identity.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    m = stream.next() => m,
                    _ = reader_closed.cancelled() => break,
                };
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let frame = match serde_json::from_str::<BridgeFrame>(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        tracing::warn!(identity = %reader_identity, error = %e, "unparseable bridge frame");
                        continue;
                    }
                };
                let event = match frame {
                    BridgeFrame::Response {
                        request_id,
                        success,
                        result,
                        error,
                    } => {
                        if let Some(tx) = reader_pending.lock().remove(&request_id) {
                            let outcome = if success {
                                Ok(result)
                            } else {
                                Err(EngineError::Rejected(
                                    error.unwrap_or_else(|| "unspecified error".into()),
                                ))
                            };
                            let _ = tx.send(outcome);
                        } else {
                            tracing::debug!(request_id = %request_id, "response for unknown request");
                        }
                        continue;
                    }
                    BridgeFrame::Ping { timestamp } => {
                        let _ = pong_tx.try_send(BridgeFrame::Pong { timestamp });
                        continue;
                    }
                    BridgeFrame::PairingQr { qr } => {
                        EngineEvent::PairingChallenge(PairingChallenge::Qr(qr))
                    }
                    BridgeFrame::CredsUpdate {
                        credentials,
                        registered,
                    } => EngineEvent::CredentialsUpdated {
                        material: credentials,
                        registered,
                    },
                    BridgeFrame::ConnectionOpen { .. } => EngineEvent::Connected,
                    BridgeFrame::ConnectionClose {
                        status_code,
                        reason,
                    } => EngineEvent::Disconnected(DisconnectReason::from_status(
                        status_code,
                        reason,
                    )),
                    BridgeFrame::Message { message } => EngineEvent::Message(message),
                    BridgeFrame::Ready { .. } | BridgeFrame::Pong { .. } => continue,
                    other => {
                        tracing::debug!(frame = ?other, "unexpected frame from bridge");
                        continue;
                    }
                };
                let terminal = matches!(event, EngineEvent::Disconnected(_));
                if event_tx.send(event).await.is_err() || terminal {
                    break;
                }
            }

            // Fail everything still waiting for a response.
            let drained: Vec<_> = reader_pending.lock().drain().map(|(_, tx)| tx).collect();
            for tx in drained {
                let _ = tx.send(Err(EngineError::Closed));
            }
            reader_closed.cancel();
            tracing::debug!(identity = %reader_identity, "bridge reader stopped");
        });

        Ok(EngineLink {
            session: Arc::new(BridgeSession {
                outbound: outbound_tx,
                pending,
                request_timeout: self.request_timeout,
                closed,
            }),
            events: event_rx,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BridgeSession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct BridgeSession {
    outbound: mpsc::Sender<BridgeFrame>,
    pending: PendingMap,
    request_timeout: Duration,
    closed: CancellationToken,
}

impl BridgeSession {
    async fn request(
        &self,
        build: impl FnOnce(String) -> BridgeFrame,
    ) -> Result<Value, EngineError> {
        if self.closed.is_cancelled() {
            return Err(EngineError::Closed);
        }
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id.clone(), tx);

        if self.outbound.send(build(request_id.clone())).await.is_err() {
            self.pending.lock().remove(&request_id);
            return Err(EngineError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(EngineError::Closed),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                Err(EngineError::Timeout(format!("request {request_id}")))
            }
        }
    }
}

#[async_trait]
impl EngineSession for BridgeSession {
    async fn send_text(&self, to: &str, text: &str) -> Result<(), EngineError> {
        self.request(|request_id| BridgeFrame::SendText {
            request_id,
            to: to.to_string(),
            text: text.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String, EngineError> {
        let result = self
            .request(|request_id| BridgeFrame::RequestPairingCode {
                request_id,
                phone: phone.to_string(),
            })
            .await?;
        result
            .get("code")
            .and_then(Value::as_str)
            .or_else(|| result.as_str())
            .map(str::to_string)
            .ok_or_else(|| EngineError::Protocol("pairing code missing from response".into()))
    }

    async fn logout(&self) -> Result<(), EngineError> {
        self.request(|request_id| BridgeFrame::Logout { request_id })
            .await
            .map(|_| ())
    }

    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        // The writer exits after flushing `close`.
        let _ = self.outbound.send(BridgeFrame::Close).await;
    }
}
