use std::sync::Arc;
use std::time::Instant;

use wg_domain::config::Config;
use wg_sessions::{AdminSet, Directory, PairingChannel};

use crate::supervisor::Supervisor;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub supervisor: Arc<Supervisor>,
    pub pairing: Arc<PairingChannel>,
    pub directory: Arc<Directory>,
    pub admins: Arc<AdminSet>,
    /// SHA-256 of the API bearer token; `None` disables auth (dev mode).
    pub api_token_hash: Option<Vec<u8>>,
    pub started_at: Instant,
}
