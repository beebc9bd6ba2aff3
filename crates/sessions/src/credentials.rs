//! Per-identity credential store.
//!
//! Each identity owns `<session_root>/session_<identity>/`.  The engine may
//! keep whatever it likes in there; the gateway itself persists the latest
//! credential material in `creds.json` so a restart can resume the session
//! without re-pairing.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wg_domain::error::{Error, Result};
use wg_domain::trace::TraceEvent;
use wg_domain::Identity;

use crate::fsutil;

const CREDS_FILE: &str = "creds.json";

/// Authentication state for one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Opaque key material as last reported by the engine.
    #[serde(default)]
    pub material: serde_json::Value,
    /// Set once the identity completed pairing.  Never cleared except by
    /// deleting the record.
    #[serde(default)]
    pub registered: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    fn fresh() -> Self {
        let now = Utc::now();
        Self {
            material: serde_json::Value::Null,
            registered: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Filesystem-backed credential store rooted at `session_root`.
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory handed to the engine for this identity.
    pub fn session_dir(&self, identity: &Identity) -> PathBuf {
        self.root.join(format!("session_{identity}"))
    }

    fn creds_path(&self, identity: &Identity) -> PathBuf {
        self.session_dir(identity).join(CREDS_FILE)
    }

    /// Load the record, or `None` if the identity was never paired (or the
    /// file is unreadable garbage, which forces a fresh pairing).
    pub async fn load(&self, identity: &Identity) -> Result<Option<CredentialRecord>> {
        let path = self.creds_path(identity);
        let Some(raw) = fsutil::read_if_exists(&path).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(
                    identity = %identity,
                    path = %path.display(),
                    error = %e,
                    "corrupt credential record, starting fresh"
                );
                Ok(None)
            }
        }
    }

    /// Load the record, creating an unregistered one on first use.
    pub async fn load_or_create(&self, identity: &Identity) -> Result<CredentialRecord> {
        if let Some(record) = self.load(identity).await? {
            return Ok(record);
        }
        let record = CredentialRecord::fresh();
        self.write(identity, &record).await?;
        tracing::debug!(identity = %identity, "credential record created");
        Ok(record)
    }

    /// Apply a rotation event from the engine.  `registered` only ever moves
    /// from `false` to `true`.
    pub async fn rotate(
        &self,
        identity: &Identity,
        material: serde_json::Value,
        registered: bool,
    ) -> Result<CredentialRecord> {
        let mut record = self
            .load(identity)
            .await?
            .unwrap_or_else(CredentialRecord::fresh);

        let newly_registered = registered && !record.registered;
        record.material = material;
        record.registered |= registered;
        record.updated_at = Utc::now();
        self.write(identity, &record).await?;

        if newly_registered {
            TraceEvent::CredentialsRotated {
                identity: identity.to_string(),
                registered: true,
            }
            .emit();
        }
        Ok(record)
    }

    /// Delete the identity's whole session directory.  Returns whether
    /// anything was removed.
    pub async fn purge(&self, identity: &Identity) -> Result<bool> {
        let removed = fsutil::remove_dir_if_exists(&self.session_dir(identity)).await?;
        if removed {
            tracing::info!(identity = %identity, "credential directory removed");
        }
        Ok(removed)
    }

    /// Whether a credential directory exists for the identity.
    pub async fn exists(&self, identity: &Identity) -> bool {
        tokio::fs::metadata(self.session_dir(identity)).await.is_ok()
    }

    async fn write(&self, identity: &Identity, record: &CredentialRecord) -> Result<()> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| Error::Other(format!("serializing credentials: {e}")))?;
        fsutil::write_atomic(&self.creds_path(identity), &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> Identity {
        Identity::parse("94712345678", 10).unwrap()
    }

    #[tokio::test]
    async fn load_or_create_persists_unregistered_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());

        assert!(store.load(&id()).await.unwrap().is_none());
        let record = store.load_or_create(&id()).await.unwrap();
        assert!(!record.registered);
        assert!(store
            .session_dir(&id())
            .ends_with("session_94712345678"));
        assert!(store.load(&id()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn registered_flag_never_reverts() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());

        let r = store
            .rotate(&id(), serde_json::json!({"k": 1}), true)
            .await
            .unwrap();
        assert!(r.registered);

        let r = store
            .rotate(&id(), serde_json::json!({"k": 2}), false)
            .await
            .unwrap();
        assert!(r.registered);
        assert_eq!(r.material["k"], 2);
    }

    #[tokio::test]
    async fn purge_removes_directory_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        store.load_or_create(&id()).await.unwrap();
        assert!(store.exists(&id()).await);

        assert!(store.purge(&id()).await.unwrap());
        assert!(!store.exists(&id()).await);
        assert!(!store.purge(&id()).await.unwrap());

        let fresh = store.load_or_create(&id()).await.unwrap();
        assert!(!fresh.registered);
    }

    #[tokio::test]
    async fn corrupt_record_is_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let session_dir = store.session_dir(&id());
        tokio::fs::create_dir_all(&session_dir).await.unwrap();
        tokio::fs::write(session_dir.join(CREDS_FILE), b"{not json")
            .await
            .unwrap();

        assert!(store.load(&id()).await.unwrap().is_none());
    }
}
