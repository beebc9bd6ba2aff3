//! Known-numbers directory and the admin allow-list.
//!
//! Both are plain sets of identities behind a [`MembershipStore`], so the
//! JSON files can later be swapped for another backend without touching the
//! callers.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use wg_domain::error::{Error, Result};
use wg_domain::trace::TraceEvent;
use wg_domain::Identity;

use crate::fsutil;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Whole-set persistence for an ordered list of identities.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn load(&self) -> Result<Vec<Identity>>;
    async fn save(&self, members: &[Identity]) -> Result<()>;
}

/// A pretty-printed JSON array of digit strings on disk.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MembershipStore for JsonFileStore {
    async fn load(&self) -> Result<Vec<Identity>> {
        let Some(raw) = fsutil::read_if_exists(&self.path).await? else {
            return Ok(Vec::new());
        };
        let entries: Vec<String> = serde_json::from_slice(&raw).map_err(|e| {
            Error::Other(format!("parsing {}: {e}", self.path.display()))
        })?;

        let mut members: Vec<Identity> = Vec::with_capacity(entries.len());
        for entry in entries {
            match Identity::parse(&entry, 1) {
                Ok(id) if !members.contains(&id) => members.push(id),
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    entry = %entry,
                    error = %e,
                    "skipping invalid entry"
                ),
            }
        }
        Ok(members)
    }

    async fn save(&self, members: &[Identity]) -> Result<()> {
        let json = serde_json::to_vec_pretty(members)?;
        fsutil::write_atomic(&self.path, &json).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only set of every identity that completed a handshake.
pub struct Directory {
    store: Box<dyn MembershipStore>,
    /// Held across the save so whole-file rewrites never interleave.
    members: Mutex<Vec<Identity>>,
}

impl Directory {
    pub async fn open(store: Box<dyn MembershipStore>) -> Result<Self> {
        let members = store.load().await?;
        tracing::info!(known = members.len(), "directory loaded");
        Ok(Self {
            store,
            members: Mutex::new(members),
        })
    }

    /// Append `identity` unless already present.  Returns `true` when it was
    /// added.  On a failed save the in-memory set is left unchanged.
    pub async fn add_if_absent(&self, identity: &Identity) -> Result<bool> {
        let mut members = self.members.lock().await;
        if members.contains(identity) {
            return Ok(false);
        }
        members.push(identity.clone());
        if let Err(e) = self.store.save(&members).await {
            members.pop();
            return Err(e);
        }

        TraceEvent::DirectoryAppended {
            identity: identity.to_string(),
            total: members.len(),
        }
        .emit();
        Ok(true)
    }

    /// Members in insertion order.
    pub async fn list(&self) -> Vec<Identity> {
        self.members.lock().await.clone()
    }

    pub async fn contains(&self, identity: &Identity) -> bool {
        self.members.lock().await.contains(identity)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static allow-list of admin identities, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct AdminSet {
    members: Vec<Identity>,
}

impl AdminSet {
    pub fn new(members: Vec<Identity>) -> Self {
        Self { members }
    }

    /// Load the list; if it is empty and an `owner` is given, persist
    /// `[owner]` as the initial list.
    pub async fn load_or_seed(
        store: &dyn MembershipStore,
        owner: Option<Identity>,
    ) -> Result<Self> {
        let mut members = store.load().await?;
        if members.is_empty() {
            if let Some(owner) = owner {
                store.save(std::slice::from_ref(&owner)).await?;
                tracing::info!(owner = %owner, "admin list seeded with owner");
                members.push(owner);
            }
        }
        Ok(Self { members })
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.members.contains(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Identity {
        Identity::parse(s, 1).unwrap()
    }

    #[tokio::test]
    async fn add_if_absent_is_idempotent_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.json");
        let directory = Directory::open(Box::new(JsonFileStore::new(&path)))
            .await
            .unwrap();

        assert!(directory.add_if_absent(&id("94712345678")).await.unwrap());
        assert!(!directory.add_if_absent(&id("94712345678")).await.unwrap());
        assert!(directory.add_if_absent(&id("94770000000")).await.unwrap());

        let on_disk: Vec<String> =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert_eq!(on_disk, vec!["94712345678", "94770000000"]);

        let reopened = Directory::open(Box::new(JsonFileStore::new(&path)))
            .await
            .unwrap();
        assert_eq!(reopened.list().await.len(), 2);
    }

    #[tokio::test]
    async fn load_skips_invalid_and_duplicate_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("numbers.json");
        tokio::fs::write(&path, br#"["94712345678", "", "+94 71 234 5678", "9477"]"#)
            .await
            .unwrap();

        let members = JsonFileStore::new(&path).load().await.unwrap();
        assert_eq!(members, vec![id("94712345678"), id("9477")]);
    }

    struct FailingStore;

    #[async_trait]
    impl MembershipStore for FailingStore {
        async fn load(&self) -> Result<Vec<Identity>> {
            Ok(Vec::new())
        }
        async fn save(&self, _members: &[Identity]) -> Result<()> {
            Err(Error::Other("disk full".into()))
        }
    }

    #[tokio::test]
    async fn failed_save_leaves_set_unchanged() {
        let directory = Directory::open(Box::new(FailingStore)).await.unwrap();
        assert!(directory.add_if_absent(&id("94712345678")).await.is_err());
        assert!(directory.list().await.is_empty());
    }

    #[tokio::test]
    async fn admin_set_seeds_owner_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("admin.json");
        let store = JsonFileStore::new(&path);

        let admins = AdminSet::load_or_seed(&store, Some(id("94752978237")))
            .await
            .unwrap();
        assert_eq!(admins.len(), 1);
        assert!(admins.contains(&id("94752978237")));
        assert!(path.exists());

        // A populated file wins over the seed.
        tokio::fs::write(&path, br#"["111111", "222222"]"#).await.unwrap();
        let admins = AdminSet::load_or_seed(&store, Some(id("94752978237")))
            .await
            .unwrap();
        assert_eq!(admins.len(), 2);
        assert!(!admins.contains(&id("94752978237")));
    }
}
