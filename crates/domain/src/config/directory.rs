use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directory (known numbers + admin allow-list)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// JSON array of every identity that ever completed a handshake.
    #[serde(default = "d_numbers_path")]
    pub numbers_path: PathBuf,
    /// JSON array of admin identities notified on every new link.
    #[serde(default = "d_admins_path")]
    pub admins_path: PathBuf,
    /// Bot owner; seeds `admins_path` when the file does not exist and is
    /// shown by the `.owner` command.
    #[serde(default = "d_owner")]
    pub owner_number: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            numbers_path: d_numbers_path(),
            admins_path: d_admins_path(),
            owner_number: d_owner(),
        }
    }
}

fn d_numbers_path() -> PathBuf {
    PathBuf::from("./numbers.json")
}
fn d_admins_path() -> PathBuf {
    PathBuf::from("./admin.json")
}
fn d_owner() -> String {
    "94752978237".into()
}
