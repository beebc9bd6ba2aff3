//! Persistent per-identity state for wagate.
//!
//! - [`CredentialStore`]: authentication material under
//!   `session_root/session_<identity>/`, surviving restarts.
//! - [`PairingChannel`]: rendered pairing artifacts under `qr_root`.
//! - [`Directory`] / [`AdminSet`]: known numbers and the admin allow-list,
//!   behind the swappable [`MembershipStore`].

pub mod credentials;
pub mod directory;
mod fsutil;
pub mod pairing;

pub use credentials::{CredentialRecord, CredentialStore};
pub use directory::{AdminSet, Directory, JsonFileStore, MembershipStore};
pub use pairing::{PairingChallenge, PairingChannel, PairingPayload, PendingArtifact};
