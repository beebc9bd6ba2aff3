//! Shared types for wagate: configuration, the error type, the session
//! [`Identity`](identity::Identity) and structured trace events.

pub mod config;
pub mod error;
pub mod identity;
pub mod trace;

pub use identity::Identity;
