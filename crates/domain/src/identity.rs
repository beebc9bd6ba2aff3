//! Session identity derived from a user-supplied phone number.
//!
//! An [`Identity`] is the digits of the number with every other character
//! stripped (`"+94 71-234 5678"` → `"94712345678"`).  It keys the credential
//! directory, the rendered pairing image and the directory entry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest number allowed by E.164.
pub const MAX_IDENTITY_LEN: usize = 15;

/// Suffix of a direct chat address on the chat network.
pub const USER_JID_SUFFIX: &str = "@s.whatsapp.net";

/// A normalized, validated digits-only session key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Normalize `raw` and enforce the length policy.
    pub fn parse(raw: &str, min_len: usize) -> Result<Self> {
        let digits = normalize(raw);
        if digits.is_empty() {
            return Err(Error::InvalidIdentity("number required".into()));
        }
        if digits.len() < min_len {
            return Err(Error::InvalidIdentity(format!(
                "number must have at least {min_len} digits (got {})",
                digits.len()
            )));
        }
        if digits.len() > MAX_IDENTITY_LEN {
            return Err(Error::InvalidIdentity(format!(
                "number must have at most {MAX_IDENTITY_LEN} digits (got {})",
                digits.len()
            )));
        }
        Ok(Self(digits))
    }

    /// Recover the identity behind a chat address such as
    /// `94712345678:12@s.whatsapp.net` (device suffix dropped).
    ///
    /// No length policy is applied; senders are whoever the network says.
    pub fn from_jid(jid: &str) -> Option<Self> {
        let user = jid.split('@').next().unwrap_or_default();
        let user = user.split(':').next().unwrap_or_default();
        let digits = normalize(user);
        (!digits.is_empty()).then_some(Self(digits))
    }

    /// The direct-chat address for this identity.
    pub fn jid(&self) -> String {
        format!("{}{USER_JID_SUFFIX}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip everything that is not an ASCII digit.
pub fn normalize(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_formatting() {
        let id = Identity::parse("+94 71-234 5678", 10).unwrap();
        assert_eq!(id.as_str(), "94712345678");
    }

    #[test]
    fn rejects_short_numbers() {
        let err = Identity::parse("123", 10).unwrap_err();
        assert!(matches!(err, Error::InvalidIdentity(_)));
    }

    #[test]
    fn rejects_empty_and_letters_only() {
        assert!(Identity::parse("", 10).is_err());
        assert!(Identity::parse("abc-def", 1).is_err());
    }

    #[test]
    fn rejects_overlong_numbers() {
        assert!(Identity::parse("1234567890123456", 10).is_err());
        assert!(Identity::parse("123456789012345", 10).is_ok());
    }

    #[test]
    fn jid_roundtrip_drops_device_suffix() {
        let id = Identity::parse("94712345678", 10).unwrap();
        assert_eq!(id.jid(), "94712345678@s.whatsapp.net");
        let sender = Identity::from_jid("94712345678:7@s.whatsapp.net").unwrap();
        assert_eq!(sender, id);
    }

    #[test]
    fn from_jid_rejects_non_numeric_users() {
        assert!(Identity::from_jid("status@broadcast").is_none());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = Identity::parse("94712345678", 10).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"94712345678\"");
    }
}
