//! Pairing channel: turns an engine pairing challenge into a servable
//! artifact (rendered QR image + JSON payload) keyed by identity.
//!
//! Only the latest challenge for an identity is meaningful.  Issuing a new
//! one overwrites the image; issuing a code removes any stale image so an
//! old QR can never be served.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use wg_domain::error::{Error, Result};
use wg_domain::trace::TraceEvent;
use wg_domain::Identity;

use crate::fsutil;

/// Smallest edge of the rendered QR image, in pixels.
const QR_MIN_DIMENSION: u32 = 300;

/// A pairing challenge as emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingChallenge {
    /// Payload to encode as a scannable QR image.
    Qr(String),
    /// Short code typed on the phone ("link with phone number").
    Code(String),
}

impl PairingChallenge {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Qr(_) => "qr",
            Self::Code(_) => "code",
        }
    }
}

/// A challenge waiting to be claimed by the user.
#[derive(Debug, Clone)]
pub struct PendingArtifact {
    pub identity: Identity,
    pub challenge: PairingChallenge,
    /// Rendered image on disk (QR challenges only).
    pub image_path: Option<PathBuf>,
    pub issued_at: DateTime<Utc>,
}

impl PendingArtifact {
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.issued_at);
        age.to_std().map(|age| age >= ttl).unwrap_or(false)
    }

    /// Response body for `POST /connect`.
    pub fn payload(&self) -> PairingPayload {
        let (qr, code) = match &self.challenge {
            PairingChallenge::Qr(qr) => (Some(qr.clone()), None),
            PairingChallenge::Code(code) => (None, Some(code.clone())),
        };
        PairingPayload {
            success: true,
            qr,
            code,
            qr_image: self
                .image_path
                .as_ref()
                .map(|_| format!("/qr/{}", self.identity)),
            number: self.identity.to_string(),
        }
    }
}

/// `{success, qr|code, qrImage?, number}`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PairingPayload {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "qrImage", skip_serializing_if = "Option::is_none")]
    pub qr_image: Option<String>,
    pub number: String,
}

/// Renders and serves pairing artifacts under `qr_root`.
pub struct PairingChannel {
    root: PathBuf,
}

impl PairingChannel {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic image location for an identity.
    pub fn image_path(&self, identity: &Identity) -> PathBuf {
        self.root.join(format!("{identity}.png"))
    }

    /// Materialize a challenge, replacing whatever was issued before.
    pub async fn issue(
        &self,
        identity: &Identity,
        challenge: PairingChallenge,
    ) -> Result<PendingArtifact> {
        let path = self.image_path(identity);
        let image_path = match &challenge {
            PairingChallenge::Qr(payload) => {
                let payload = payload.clone();
                let png = tokio::task::spawn_blocking(move || render_qr_png(&payload))
                    .await
                    .map_err(|e| Error::Render(format!("render task failed: {e}")))??;
                fsutil::write_atomic(&path, &png).await?;
                Some(path)
            }
            PairingChallenge::Code(_) => {
                fsutil::remove_file_if_exists(&path).await?;
                None
            }
        };

        TraceEvent::PairingIssued {
            identity: identity.to_string(),
            kind: challenge.kind().into(),
        }
        .emit();

        Ok(PendingArtifact {
            identity: identity.clone(),
            challenge,
            image_path,
            issued_at: Utc::now(),
        })
    }

    /// The rendered image, if one is on disk.
    pub async fn read_image(&self, identity: &Identity) -> Result<Option<Vec<u8>>> {
        fsutil::read_if_exists(&self.image_path(identity)).await
    }

    /// Drop the rendered image.  Missing files are fine.
    pub async fn discard(&self, identity: &Identity) -> Result<()> {
        if fsutil::remove_file_if_exists(&self.image_path(identity)).await? {
            tracing::debug!(identity = %identity, "pairing image discarded");
        }
        Ok(())
    }
}

/// Encode `payload` as a black-on-white QR code PNG.
pub fn render_qr_png(payload: &str) -> Result<Vec<u8>> {
    let code = qrcode::QrCode::new(payload.as_bytes())
        .map_err(|e| Error::Render(format!("encoding QR payload: {e}")))?;
    let pixels = code
        .render::<image::Luma<u8>>()
        .min_dimensions(QR_MIN_DIMENSION, QR_MIN_DIMENSION)
        .build();

    let mut png = Cursor::new(Vec::new());
    image::DynamicImage::ImageLuma8(pixels)
        .write_to(&mut png, image::ImageFormat::Png)
        .map_err(|e| Error::Render(format!("encoding PNG: {e}")))?;
    Ok(png.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    fn id() -> Identity {
        Identity::parse("94712345678", 10).unwrap()
    }

    #[test]
    fn renders_png() {
        let png = render_qr_png("2@abc,def,ghi").unwrap();
        assert!(png.starts_with(PNG_MAGIC));
    }

    #[tokio::test]
    async fn qr_challenge_writes_image_and_payload() {
        let dir = tempfile::tempdir().unwrap();
        let channel = PairingChannel::new(dir.path());

        let artifact = channel
            .issue(&id(), PairingChallenge::Qr("2@first".into()))
            .await
            .unwrap();
        assert_eq!(artifact.image_path.as_deref(), Some(channel.image_path(&id()).as_path()));

        let payload = artifact.payload();
        assert_eq!(payload.qr.as_deref(), Some("2@first"));
        assert_eq!(payload.qr_image.as_deref(), Some("/qr/94712345678"));
        assert_eq!(payload.number, "94712345678");

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["qrImage"], "/qr/94712345678");
        assert!(json.get("code").is_none());

        let bytes = channel.read_image(&id()).await.unwrap().unwrap();
        assert!(bytes.starts_with(PNG_MAGIC));
    }

    #[tokio::test]
    async fn code_challenge_removes_stale_image() {
        let dir = tempfile::tempdir().unwrap();
        let channel = PairingChannel::new(dir.path());

        channel
            .issue(&id(), PairingChallenge::Qr("2@old".into()))
            .await
            .unwrap();
        let artifact = channel
            .issue(&id(), PairingChallenge::Code("ABCD-EFGH".into()))
            .await
            .unwrap();

        assert!(artifact.image_path.is_none());
        assert!(channel.read_image(&id()).await.unwrap().is_none());
        let payload = artifact.payload();
        assert_eq!(payload.code.as_deref(), Some("ABCD-EFGH"));
        assert!(payload.qr_image.is_none());
    }

    #[tokio::test]
    async fn discard_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let channel = PairingChannel::new(dir.path());
        channel
            .issue(&id(), PairingChallenge::Qr("2@x".into()))
            .await
            .unwrap();

        channel.discard(&id()).await.unwrap();
        channel.discard(&id()).await.unwrap();
        assert!(channel.read_image(&id()).await.unwrap().is_none());
    }

    #[test]
    fn expiry_uses_issue_time() {
        let artifact = PendingArtifact {
            identity: id(),
            challenge: PairingChallenge::Qr("2@x".into()),
            image_path: None,
            issued_at: Utc::now() - chrono::Duration::seconds(90),
        };
        assert!(artifact.is_expired(Duration::from_secs(60), Utc::now()));
        assert!(!artifact.is_expired(Duration::from_secs(120), Utc::now()));
    }
}
