// Chat-transport seam. The real messenger client lives outside this
// crate; everything here is the surface the core needs from it.

use async_trait::async_trait;

/// Classified result of a single direct send. Returned, never thrown:
/// the broadcast engine turns these into aggregate counts and a single
/// recipient can never abort a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The recipient has opted out / blocked the sender.
    Blocked,
    /// The recipient is no longer resolvable (deleted account, dead peer).
    Unreachable,
    /// Any other failure, with a short description for the logs.
    Failed(String),
}

/// A message the core wants delivered. Kept independent of any inbound
/// transport shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    /// Optional link rendered as a button/footer by the transport.
    pub link: Option<Link>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Link {
    pub label: String,
    pub url: String,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            link: None,
        }
    }

    pub fn with_link(text: impl Into<String>, label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            link: Some(Link {
                label: label.into(),
                url: url.into(),
            }),
        }
    }
}

/// An encoded contact-file artifact ready for distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactArtifact {
    pub file_name: String,
    pub content: Vec<u8>,
    /// Caption shown alongside the uploaded file.
    pub caption: String,
}

/// Stable reference to an uploaded artifact at the distribution
/// destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocator {
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("upload to {destination} failed: {reason}")]
    UploadFailed { destination: String, reason: String },
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Deliver a direct message, classifying the outcome. Implementations
    /// must map their error zoo onto `SendOutcome` instead of returning
    /// errors here.
    async fn send_direct(&self, recipient: i64, message: &OutboundMessage) -> SendOutcome;

    /// Upload an artifact to the distribution destination, returning a
    /// stable locator participants can follow.
    async fn upload_artifact(
        &self,
        destination: &str,
        artifact: &ContactArtifact,
    ) -> Result<ArtifactLocator, TransportError>;
}
