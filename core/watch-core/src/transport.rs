//! Push transport seam.
//!
//! Handshake, encoding and reconnect policy belong to the adapter. The
//! engine sees four request operations, a version query, and an event
//! stream it attaches to once at startup.

use async_trait::async_trait;
use merchant_watch_protocol::{MerchantGroupPayload, PushMessage, SightingId};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is disconnected")]
    Disconnected,
    #[error("transport request failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    GroupUpdate {
        server: String,
        group: MerchantGroupPayload,
    },
    VoteTotal {
        sighting_id: SightingId,
        vote_total: i32,
    },
    /// The connection dropped and came back; pushes in between are lost.
    Reconnected,
}

impl From<PushMessage> for TransportEvent {
    fn from(message: PushMessage) -> Self {
        match message {
            PushMessage::UpdateMerchantGroup { server, group } => {
                TransportEvent::GroupUpdate { server, group }
            }
            PushMessage::UpdateVoteTotal {
                sighting_id,
                vote_total,
            } => TransportEvent::VoteTotal {
                sighting_id,
                vote_total,
            },
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Handle for one registered event callback. Dropping it unregisters.
pub struct Subscription {
    label: &'static str,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(label: &'static str, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            label,
            release: Some(Box::new(release)),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::debug!(subscription = self.label, "Releasing transport subscription");
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("label", &self.label)
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, server: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, server: &str) -> Result<(), TransportError>;

    async fn request_snapshot(
        &self,
        server: &str,
    ) -> Result<Vec<MerchantGroupPayload>, TransportError>;

    /// True when the server requires a client newer than `client_version`.
    async fn has_newer_client(&self, client_version: u32) -> Result<bool, TransportError>;

    /// Starts delivering pushes and connection notices to `events`. The
    /// returned handles are held by the engine and dropped together on
    /// shutdown.
    fn attach(&self, events: EventSender) -> Vec<Subscription>;
}
