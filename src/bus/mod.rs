//! Message bus collaborator: named channels, at-least-once delivery to
//! active subscribers, nothing guaranteed to disconnected ones.
//!
//! All notification traffic shares one well-known channel
//! ([`NOTIFICATION_CHANNEL`]); the message grammar lives in
//! [`crate::notify::BusMessage`].

use dashmap::DashMap;
use tokio::sync::broadcast;

/// Channel shared by every message kind the fan-out understands.
pub const NOTIFICATION_CHANNEL: &str = "faultline:notifications";

/// Buffered messages per subscriber before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("publish failed on channel {channel}: {reason}")]
    Publish { channel: String, reason: String },
    #[error("subscribe failed on channel {channel}: {reason}")]
    Subscribe { channel: String, reason: String },
}

/// Process-wide publish/subscribe channel.
///
/// `subscribe` hands back a receiver owned by the caller; dropping it
/// disconnects the subscriber.
pub trait MessageBus: Send + Sync {
    /// Publish a message. Publishing with no active subscribers succeeds.
    fn publish(&self, channel: &str, message: &str) -> Result<(), BusError>;

    fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, BusError>;
}

/// In-memory bus backed by one tokio broadcast channel per name.
#[derive(Default)]
pub struct InMemoryBus {
    channels: DashMap<String, broadcast::Sender<String>>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl MessageBus for InMemoryBus {
    fn publish(&self, channel: &str, message: &str) -> Result<(), BusError> {
        // send() errors only when there are no receivers, which matches the
        // no-delivery-to-disconnected contract.
        let _ = self.sender(channel).send(message.to_string());
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, BusError> {
        Ok(self.sender(channel).subscribe())
    }
}
