//! Grouped-broadcast sink consumed by the fan-out.
//!
//! The real-time hub joins each connected client to groups named after its
//! organization ids; the fan-out only ever addresses groups.

use std::sync::Mutex;

/// Delivery target for real-time notifications.
pub trait BroadcastSink: Send + Sync {
    /// Deliver an event to every client currently joined to the group.
    fn broadcast(&self, group_id: &str, event: &str, payload: serde_json::Value);
}

/// A recorded broadcast, for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEvent {
    pub group_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

/// In-memory sink recording every broadcast, for tests.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<SentEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<SentEvent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl BroadcastSink for RecordingSink {
    fn broadcast(&self, group_id: &str, event: &str, payload: serde_json::Value) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentEvent {
                group_id: group_id.to_string(),
                event: event.to_string(),
                payload,
            });
        }
    }
}
