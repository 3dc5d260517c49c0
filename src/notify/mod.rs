//! Notification fan-out: re-publishes bus traffic to grouped real-time
//! clients with per-organization throttling and a self-healing listener.

mod message;
mod sender;
mod sink;

pub use message::{BusMessage, LimitScope};
pub use sender::NotificationSender;
pub use sink::{BroadcastSink, RecordingSink};
