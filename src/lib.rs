//! faultline: ingestion and aggregation core for an error-tracking service.
//!
//! Incoming error reports flow through an ordered, cancellable pipeline
//! ([`pipeline`]) that fingerprints each report, deduplicates it into an
//! aggregate stack ([`repository`], [`store`]), and publishes a real-time
//! notification on the message bus ([`bus`]). The notification layer
//! ([`notify`]) consumes that traffic and fans it out to grouped clients
//! with per-organization throttling and a self-healing listener.

pub mod bus;
pub mod cache;
pub mod config;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod repository;
pub mod stats;
pub mod store;
pub mod types;

pub use pipeline::{ErrorPipeline, EventContext};
pub use repository::{ErrorRepository, StackRepository};
pub use types::{Error, ErrorStack, StackInfo};
