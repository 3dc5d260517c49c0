//! Stats sink: named-counter increments for observability signals.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Well-known counter names.
pub mod stat_names {
    /// Incremented when a pipeline run ends cancelled. An observability
    /// signal, not an error.
    pub const ERRORS_PROCESSING_CANCELLED: &str = "errors.processing.cancelled";
}

/// Named-counter sink consumed by the pipeline engine.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks.
pub trait StatsClient: Send + Sync {
    /// Increment the named counter by one.
    fn counter(&self, name: &str);
}

/// In-memory counter sink for tests and minimal deployments.
#[derive(Default)]
pub struct InMemoryStats {
    counters: DashMap<String, Arc<AtomicU64>>,
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 if never incremented).
    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl StatsClient for InMemoryStats {
    fn counter(&self, name: &str) {
        self.counters
            .entry(name.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }
}
