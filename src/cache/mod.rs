//! Cache collaborator: typed get/set-with-TTL/remove over opaque string keys.
//!
//! Callers build their own keys (point lookups, derived-set suffixes,
//! throttle markers). Reads are optimistic and best-effort: a miss never
//! blocks on a peer populating the same key, and redundant recomputation
//! under a stampede is an accepted, bounded cost.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Key-value cache consumed by the repository and the notification fan-out.
///
/// Values cross the boundary as JSON so implementations stay payload-agnostic.
/// A failed read (absent, expired, or undecodable) is simply a miss.
pub trait CacheClient: Send + Sync {
    fn get_value(&self, key: &str) -> Option<serde_json::Value>;

    /// Store a value, expiring after `ttl` if one is given.
    fn set_value(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>);

    /// Remove a key. Removing an absent key is a no-op.
    fn remove(&self, key: &str);
}

impl dyn CacheClient + '_ {
    /// Typed read. Undecodable entries are treated as misses.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(key, error = %e, "cache entry undecodable, treating as miss");
                None
            }
        }
    }

    /// Typed write. Unserializable values are dropped with a debug log.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_value(value) {
            Ok(v) => self.set_value(key, v, ttl),
            Err(e) => tracing::debug!(key, error = %e, "cache value unserializable, skipping"),
        }
    }
}

/// In-memory cache for tests and minimal deployments.
///
/// Expiry is lazy: entries are dropped when a read finds them stale.
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, (serde_json::Value, Option<Instant>)>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (possibly stale) entries, for tests.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheClient for InMemoryCache {
    fn get_value(&self, key: &str) -> Option<serde_json::Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => match entry.1 {
                Some(deadline) if Instant::now() >= deadline => true,
                _ => return Some(entry.0.clone()),
            },
            None => return None,
        };

        if expired {
            self.entries.remove(key);
        }
        None
    }

    fn set_value(&self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key.to_string(), (value, deadline));
    }

    fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}
