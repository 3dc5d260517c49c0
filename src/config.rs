//! Runtime settings loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `FAULTLINE_CONFIG` environment variable (path to TOML file)
//! 2. `faultline.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Components take their [`Settings`] by value at construction so tests can
//! run with divergent configurations; embedders that want a process-wide
//! config can use `config::init()` / `config::get()`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::OnceLock;

/// Runtime settings for the ingestion core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Master switch for outbound real-time notifications. When false every
    /// notification method is a silent no-op.
    pub enable_realtime: bool,
    /// Minimum interval between notifications for the same organization.
    pub notification_throttle_secs: u64,
    /// TTL for the point-lookup and derived-set caches.
    pub cache_ttl_secs: u64,
    /// Page size for batched stack deletion during project removal.
    pub delete_batch_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_realtime: true,
            notification_throttle_secs: 5,
            cache_ttl_secs: 300,
            delete_batch_size: 150,
        }
    }
}

impl Settings {
    /// Load settings following the documented loading order. Falls back to
    /// defaults when no file is found; a malformed file is an error.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var("FAULTLINE_CONFIG") {
            return Self::from_file(&path);
        }

        let local = Path::new("faultline.toml");
        if local.exists() {
            return Self::from_file(local);
        }

        tracing::debug!("no config file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let settings: Self = toml::from_str(&raw)?;
        tracing::info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }
}

/// Global settings, initialized once at startup.
static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Initialize the global settings. Later calls are ignored with a warning.
pub fn init(settings: Settings) {
    if SETTINGS.set(settings).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get the global settings, or defaults if `init()` was never called.
pub fn get() -> &'static Settings {
    SETTINGS.get_or_init(Settings::default)
}

pub fn is_initialized() -> bool {
    SETTINGS.get().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert!(s.enable_realtime);
        assert_eq!(s.notification_throttle_secs, 5);
        assert_eq!(s.cache_ttl_secs, 300);
        assert_eq!(s.delete_batch_size, 150);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let s: Settings = toml::from_str("enable_realtime = false").unwrap();
        assert!(!s.enable_realtime);
        assert_eq!(s.delete_batch_size, 150);
    }
}
