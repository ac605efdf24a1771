//! # Observatory Configuration
//!
//! Gathers the handful of runtime knobs an observatory process needs
//! (ring capacity, store backend, drop thresholds, log directory/level,
//! rotation policy) into one typed struct, loaded from the environment
//! the way `hkv-server`'s `main.rs` reads `HKV_ADDR` with a fallback
//! default.
//!
//! ## Design Principles
//! 1. **Typed Defaults**: Every knob has a sane default; nothing panics on
//!    a missing environment variable.
//! 2. **Parse-Don't-Validate at the Edge**: Malformed env values fall back
//!    to the default rather than failing process startup.

use std::path::PathBuf;
use std::time::Duration;

/// Backing store for an aggregator's dual heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-memory vector heap; bounded only by process memory.
    Memory,
    /// RocksDB-backed heap; survives populations larger than RAM.
    Disk,
}

impl StoreBackend {
    fn from_env_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Some(StoreBackend::Memory),
            "disk" => Some(StoreBackend::Disk),
            _ => None,
        }
    }
}

/// Warn/drop thresholds for ring-queue backpressure.
#[derive(Debug, Clone, Copy)]
pub struct DropThresholds {
    /// W1: emit a throttled warning once pending backlog crosses this.
    pub warn_low: u64,
    /// W2: escalate the warning once pending backlog crosses this.
    pub warn_high: u64,
    /// D: past this backlog, drop the oldest pending closure.
    pub drop_at: u64,
}

impl Default for DropThresholds {
    fn default() -> Self {
        DropThresholds {
            warn_low: 1000,
            warn_high: 2000,
            drop_at: 3000,
        }
    }
}

/// Process-wide observatory configuration.
#[derive(Debug, Clone)]
pub struct ObservatoryConfig {
    /// Root directory for rotated log files.
    pub log_dir: PathBuf,
    /// Minimum severity filter, as a `tracing` level name.
    pub log_level: String,
    /// How long a dynamically-lowered log level stays in effect before
    /// automatically reverting to `log_level`.
    pub log_level_revert_after: Duration,
    /// `BoundedRingQueue` capacity, per aggregator.
    pub ring_capacity: usize,
    /// `memory` or `disk`, picked per-registry.
    pub store_backend: StoreBackend,
    /// Warn/drop thresholds for queue backpressure.
    pub drop_thresholds: DropThresholds,
    /// Compress rotated logs older than this many days.
    pub compress_after_days: u32,
    /// Delete compressed logs older than this many days.
    pub retain_days: u32,
}

impl Default for ObservatoryConfig {
    fn default() -> Self {
        ObservatoryConfig {
            log_dir: PathBuf::from("./logs"),
            log_level: "info".to_string(),
            log_level_revert_after: Duration::from_secs(600),
            ring_capacity: 10_000,
            store_backend: StoreBackend::Memory,
            drop_thresholds: DropThresholds::default(),
            compress_after_days: 7,
            retain_days: 30,
        }
    }
}

impl ObservatoryConfig {
    /// Builds a config from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = ObservatoryConfig::default();

        if let Ok(dir) = std::env::var("OBS_LOG_DIR") {
            cfg.log_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("OBS_LOG_LEVEL") {
            cfg.log_level = level;
        }
        if let Ok(secs) = std::env::var("OBS_LOG_LEVEL_REVERT_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                cfg.log_level_revert_after = Duration::from_secs(secs);
            }
        }
        if let Ok(cap) = std::env::var("OBS_RING_CAPACITY") {
            if let Ok(cap) = cap.parse::<usize>() {
                cfg.ring_capacity = cap;
            }
        }
        if let Ok(backend) = std::env::var("OBS_STORE_BACKEND") {
            if let Some(backend) = StoreBackend::from_env_str(&backend) {
                cfg.store_backend = backend;
            }
        }
        if let Ok(days) = std::env::var("OBS_COMPRESS_AFTER_DAYS") {
            if let Ok(days) = days.parse::<u32>() {
                cfg.compress_after_days = days;
            }
        }
        if let Ok(days) = std::env::var("OBS_RETAIN_DAYS") {
            if let Ok(days) = days.parse::<u32>() {
                cfg.retain_days = days;
            }
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ObservatoryConfig::default();
        assert_eq!(cfg.ring_capacity, 10_000);
        assert_eq!(cfg.drop_thresholds.warn_low, 1000);
        assert_eq!(cfg.drop_thresholds.warn_high, 2000);
        assert_eq!(cfg.drop_thresholds.drop_at, 3000);
        assert_eq!(cfg.compress_after_days, 7);
        assert_eq!(cfg.retain_days, 30);
        assert!(matches!(cfg.store_backend, StoreBackend::Memory));
    }

    #[test]
    fn store_backend_parses_case_insensitively() {
        assert_eq!(StoreBackend::from_env_str("Disk"), Some(StoreBackend::Disk));
        assert_eq!(StoreBackend::from_env_str("MEMORY"), Some(StoreBackend::Memory));
        assert_eq!(StoreBackend::from_env_str("nope"), None);
    }
}
