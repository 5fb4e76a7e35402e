//! Engine configuration.

use canopy_core::{Limits, DEFAULT_MAX_DEPTH, DEFAULT_PATTERN_CACHE_CAPACITY};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Default number of capabilities the store retains.
pub const DEFAULT_STORE_CAPACITY: usize = 8_192;

/// Default bound on concurrent single-flight derivations.
pub const DEFAULT_MAX_INFLIGHT: usize = 1_024;

/// Default maximum validity window: 30 days in milliseconds.
pub const DEFAULT_MAX_VALIDITY_MS: i64 = 30 * 24 * 60 * 60 * 1_000;

/// Default sweep interval for the expiry sweeper: 60 seconds.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;

/// Tunable limits for one engine instance.
///
/// Loadable from TOML; every field has a default, so a partial file (or
/// none at all) is fine. Validate after loading - zero capacities and
/// non-positive windows are configuration mistakes, not degenerate modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum segments in an identity or pattern.
    pub max_depth: usize,
    /// Capacity of the compiled-pattern cache.
    pub pattern_cache_capacity: usize,
    /// Capacity of the issued-capability LRU.
    pub store_capacity: usize,
    /// Bound on concurrent single-flight derivations.
    pub max_inflight: usize,
    /// Longest validity window the authority will grant, in milliseconds.
    pub max_validity_ms: i64,
    /// Interval between expiry sweeps, in milliseconds.
    pub sweep_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            pattern_cache_capacity: DEFAULT_PATTERN_CACHE_CAPACITY,
            store_capacity: DEFAULT_STORE_CAPACITY,
            max_inflight: DEFAULT_MAX_INFLIGHT,
            max_validity_ms: DEFAULT_MAX_VALIDITY_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document; missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Storage`] for TOML syntax or unknown-field
    /// errors, or whatever [`EngineConfig::validate`] rejects.
    pub fn from_toml_str(input: &str) -> EngineResult<Self> {
        let config: Self =
            toml::from_str(input).map_err(|e| EngineError::Storage(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Policy`] naming the offending field.
    pub fn validate(&self) -> EngineResult<()> {
        fn refuse(reason: &str) -> EngineResult<()> {
            Err(EngineError::Policy {
                reason: reason.to_owned(),
            })
        }

        if self.max_depth == 0 {
            return refuse("max_depth must be at least 1");
        }
        if self.pattern_cache_capacity == 0 {
            return refuse("pattern_cache_capacity must be at least 1");
        }
        if self.store_capacity == 0 {
            return refuse("store_capacity must be at least 1");
        }
        if self.max_inflight == 0 {
            return refuse("max_inflight must be at least 1");
        }
        if self.max_validity_ms <= 0 {
            return refuse("max_validity_ms must be positive");
        }
        if self.sweep_interval_ms == 0 {
            return refuse("sweep_interval_ms must be positive");
        }
        Ok(())
    }

    /// The parse limits implied by this configuration.
    #[must_use]
    pub fn limits(&self) -> Limits {
        Limits {
            max_depth: self.max_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_depth, 8);
        assert_eq!(config.pattern_cache_capacity, 4_096);
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let config = EngineConfig::from_toml_str("max_depth = 4\n").unwrap();
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.store_capacity, DEFAULT_STORE_CAPACITY);
        assert_eq!(config.limits().max_depth, 4);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(EngineConfig::from_toml_str("max_dpeth = 4\n").is_err());
    }

    #[test]
    fn test_rejects_zero_capacities() {
        for bad in [
            "max_depth = 0",
            "pattern_cache_capacity = 0",
            "store_capacity = 0",
            "max_inflight = 0",
            "max_validity_ms = 0",
            "max_validity_ms = -5",
            "sweep_interval_ms = 0",
        ] {
            assert!(
                matches!(
                    EngineConfig::from_toml_str(bad),
                    Err(EngineError::Policy { .. })
                ),
                "accepted {bad:?}"
            );
        }
    }
}
