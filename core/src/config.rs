//! Engine configuration.
//!
//! Everything has a sensible default so tests and the demo runner can
//! start with `EngineConfig::default()`. A JSON file can override any
//! field; unknown fields are rejected.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Pending trips older than this are billed at the penalty fare.
    pub penalty_timeout_minutes: i64,
    /// Interval between penalty sweep runs.
    pub penalty_sweep_interval_minutes: u64,
    /// Reference cache snapshot lifetime.
    pub cache_ttl_minutes: u64,
    /// Interval between proactive cache refreshes.
    pub cache_refresh_interval_minutes: u64,
    /// A prior trip for the same card+route within this window makes a
    /// boarding-only event a re-tap candidate.
    pub retap_window_secs: i64,
    /// Within the candidate window, a gap below this is a duplicate tap.
    pub retap_duplicate_secs: i64,
    /// Last-resort base fare when no fare row and no ceiling exist.
    pub default_base_fare: f64,
    /// Monthly accumulation tiers used when no policy rows are
    /// configured: (threshold, rate), checked highest first.
    pub monthly_tiers: Vec<MonthlyTier>,
    /// Hard cap on the per-page size of the trip query API.
    pub max_page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyTier {
    pub threshold: f64,
    pub rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            penalty_timeout_minutes: 120,
            penalty_sweep_interval_minutes: 5,
            cache_ttl_minutes: 10,
            cache_refresh_interval_minutes: 5,
            retap_window_secs: 30,
            retap_duplicate_secs: 10,
            default_base_fare: 2.0,
            monthly_tiers: vec![
                MonthlyTier { threshold: 500.0, rate: 0.5 },
                MonthlyTier { threshold: 200.0, rate: 0.2 },
            ],
            max_page_size: 200,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.penalty_timeout_minutes <= 0 {
            return Err(EngineError::Config(
                "penalty_timeout_minutes must be positive".into(),
            ));
        }
        if self.retap_duplicate_secs > self.retap_window_secs {
            return Err(EngineError::Config(
                "retap_duplicate_secs must not exceed retap_window_secs".into(),
            ));
        }
        if self.default_base_fare < 0.0 {
            return Err(EngineError::Config("default_base_fare must be >= 0".into()));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes * 60)
    }

    pub fn cache_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.cache_refresh_interval_minutes * 60)
    }

    pub fn penalty_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.penalty_sweep_interval_minutes * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.penalty_timeout_minutes, 120);
        assert_eq!(config.monthly_tiers.len(), 2);
    }

    #[test]
    fn rejects_inverted_retap_windows() {
        let config = EngineConfig {
            retap_window_secs: 5,
            retap_duplicate_secs: 10,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
