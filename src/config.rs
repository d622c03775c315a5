// ⚙️ Configuration - Scoring constants, thresholds, scheduler bounds
//
// All of it is optional TOML; an empty file gives the defaults below.
//
// ```toml
// [scoring]
// inexact_cap = 0.9
// suite_bonus = 0.1
// suite_penalty = 0.8
//
// [thresholds]
// match_min = 85.0
// weak_match_min = 60.0
//
// [scheduler]
// batch_size = 500
// workers = 4
// ```

use crate::error::{ReconError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub scoring: ScoringConfig,
    pub thresholds: Thresholds,
    pub scheduler: SchedulerConfig,
}

/// Heuristic constants of the similarity scorer. Not derived from anything,
/// kept tunable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Ceiling for street lines that are similar but not identical
    pub inexact_cap: f64,
    /// Added when both sides carry the same suite
    pub suite_bonus: f64,
    /// Multiplier when both sides carry different suites
    pub suite_penalty: f64,
    pub street_weight: f64,
    pub locality_weight: f64,
    /// Weight of locality when no street comparison was possible
    pub locality_only_weight: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            inexact_cap: 0.9,
            suite_bonus: 0.1,
            suite_penalty: 0.8,
            street_weight: 0.7,
            locality_weight: 0.3,
            locality_only_weight: 0.5,
        }
    }
}

/// Bucket boundaries on the 0-100 scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub match_min: f64,
    pub weak_match_min: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            match_min: 85.0,
            weak_match_min: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    /// Scoring threads per batch (0 = one per core)
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            batch_size: 500,
            workers: 4,
        }
    }
}

/// Upper bound on a single batch
pub const MAX_BATCH_SIZE: usize = 50_000;

impl ReconConfig {
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: ReconConfig =
            toml::from_str(toml_str).map_err(|e| ReconError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.scoring;
        for (name, value) in [
            ("scoring.inexact_cap", s.inexact_cap),
            ("scoring.suite_bonus", s.suite_bonus),
            ("scoring.suite_penalty", s.suite_penalty),
            ("scoring.street_weight", s.street_weight),
            ("scoring.locality_weight", s.locality_weight),
            ("scoring.locality_only_weight", s.locality_only_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ReconError::InvalidConfig(format!(
                    "{} must be within 0.0..=1.0, got {}",
                    name, value
                )));
            }
        }

        if (s.street_weight + s.locality_weight - 1.0).abs() > 1e-9 {
            return Err(ReconError::InvalidConfig(format!(
                "scoring.street_weight + scoring.locality_weight must equal 1.0, got {}",
                s.street_weight + s.locality_weight
            )));
        }

        let t = &self.thresholds;
        if !(0.0..=100.0).contains(&t.weak_match_min)
            || !(0.0..=100.0).contains(&t.match_min)
            || t.weak_match_min > t.match_min
        {
            return Err(ReconError::InvalidConfig(format!(
                "thresholds must satisfy 0 <= weak_match_min ({}) <= match_min ({}) <= 100",
                t.weak_match_min, t.match_min
            )));
        }

        let b = self.scheduler.batch_size;
        if b == 0 || b > MAX_BATCH_SIZE {
            return Err(ReconError::InvalidConfig(format!(
                "scheduler.batch_size must be within 1..={}, got {}",
                MAX_BATCH_SIZE, b
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = ReconConfig::from_toml("").unwrap();
        assert_eq!(config, ReconConfig::default());
        assert_eq!(config.scoring.inexact_cap, 0.9);
        assert_eq!(config.thresholds.match_min, 85.0);
        assert_eq!(config.scheduler.batch_size, 500);
    }

    #[test]
    fn test_partial_override() {
        let config = ReconConfig::from_toml(
            r#"
[scoring]
suite_penalty = 0.5

[scheduler]
batch_size = 10
"#,
        )
        .unwrap();

        assert_eq!(config.scoring.suite_penalty, 0.5);
        assert_eq!(config.scoring.suite_bonus, 0.1);
        assert_eq!(config.scheduler.batch_size, 10);
        assert_eq!(config.scheduler.workers, 4);
    }

    #[test]
    fn test_rejects_zero_batch() {
        let err = ReconConfig::from_toml("[scheduler]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, ReconError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let err = ReconConfig::from_toml("[thresholds]\nmatch_min = 50.0\nweak_match_min = 70.0\n")
            .unwrap_err();
        assert!(err.to_string().contains("weak_match_min"));
    }

    #[test]
    fn test_rejects_weights_not_summing_to_one() {
        let err = ReconConfig::from_toml("[scoring]\nstreet_weight = 0.9\n").unwrap_err();
        assert!(matches!(err, ReconError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(ReconConfig::from_toml("[scoring\n").is_err());
    }
}
