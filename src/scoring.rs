// 📏 Similarity Scorer - How close is a registry address to ours?
//
// street:   edit similarity of the normalized street lines, suite aware
// locality: share of {city, jurisdiction, postal prefix} that agree
// overall:  0.7·street + 0.3·locality, or 0.5·locality when no street
//           comparison is possible (keeps those pairs below "match")
//
// The entity is the reference side, the registry result the live side.
// Symmetry is not promised.

use crate::config::{ScoringConfig, Thresholds};
use crate::model::{Address, Entity, RegistryResult, Scores, StatusBucket};
use crate::normalize::{normalize_address, normalize_jurisdiction, NormalizedAddress};
use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;

// ============================================================================
// SCORE BREAKDOWN (0.0 - 1.0)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub street: f64,
    pub locality: f64,
    pub overall: f64,
    /// Both sides had a street line
    pub street_compared: bool,
}

impl ScoreBreakdown {
    /// Scale to 0-100, two decimals
    pub fn to_storage(&self) -> Scores {
        Scores {
            overall: to_percent(self.overall),
            street: to_percent(self.street),
            locality: to_percent(self.locality),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.street.is_finite() && self.locality.is_finite() && self.overall.is_finite()
    }
}

fn to_percent(value: f64) -> f64 {
    (value * 100.0 * 100.0).round() / 100.0
}

// ============================================================================
// SIMILARITY SCORER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SimilarityScorer {
    pub config: ScoringConfig,
}

impl SimilarityScorer {
    pub fn new() -> Self {
        SimilarityScorer {
            config: ScoringConfig::default(),
        }
    }

    pub fn with_config(config: ScoringConfig) -> Self {
        SimilarityScorer { config }
    }

    /// Score two already-normalized addresses
    pub fn score(&self, reference: &NormalizedAddress, live: &NormalizedAddress) -> ScoreBreakdown {
        let street = self.street_score(reference, live);
        let locality = locality_score(reference, live);

        let overall = match street {
            Some(street) => {
                self.config.street_weight * street + self.config.locality_weight * locality
            }
            None => self.config.locality_only_weight * locality,
        };

        ScoreBreakdown {
            street: street.unwrap_or(0.0),
            locality,
            overall: overall.clamp(0.0, 1.0),
            street_compared: street.is_some(),
        }
    }

    pub fn score_addresses(&self, reference: &Address, live: &Address) -> ScoreBreakdown {
        self.score(&normalize_address(reference), &normalize_address(live))
    }

    /// Score an entity against one registry result.
    ///
    /// A result without a state in its address is taken to sit in the
    /// jurisdiction it was searched under.
    pub fn score_pair(&self, entity: &Entity, result: &RegistryResult) -> ScoreBreakdown {
        let reference = normalize_address(&entity.address);
        let mut live = normalize_address(&result.address);
        if live.jurisdiction.is_empty() {
            live.jurisdiction = normalize_jurisdiction(&result.jurisdiction);
        }
        self.score(&reference, &live)
    }

    /// None when either side has no street line
    fn street_score(&self, reference: &NormalizedAddress, live: &NormalizedAddress) -> Option<f64> {
        if !reference.has_street() || !live.has_street() {
            return None;
        }

        let mut score = if reference.street == live.street {
            1.0
        } else {
            normalized_levenshtein(&reference.street, &live.street).min(self.config.inexact_cap)
        };

        if let (Some(a), Some(b)) = (&reference.suite, &live.suite) {
            if a == b {
                score = (score + self.config.suite_bonus).min(1.0);
            } else {
                score *= self.config.suite_penalty;
            }
        }

        Some(score)
    }
}

/// Average agreement over the locality fields present on both sides
pub fn locality_score(reference: &NormalizedAddress, live: &NormalizedAddress) -> f64 {
    let pairs = [
        (&reference.city, &live.city),
        (&reference.jurisdiction, &live.jurisdiction),
        (&reference.postal, &live.postal),
    ];

    let mut compared = 0u32;
    let mut equal = 0u32;
    for (a, b) in pairs {
        if a.is_empty() || b.is_empty() {
            continue;
        }
        compared += 1;
        if a == b {
            equal += 1;
        }
    }

    if compared == 0 {
        0.0
    } else {
        equal as f64 / compared as f64
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Bucket for a 0-100 score; absent score is "no data"
pub fn classify(score: Option<f64>, thresholds: &Thresholds) -> StatusBucket {
    match score {
        None => StatusBucket::NoData,
        Some(s) if s >= thresholds.match_min => StatusBucket::Match,
        Some(s) if s >= thresholds.weak_match_min => StatusBucket::WeakMatch,
        Some(_) => StatusBucket::NoMatch,
    }
}

// ============================================================================
// TESTS
// ============================================================================
