// 🗂️ Natural-Key Indexes - Cross-dataset joins without foreign keys
//
// Datasets only link through (name, jurisdiction[, license]) strings so any
// entity version can be combined with any result or override version. Each
// index is built once per call over one loaded dataset version and only read
// afterwards.

use crate::db::canonical_jurisdiction;
use crate::model::{Entity, MatchScore, OverrideRecord, RegistryResult, Scores};
use std::collections::HashMap;

/// (entity name, jurisdiction code)
pub type PairKey = (String, String);

pub fn pair_key(name: &str, jurisdiction: &str) -> PairKey {
    (name.trim().to_string(), canonical_jurisdiction(jurisdiction))
}

// ============================================================================
// ENTITIES
// ============================================================================

pub struct EntityIndex<'a> {
    by_name: HashMap<&'a str, Vec<&'a Entity>>,
    by_id: HashMap<i64, &'a Entity>,
}

impl<'a> EntityIndex<'a> {
    pub fn build(entities: &'a [Entity]) -> Self {
        let mut by_name: HashMap<&'a str, Vec<&'a Entity>> = HashMap::new();
        let mut by_id = HashMap::with_capacity(entities.len());

        for entity in entities {
            by_name.entry(entity.name.trim()).or_default().push(entity);
            by_id.insert(entity.id, entity);
        }

        EntityIndex { by_name, by_id }
    }

    pub fn by_name(&self, name: &str) -> &[&'a Entity] {
        self.by_name.get(name.trim()).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn contains_name(&self, name: &str) -> bool {
        !self.by_name(name).is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&'a Entity> {
        self.by_id.get(&id).copied()
    }
}

// ============================================================================
// REGISTRY RESULTS
// ============================================================================

pub struct ResultIndex<'a> {
    by_pair: HashMap<PairKey, Vec<&'a RegistryResult>>,
    by_id: HashMap<i64, &'a RegistryResult>,
}

impl<'a> ResultIndex<'a> {
    pub fn build(results: &'a [RegistryResult]) -> Self {
        let mut by_pair: HashMap<PairKey, Vec<&'a RegistryResult>> = HashMap::new();
        let mut by_id = HashMap::with_capacity(results.len());

        for result in results {
            by_pair
                .entry(pair_key(&result.search_name, &result.jurisdiction))
                .or_default()
                .push(result);
            by_id.insert(result.id, result);
        }

        ResultIndex { by_pair, by_id }
    }

    /// Every search row (found or empty) for the pair
    pub fn for_pair(&self, name: &str, jurisdiction: &str) -> &[&'a RegistryResult] {
        self.by_pair
            .get(&pair_key(name, jurisdiction))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Live results: rows with status "found"
    pub fn found_for_pair(&self, name: &str, jurisdiction: &str) -> Vec<&'a RegistryResult> {
        self.for_pair(name, jurisdiction)
            .iter()
            .copied()
            .filter(|r| r.is_found())
            .collect()
    }

    /// Live results of the pair carrying the given license number
    pub fn with_license(&self, name: &str, jurisdiction: &str, license_number: &str) -> Vec<&'a RegistryResult> {
        self.for_pair(name, jurisdiction)
            .iter()
            .copied()
            .filter(|r| r.is_found() && r.has_license(license_number))
            .collect()
    }

    pub fn get(&self, id: i64) -> Option<&'a RegistryResult> {
        self.by_id.get(&id).copied()
    }
}

// ============================================================================
// OVERRIDES
// ============================================================================

pub struct OverrideIndex<'a> {
    by_pair: HashMap<PairKey, Vec<&'a OverrideRecord>>,
}

impl<'a> OverrideIndex<'a> {
    pub fn build(overrides: &'a [OverrideRecord]) -> Self {
        let mut by_pair: HashMap<PairKey, Vec<&'a OverrideRecord>> = HashMap::new();
        for o in overrides {
            by_pair
                .entry(pair_key(&o.entity_name, &o.jurisdiction))
                .or_default()
                .push(o);
        }
        OverrideIndex { by_pair }
    }

    pub fn empty() -> Self {
        OverrideIndex { by_pair: HashMap::new() }
    }

    pub fn for_pair(&self, name: &str, jurisdiction: &str) -> &[&'a OverrideRecord] {
        self.by_pair
            .get(&pair_key(name, jurisdiction))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

// ============================================================================
// SCORES
// ============================================================================

pub struct ScoreIndex {
    by_pair: HashMap<(i64, i64), Scores>,
}

impl ScoreIndex {
    pub fn build(scores: &[MatchScore]) -> Self {
        ScoreIndex {
            by_pair: scores
                .iter()
                .map(|s| ((s.entity_id, s.result_id), s.scores))
                .collect(),
        }
    }

    pub fn get(&self, entity_id: i64, result_id: i64) -> Option<Scores> {
        self.by_pair.get(&(entity_id, result_id)).copied()
    }

    pub fn len(&self) -> usize {
        self.by_pair.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pair.is_empty()
    }
}
