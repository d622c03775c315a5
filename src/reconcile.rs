// 🔄 Override Reconciler - One row per (entity, claimed jurisdiction)
//
// Status priority for a pair:
//   1. "empty" override                     → no data, no selection
//   2. "present" override, license matched  → that result, bucket by its score
//   3. "present" override, license missing  → no data
//   4. no override, best result unscored    → no data
//   5. no override, best result scored      → bucket by score
//
// Reconciliation is a pure read: it triggers lazy scoring for the dataset
// pair but never writes anything else.

use crate::config::{ReconConfig, Thresholds};
use crate::consistency::{check_pair, sort_warnings};
use crate::db::{get_dataset, load_entities, load_overrides, load_results, load_scores};
use crate::error::Result;
use crate::index::{OverrideIndex, ResultIndex, ScoreIndex};
use crate::model::{
    AppliedOverride, Candidate, DatasetId, DatasetKind, Entity, MatchScore, OverrideRecord, OverrideType,
    ReconciledRow, RegistryResult, StatusBucket,
};
use crate::scheduler::ensure_scored;
use crate::scoring::classify;
use rusqlite::Connection;
use std::cmp::Ordering;

// ============================================================================
// DATASET-LEVEL RECONCILIATION
// ============================================================================

/// Reconcile an entity dataset against a result dataset, optionally applying
/// an override dataset. Rows are ordered by (entity name, entity id,
/// jurisdiction).
pub fn reconcile(
    conn: &Connection,
    entity_dataset: DatasetId,
    result_dataset: DatasetId,
    override_dataset: Option<DatasetId>,
    config: &ReconConfig,
) -> Result<Vec<ReconciledRow>> {
    get_dataset(conn, DatasetKind::Entities, entity_dataset)?;
    get_dataset(conn, DatasetKind::Results, result_dataset)?;
    if let Some(id) = override_dataset {
        get_dataset(conn, DatasetKind::Overrides, id)?;
    }

    if let Some(stats) = ensure_scored(conn, entity_dataset, result_dataset, config)? {
        tracing::info!(scored = stats.scored, failed = stats.failed, "scored on first access");
    }

    let entities = load_entities(conn, entity_dataset)?;
    let results = load_results(conn, result_dataset)?;
    let overrides = match override_dataset {
        Some(id) => load_overrides(conn, id)?,
        None => Vec::new(),
    };
    let scores = load_scores(conn, entity_dataset, result_dataset)?;

    let rows = Reconciler::new(&config.thresholds).reconcile_records(&entities, &results, &overrides, &scores);
    tracing::info!(
        entity_dataset = entity_dataset.0,
        result_dataset = result_dataset.0,
        rows = rows.len(),
        "reconciliation finished"
    );
    Ok(rows)
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct Reconciler<'t> {
    thresholds: &'t Thresholds,
}

impl<'t> Reconciler<'t> {
    pub fn new(thresholds: &'t Thresholds) -> Self {
        Reconciler { thresholds }
    }

    pub fn reconcile_records(
        &self,
        entities: &[Entity],
        results: &[RegistryResult],
        overrides: &[OverrideRecord],
        scores: &[MatchScore],
    ) -> Vec<ReconciledRow> {
        let result_index = ResultIndex::build(results);
        let override_index = OverrideIndex::build(overrides);
        let score_index = ScoreIndex::build(scores);

        let mut ordered: Vec<&Entity> = entities.iter().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let mut rows = Vec::new();
        for entity in ordered {
            let mut jurisdictions: Vec<&String> = entity.jurisdictions.iter().collect();
            jurisdictions.sort();
            jurisdictions.dedup();
            for jurisdiction in jurisdictions {
                rows.push(self.reconcile_pair(entity, jurisdiction, &result_index, &override_index, &score_index));
            }
        }
        rows
    }

    pub fn reconcile_pair(
        &self,
        entity: &Entity,
        jurisdiction: &str,
        results: &ResultIndex,
        overrides: &OverrideIndex,
        scores: &ScoreIndex,
    ) -> ReconciledRow {
        let mut candidates: Vec<Candidate> = results
            .found_for_pair(&entity.name, jurisdiction)
            .into_iter()
            .map(|r| Candidate {
                result: r.clone(),
                scores: scores.get(entity.id, r.id),
            })
            .collect();
        candidates.sort_by(rank_candidates);

        let pair_overrides = overrides.for_pair(&entity.name, jurisdiction);
        let mut warnings = check_pair(pair_overrides, results);
        sort_warnings(&mut warnings);

        let (status, selected, applied_override) = match select_override(pair_overrides, &candidates) {
            Some((o, matched)) => {
                let applied = AppliedOverride {
                    override_id: o.id,
                    override_type: o.override_type,
                    license_number: o.license_number.clone(),
                    reason: o.reason.clone(),
                    author: o.author.clone(),
                    matched_result_id: matched.map(|c| c.result.id),
                };
                let status = match (o.override_type, matched) {
                    (OverrideType::Empty, _) | (OverrideType::Present, None) => StatusBucket::NoData,
                    (OverrideType::Present, Some(c)) => classify(c.overall(), self.thresholds),
                };
                let selected = if o.override_type == OverrideType::Present { matched } else { None };
                (status, selected, Some(applied))
            }
            None => {
                let best = candidates.first();
                (classify(best.and_then(|c| c.overall()), self.thresholds), best, None)
            }
        };

        ReconciledRow {
            entity_id: entity.id,
            entity_name: entity.name.clone(),
            jurisdiction: jurisdiction.to_string(),
            status,
            score: selected.and_then(|c| c.overall()),
            selected_result_id: selected.map(|c| c.result.id),
            applied_override,
            searched: !results.for_pair(&entity.name, jurisdiction).is_empty(),
            warnings,
            candidates,
        }
    }
}

/// Scored before unscored, higher score, newer search, lower id
fn rank_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    let by_score = match (a.overall(), b.overall()) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_score
        .then_with(|| b.result.timestamp.cmp(&a.result.timestamp))
        .then_with(|| a.result.id.cmp(&b.result.id))
}

/// Pick the override that governs a pair, with the candidate its license
/// resolved to.
///
/// An "empty" override always wins. Among several "present" overrides the
/// one whose matched result scores highest is applied (ties and unscored
/// matches fall back to the lowest override id); if none matches, the lowest
/// id is applied.
fn select_override<'o, 'c>(
    overrides: &[&'o OverrideRecord],
    candidates: &'c [Candidate],
) -> Option<(&'o OverrideRecord, Option<&'c Candidate>)> {
    if let Some(empty) = overrides
        .iter()
        .filter(|o| o.override_type == OverrideType::Empty)
        .min_by_key(|o| o.id)
    {
        return Some((*empty, None));
    }

    let mut present: Vec<(&'o OverrideRecord, Option<&'c Candidate>)> = overrides
        .iter()
        .filter(|o| o.override_type == OverrideType::Present)
        .map(|o| {
            let license = o.license_number.as_deref().unwrap_or("");
            let matched = candidates.iter().find(|c| c.result.has_license(license));
            (*o, matched)
        })
        .collect();

    present.sort_by(|(a, ma), (b, mb)| {
        let score = |m: &Option<&Candidate>| m.map(|c| c.overall().unwrap_or(f64::NEG_INFINITY));
        match (score(ma), score(mb)) {
            (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.id.cmp(&b.id))
    });

    present.into_iter().next()
}
