// ⏱️ Lazy Scoring Scheduler - Fill the score cache in bounded batches
//
// The first access to an (entity dataset, result dataset) combination scores
// every missing pair; afterwards the combination is served from the
// match_scores table alone. Dataset versions are immutable, so a completed
// run never goes stale.
//
// Per batch:
//   1. score the pairs in parallel on a bounded rayon pool
//   2. commit the successful scores in one transaction (upsert by key)
//   3. log and count pairs that failed, they stay unscored
//
// A crash mid-batch loses only that batch; rerunning picks it up again.

use crate::config::{ReconConfig, MAX_BATCH_SIZE};
use crate::db::{self, get_dataset, load_entities, load_results, scored_pairs, ScoreRun};
use crate::error::{ReconError, Result};
use crate::index::{EntityIndex, ResultIndex};
use crate::missing::missing_pairs;
use crate::model::{DatasetId, DatasetKind, MatchScore};
use crate::scoring::SimilarityScorer;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// RUN STATISTICS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreRunStats {
    /// Newly persisted scores
    pub scored: usize,
    /// Pairs that could not be scored this run
    pub failed: usize,
    pub batches: usize,
    /// Stopped early by the caller
    pub cancelled: bool,
}

/// Why a single pair was left unscored
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PairFailure {
    #[error("entity {0} is not part of the loaded entity dataset")]
    UnknownEntity(i64),

    #[error("result {0} is not part of the loaded result dataset")]
    UnknownResult(i64),

    #[error("scorer produced a non-finite value")]
    NonFinite,
}

// ============================================================================
// SCHEDULER
// ============================================================================

pub struct ScoringScheduler {
    scorer: SimilarityScorer,
    batch_size: usize,
    workers: usize,
}

impl ScoringScheduler {
    pub fn new(config: &ReconConfig) -> Self {
        ScoringScheduler {
            scorer: SimilarityScorer::with_config(config.scoring.clone()),
            batch_size: config.scheduler.batch_size.clamp(1, MAX_BATCH_SIZE),
            workers: config.scheduler.workers,
        }
    }

    /// Clamped to `1..=MAX_BATCH_SIZE`
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Score every missing pair of the combination
    pub fn compute_scores(
        &self,
        conn: &Connection,
        entity_dataset: DatasetId,
        result_dataset: DatasetId,
    ) -> Result<ScoreRunStats> {
        self.compute_scores_until(conn, entity_dataset, result_dataset, || true)
    }

    /// Like `compute_scores`, asking `should_continue` before each batch.
    /// Batches already committed stay valid when it says stop.
    pub fn compute_scores_until<F>(
        &self,
        conn: &Connection,
        entity_dataset: DatasetId,
        result_dataset: DatasetId,
        mut should_continue: F,
    ) -> Result<ScoreRunStats>
    where
        F: FnMut() -> bool,
    {
        get_dataset(conn, DatasetKind::Entities, entity_dataset)?;
        get_dataset(conn, DatasetKind::Results, result_dataset)?;

        let entities = load_entities(conn, entity_dataset)?;
        let results = load_results(conn, result_dataset)?;
        let already_scored = scored_pairs(conn, entity_dataset, result_dataset)?;
        let missing = missing_pairs(&entities, &results, &already_scored);

        let mut stats = ScoreRunStats::default();

        if missing.is_empty() {
            tracing::debug!(
                entity_dataset = entity_dataset.0,
                result_dataset = result_dataset.0,
                "no missing pairs"
            );
        } else {
            tracing::info!(
                entity_dataset = entity_dataset.0,
                result_dataset = result_dataset.0,
                missing = missing.len(),
                batch_size = self.batch_size,
                "scoring missing pairs"
            );

            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()
                .map_err(|e| ReconError::ThreadPool(e.to_string()))?;

            let entity_index = EntityIndex::build(&entities);
            let result_index = ResultIndex::build(&results);

            for batch in missing.chunks(self.batch_size) {
                if !should_continue() {
                    stats.cancelled = true;
                    tracing::info!(batches = stats.batches, "scoring stopped by caller");
                    break;
                }

                let computed_at = Utc::now();
                let outcomes: Vec<((i64, i64), std::result::Result<MatchScore, PairFailure>)> =
                    pool.install(|| {
                        batch
                            .par_iter()
                            .map(|&(entity_id, result_id)| {
                                let outcome = self.score_one(
                                    &entity_index,
                                    &result_index,
                                    entity_dataset,
                                    result_dataset,
                                    (entity_id, result_id),
                                    computed_at,
                                );
                                ((entity_id, result_id), outcome)
                            })
                            .collect()
                    });

                let mut scores = Vec::with_capacity(outcomes.len());
                for ((entity_id, result_id), outcome) in outcomes {
                    match outcome {
                        Ok(score) => scores.push(score),
                        Err(e) => {
                            stats.failed += 1;
                            tracing::warn!(entity_id, result_id, error = %e, "pair left unscored");
                        }
                    }
                }

                let inserted = db::insert_scores(conn, &scores)?;
                stats.scored += inserted;
                stats.batches += 1;

                tracing::info!(
                    batch = stats.batches,
                    inserted,
                    failed = stats.failed,
                    "committed score batch"
                );
            }
        }

        if !stats.cancelled {
            db::record_score_run(
                conn,
                &ScoreRun {
                    entity_dataset,
                    result_dataset,
                    scored: stats.scored as i64,
                    failed: stats.failed as i64,
                    completed_at: Utc::now(),
                },
            )?;
        }

        Ok(stats)
    }

    /// Compute on first access only. Returns the run statistics when work
    /// was done, None when the combination was already complete.
    pub fn ensure_scored(
        &self,
        conn: &Connection,
        entity_dataset: DatasetId,
        result_dataset: DatasetId,
    ) -> Result<Option<ScoreRunStats>> {
        if let Some(run) = db::get_score_run(conn, entity_dataset, result_dataset)? {
            tracing::debug!(
                entity_dataset = entity_dataset.0,
                result_dataset = result_dataset.0,
                completed_at = %run.completed_at,
                "scores served from cache"
            );
            return Ok(None);
        }

        self.compute_scores(conn, entity_dataset, result_dataset).map(Some)
    }

    fn score_one(
        &self,
        entities: &EntityIndex,
        results: &ResultIndex,
        entity_dataset: DatasetId,
        result_dataset: DatasetId,
        (entity_id, result_id): (i64, i64),
        computed_at: DateTime<Utc>,
    ) -> std::result::Result<MatchScore, PairFailure> {
        let entity = entities
            .get(entity_id)
            .ok_or(PairFailure::UnknownEntity(entity_id))?;
        let result = results
            .get(result_id)
            .ok_or(PairFailure::UnknownResult(result_id))?;

        let breakdown = self.scorer.score_pair(entity, result);
        if !breakdown.is_finite() {
            return Err(PairFailure::NonFinite);
        }

        Ok(MatchScore {
            result_dataset,
            entity_dataset,
            entity_id,
            result_id,
            scores: breakdown.to_storage(),
            computed_at,
        })
    }
}

// ============================================================================
// FUNCTION-LEVEL CONTRACT
// ============================================================================

/// Score every missing pair of the combination in batches of `batch_size`
pub fn compute_scores(
    conn: &Connection,
    entity_dataset: DatasetId,
    result_dataset: DatasetId,
    batch_size: usize,
    config: &ReconConfig,
) -> Result<ScoreRunStats> {
    ScoringScheduler::new(config)
        .with_batch_size(batch_size)
        .compute_scores(conn, entity_dataset, result_dataset)
}

/// Lazy trigger used by readers: scores the combination on first access
pub fn ensure_scored(
    conn: &Connection,
    entity_dataset: DatasetId,
    result_dataset: DatasetId,
    config: &ReconConfig,
) -> Result<Option<ScoreRunStats>> {
    ScoringScheduler::new(config).ensure_scored(conn, entity_dataset, result_dataset)
}
