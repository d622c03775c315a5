// Registry Reconciliation & Scoring Engine - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;      // Tunable constants (TOML)
pub mod consistency; // Override vs live data checks (W1-W4)
pub mod db;          // SQLite storage: dataset versions, scores, events
pub mod error;
pub mod export;      // Table / JSON / CSV output
pub mod import;      // CSV loaders
pub mod index;       // Natural-key joins across dataset versions
pub mod missing;     // Unscored pair discovery
pub mod model;
pub mod normalize;   // Address normalizer
pub mod reconcile;   // Override reconciler
pub mod scheduler;   // Lazy batched scoring
pub mod scoring;     // Similarity scorer

// Re-export commonly used types
pub use config::{ReconConfig, SchedulerConfig, ScoringConfig, Thresholds};
pub use consistency::{check_consistency, check_records, snapshot_changes};
pub use db::{
    Event, ScoreRun,
    open_database, setup_database,
    import_entities, import_results, import_overrides,
    load_entities, load_results, load_overrides, load_scores,
    get_dataset, resolve_dataset, list_datasets,
    insert_event, get_events_for_subject,
};
pub use error::{ReconError, Result};
pub use export::{OutputFormat, ReconSummary};
pub use missing::find_missing;
pub use model::{
    Address, Candidate, DatasetId, DatasetKind, DatasetVersion,
    Entity, EntityInput, RegistryResult, ResultInput, ResultStatus,
    MatchScore, Scores,
    OverrideInput, OverrideRecord, OverrideSnapshot, OverrideType,
    ReconciledRow, StatusBucket, Warning, WarningCode, Severity, FieldChange,
};
pub use normalize::{normalize_address, NormalizedAddress};
pub use reconcile::{reconcile, Reconciler};
pub use scheduler::{compute_scores, ensure_scored, ScoreRunStats, ScoringScheduler};
pub use scoring::{classify, ScoreBreakdown, SimilarityScorer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
