// ⚠️ Error Types - Typed failures surfaced by the engine
//
// Only the fatal kinds live here. Things the engine recovers from locally
// (a pair that fails to score, a duplicate score write, a snapshot field that
// cannot be compared) never become a ReconError.

use crate::model::DatasetKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconError {
    /// Requested dataset version does not exist (or exists under another kind)
    #[error("{kind} dataset not found: {reference}")]
    DatasetNotFound { kind: DatasetKind, reference: String },

    /// Dataset versions are immutable, a tag can only be imported once
    #[error("{kind} dataset tag already exists: {tag}")]
    DatasetTagExists { kind: DatasetKind, tag: String },

    /// Override batch rejected at write time, nothing was persisted
    #[error("override constraint violation for {entity_name}/{jurisdiction}: {reason}")]
    OverrideConstraintViolation {
        entity_name: String,
        jurisdiction: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Import row that cannot be turned into a record
    #[error("{source_name} line {line}: {message}")]
    InvalidRecord {
        source_name: String,
        line: u64,
        message: String,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker pool error: {0}")]
    ThreadPool(String),
}

impl ReconError {
    pub fn dataset_not_found(kind: DatasetKind, reference: impl ToString) -> Self {
        ReconError::DatasetNotFound {
            kind,
            reference: reference.to_string(),
        }
    }

    pub fn override_violation(entity_name: &str, jurisdiction: &str, reason: &str) -> Self {
        ReconError::OverrideConstraintViolation {
            entity_name: entity_name.to_string(),
            jurisdiction: jurisdiction.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_record(source_name: &str, line: u64, message: impl ToString) -> Self {
        ReconError::InvalidRecord {
            source_name: source_name.to_string(),
            line,
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconError::DatasetNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, ReconError>;
