// 📦 Domain Model - Datasets, records, scores and derived rows
//
// Three record kinds arrive from outside as immutable, tagged dataset
// versions. Nothing links them except natural keys: entity name,
// jurisdiction code and license number.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// DATASET VERSIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    Entities,
    Results,
    Overrides,
}

impl DatasetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Entities => "entities",
            DatasetKind::Results => "results",
            DatasetKind::Overrides => "overrides",
        }
    }

    pub fn all() -> [DatasetKind; 3] {
        [DatasetKind::Entities, DatasetKind::Results, DatasetKind::Overrides]
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "entities" | "entity" => Ok(DatasetKind::Entities),
            "results" | "result" => Ok(DatasetKind::Results),
            "overrides" | "override" => Ok(DatasetKind::Overrides),
            other => Err(format!("unknown dataset kind: {}", other)),
        }
    }
}

/// Surrogate id of a dataset version. Always passed explicitly, there is no
/// process-wide "current" dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetId(pub i64);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetVersion {
    pub id: DatasetId,
    pub kind: DatasetKind,
    pub tag: String,
    /// SHA-256 over the imported rows
    pub content_hash: String,
    pub row_count: i64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// RECORDS
// ============================================================================

/// Mailing / premises address as supplied, before normalization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub address: Option<String>,
    pub suite: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

impl Address {
    pub fn new(address: &str, city: &str, state: &str, zip: &str) -> Self {
        Address {
            address: non_empty(address),
            suite: None,
            city: non_empty(city),
            state: non_empty(state),
            zip: non_empty(zip),
        }
    }

    pub fn with_suite(mut self, suite: &str) -> Self {
        self.suite = non_empty(suite);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.address.is_none()
            && self.suite.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.zip.is_none()
    }
}

/// A regulated business tracked by name and claimed jurisdictions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub dataset_id: DatasetId,
    pub name: String,
    pub address: Address,
    /// Upper-cased two letter codes, sorted, no duplicates
    pub jurisdictions: Vec<String>,
}

impl Entity {
    pub fn claims(&self, jurisdiction: &str) -> bool {
        self.jurisdictions
            .iter()
            .any(|j| j.eq_ignore_ascii_case(jurisdiction))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Found,
    Empty,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Found => "found",
            ResultStatus::Empty => "empty",
        }
    }
}

impl FromStr for ResultStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "found" | "results_found" => Ok(ResultStatus::Found),
            "empty" | "no_results" | "no_results_found" => Ok(ResultStatus::Empty),
            other => Err(format!("unknown result status: {}", other)),
        }
    }
}

/// One row returned by a jurisdiction's public license lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryResult {
    pub id: i64,
    pub dataset_id: DatasetId,
    /// Entity name the search was run for
    pub search_name: String,
    pub jurisdiction: String,
    pub license_number: Option<String>,
    pub license_type: Option<String>,
    pub license_status: Option<String>,
    pub issue_date: Option<String>,
    pub expiration_date: Option<String>,
    /// Business name as printed by the registry
    pub business_name: Option<String>,
    pub address: Address,
    pub status: ResultStatus,
    pub timestamp: DateTime<Utc>,
}

impl RegistryResult {
    pub fn is_found(&self) -> bool {
        self.status == ResultStatus::Found
    }

    pub fn has_license(&self, license_number: &str) -> bool {
        self.license_number
            .as_deref()
            .map_or(false, |l| l.trim().eq_ignore_ascii_case(license_number.trim()))
    }
}

// ============================================================================
// SCORES
// ============================================================================

/// Scores on the 0-100 storage scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub overall: f64,
    pub street: f64,
    pub locality: f64,
}

/// Persisted score of one (entity, result) pair under one dataset pair.
/// Written once, never recomputed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchScore {
    pub result_dataset: DatasetId,
    pub entity_dataset: DatasetId,
    pub entity_id: i64,
    pub result_id: i64,
    #[serde(flatten)]
    pub scores: Scores,
    pub computed_at: DateTime<Utc>,
}

// ============================================================================
// OVERRIDES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideType {
    /// Reviewer confirmed a specific license belongs to the entity
    Present,
    /// Reviewer confirmed the registry has nothing for the entity
    Empty,
}

impl OverrideType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideType::Present => "present",
            OverrideType::Empty => "empty",
        }
    }
}

impl FromStr for OverrideType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "present" => Ok(OverrideType::Present),
            "empty" => Ok(OverrideType::Empty),
            other => Err(format!("unknown override type: {}", other)),
        }
    }
}

/// Fields of the matched result as they were when the override was recorded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverrideSnapshot {
    pub address: Address,
    pub license_status: Option<String>,
    pub issue_date: Option<String>,
    pub expiration_date: Option<String>,
}

impl OverrideSnapshot {
    pub fn of_result(result: &RegistryResult) -> Self {
        OverrideSnapshot {
            address: result.address.clone(),
            license_status: result.license_status.clone(),
            issue_date: result.issue_date.clone(),
            expiration_date: result.expiration_date.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub id: i64,
    pub dataset_id: DatasetId,
    pub entity_name: String,
    pub jurisdiction: String,
    pub license_number: Option<String>,
    pub override_type: OverrideType,
    pub reason: Option<String>,
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    pub snapshot: OverrideSnapshot,
}

// ============================================================================
// IMPORT INPUTS (records before they belong to a dataset version)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityInput {
    pub name: String,
    pub address: Address,
    pub jurisdictions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultInput {
    pub search_name: String,
    pub jurisdiction: String,
    pub license_number: Option<String>,
    pub license_type: Option<String>,
    pub license_status: Option<String>,
    pub issue_date: Option<String>,
    pub expiration_date: Option<String>,
    pub business_name: Option<String>,
    pub address: Address,
    pub status: ResultStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideInput {
    pub entity_name: String,
    pub jurisdiction: String,
    pub license_number: Option<String>,
    pub override_type: OverrideType,
    pub reason: Option<String>,
    pub author: Option<String>,
    pub snapshot: OverrideSnapshot,
}

impl OverrideInput {
    /// "Present" override capturing the live result's fields as the snapshot
    pub fn present_from_result(
        entity_name: &str,
        result: &RegistryResult,
        reason: Option<String>,
        author: Option<String>,
    ) -> Self {
        OverrideInput {
            entity_name: entity_name.to_string(),
            jurisdiction: result.jurisdiction.clone(),
            license_number: result.license_number.clone(),
            override_type: OverrideType::Present,
            reason,
            author,
            snapshot: OverrideSnapshot::of_result(result),
        }
    }

    /// "Empty" override: the reviewer found nothing for this pair
    pub fn empty(entity_name: &str, jurisdiction: &str, reason: Option<String>, author: Option<String>) -> Self {
        OverrideInput {
            entity_name: entity_name.to_string(),
            jurisdiction: jurisdiction.to_string(),
            license_number: None,
            override_type: OverrideType::Empty,
            reason,
            author,
            snapshot: OverrideSnapshot::default(),
        }
    }
}

// ============================================================================
// DERIVED ROWS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBucket {
    Match,
    WeakMatch,
    NoMatch,
    NoData,
}

impl StatusBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusBucket::Match => "match",
            StatusBucket::WeakMatch => "weak match",
            StatusBucket::NoMatch => "no match",
            StatusBucket::NoData => "no data",
        }
    }
}

impl fmt::Display for StatusBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One live result considered for an (entity, jurisdiction) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub result: RegistryResult,
    pub scores: Option<Scores>,
}

impl Candidate {
    pub fn overall(&self) -> Option<f64> {
        self.scores.map(|s| s.overall)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedOverride {
    pub override_id: i64,
    pub override_type: OverrideType,
    pub license_number: Option<String>,
    pub reason: Option<String>,
    pub author: Option<String>,
    /// Live result the override's license number resolved to
    pub matched_result_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciledRow {
    pub entity_id: i64,
    pub entity_name: String,
    pub jurisdiction: String,
    pub status: StatusBucket,
    /// Score of the selected result, if it has one
    pub score: Option<f64>,
    pub selected_result_id: Option<i64>,
    /// Every live result for the pair, best first
    pub candidates: Vec<Candidate>,
    pub applied_override: Option<AppliedOverride>,
    /// Whether any search (found or empty) was recorded for the pair
    pub searched: bool,
    pub warnings: Vec<Warning>,
}

impl ReconciledRow {
    pub fn selected(&self) -> Option<&Candidate> {
        let id = self.selected_result_id?;
        self.candidates.iter().find(|c| c.result.id == id)
    }
}

// ============================================================================
// WARNINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    /// W1: "empty" override but a live found result exists
    EmptyOverrideHasLiveResult,
    /// W2: "present" override whose license no live result carries
    OverrideLicenseMissing,
    /// W3: snapshot differs from the live result
    SnapshotDrift,
    /// W4: override names an entity the entity dataset does not have
    UnknownEntity,
}

impl WarningCode {
    pub fn code(&self) -> &'static str {
        match self {
            WarningCode::EmptyOverrideHasLiveResult => "W1",
            WarningCode::OverrideLicenseMissing => "W2",
            WarningCode::SnapshotDrift => "W3",
            WarningCode::UnknownEntity => "W4",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            WarningCode::UnknownEntity => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: String,
    /// None when the live result no longer carries the field
    pub new: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Warning {
    pub code: WarningCode,
    pub severity: Severity,
    pub entity_name: String,
    pub jurisdiction: String,
    pub license_number: Option<String>,
    pub override_id: i64,
    pub message: String,
    pub changes: Vec<FieldChange>,
}

impl Warning {
    pub fn changed_fields(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.field.as_str()).collect()
    }
}

/// Trimmed string or None when blank
pub fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
