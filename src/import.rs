// 📥 CSV Import - Header-based loaders for the three record kinds
//
// Columns are matched by header name, unknown columns are ignored and
// missing optional columns read as blank.
//
// entities:  name, address, suite, city, state, zip, jurisdictions
//            (jurisdictions separated by ';', '|' or ',')
// results:   search_name, jurisdiction, license_number, license_type,
//            license_status, issue_date, expiration_date, business_name,
//            address, suite, city, state, zip, status, timestamp
// overrides: entity_name, jurisdiction, override_type, license_number,
//            reason, author, then the snapshot: address, suite, city, state,
//            zip, license_status, issue_date, expiration_date

use crate::error::{ReconError, Result};
use crate::model::{
    non_empty, Address, EntityInput, OverrideInput, OverrideSnapshot, OverrideType, ResultInput, ResultStatus,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::ReaderBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

// ============================================================================
// CSV ROWS
// ============================================================================

// csv does not support #[serde(flatten)], each row type lists the address
// columns itself
macro_rules! address_of {
    ($row:expr) => {
        Address {
            address: $row.address.as_deref().and_then(non_empty),
            suite: $row.suite.as_deref().and_then(non_empty),
            city: $row.city.as_deref().and_then(non_empty),
            state: $row.state.as_deref().and_then(non_empty),
            zip: $row.zip.as_deref().and_then(non_empty),
        }
    };
}

#[derive(Debug, Deserialize)]
struct EntityCsvRow {
    name: String,
    #[serde(default)]
    jurisdictions: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    suite: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    zip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultCsvRow {
    search_name: String,
    jurisdiction: String,
    #[serde(default)]
    license_number: Option<String>,
    #[serde(default)]
    license_type: Option<String>,
    #[serde(default)]
    license_status: Option<String>,
    #[serde(default)]
    issue_date: Option<String>,
    #[serde(default)]
    expiration_date: Option<String>,
    #[serde(default)]
    business_name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    suite: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    zip: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OverrideCsvRow {
    entity_name: String,
    jurisdiction: String,
    override_type: String,
    #[serde(default)]
    license_number: Option<String>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    license_status: Option<String>,
    #[serde(default)]
    issue_date: Option<String>,
    #[serde(default)]
    expiration_date: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    suite: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    zip: Option<String>,
}

// ============================================================================
// LOADERS
// ============================================================================

pub fn load_entities_csv(path: &Path) -> Result<Vec<EntityInput>> {
    read_entities(File::open(path)?, &source_name(path))
}

pub fn load_results_csv(path: &Path) -> Result<Vec<ResultInput>> {
    read_results(File::open(path)?, &source_name(path))
}

pub fn load_overrides_csv(path: &Path) -> Result<Vec<OverrideInput>> {
    read_overrides(File::open(path)?, &source_name(path))
}

pub fn read_entities<R: Read>(reader: R, source: &str) -> Result<Vec<EntityInput>> {
    read_rows(reader, source, |row: EntityCsvRow, _line| {
        Ok(EntityInput {
            name: row.name.trim().to_string(),
            jurisdictions: split_jurisdictions(row.jurisdictions.as_deref().unwrap_or("")),
            address: address_of!(row),
        })
    })
}

pub fn read_results<R: Read>(reader: R, source: &str) -> Result<Vec<ResultInput>> {
    read_rows(reader, source, |row: ResultCsvRow, line| {
        let status = match row.status.as_deref().and_then(non_empty) {
            Some(s) => s
                .parse::<ResultStatus>()
                .map_err(|e| ReconError::invalid_record(source, line, e))?,
            None if row.license_number.as_deref().and_then(non_empty).is_some() => ResultStatus::Found,
            None => ResultStatus::Empty,
        };

        let timestamp = match row.timestamp.as_deref().and_then(non_empty) {
            Some(ts) => parse_timestamp(&ts)
                .ok_or_else(|| ReconError::invalid_record(source, line, format!("bad timestamp: {}", ts)))?,
            None => return Err(ReconError::invalid_record(source, line, "missing timestamp")),
        };

        Ok(ResultInput {
            search_name: row.search_name.trim().to_string(),
            jurisdiction: row.jurisdiction.trim().to_string(),
            license_number: row.license_number.as_deref().and_then(non_empty),
            license_type: row.license_type.as_deref().and_then(non_empty),
            license_status: row.license_status.as_deref().and_then(non_empty),
            issue_date: row.issue_date.as_deref().and_then(non_empty),
            expiration_date: row.expiration_date.as_deref().and_then(non_empty),
            business_name: row.business_name.as_deref().and_then(non_empty),
            address: address_of!(row),
            status,
            timestamp,
        })
    })
}

pub fn read_overrides<R: Read>(reader: R, source: &str) -> Result<Vec<OverrideInput>> {
    read_rows(reader, source, |row: OverrideCsvRow, line| {
        let override_type = row
            .override_type
            .parse::<OverrideType>()
            .map_err(|e| ReconError::invalid_record(source, line, e))?;

        Ok(OverrideInput {
            entity_name: row.entity_name.trim().to_string(),
            jurisdiction: row.jurisdiction.trim().to_string(),
            license_number: row.license_number.as_deref().and_then(non_empty),
            override_type,
            reason: row.reason.as_deref().and_then(non_empty),
            author: row.author.as_deref().and_then(non_empty),
            snapshot: OverrideSnapshot {
                address: address_of!(row),
                license_status: row.license_status.as_deref().and_then(non_empty),
                issue_date: row.issue_date.as_deref().and_then(non_empty),
                expiration_date: row.expiration_date.as_deref().and_then(non_empty),
            },
        })
    })
}

fn read_rows<R, Row, T, F>(reader: R, source: &str, mut convert: F) -> Result<Vec<T>>
where
    R: Read,
    Row: DeserializeOwned,
    F: FnMut(Row, u64) -> Result<T>,
{
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for (line_num, row) in reader.deserialize::<Row>().enumerate() {
        // +2 because: 1-indexed + header row
        let line = line_num as u64 + 2;
        let row = row.map_err(|e| ReconError::invalid_record(source, line, e))?;
        records.push(convert(row, line)?);
    }

    tracing::debug!(source, rows = records.len(), "read csv");
    Ok(records)
}

// ============================================================================
// HELPERS
// ============================================================================

fn source_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown.csv")
        .to_string()
}

/// "FL; GA|tx" → ["FL", "GA", "tx"]
pub fn split_jurisdictions(value: &str) -> Vec<String> {
    value
        .split([';', '|', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// RFC3339, "YYYY-MM-DD HH:MM:SS" (UTC) or a bare date (midnight UTC)
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }

    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.and_utc());
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc())
}
