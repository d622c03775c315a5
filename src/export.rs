// 📤 Export - Reconciled rows and warnings as table, JSON or CSV

use crate::error::Result;
use crate::model::{ReconciledRow, StatusBucket, Warning};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::Write;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconSummary {
    pub total: usize,
    pub matched: usize,
    pub weak_match: usize,
    pub no_match: usize,
    pub no_data: usize,
    pub overridden: usize,
    pub with_warnings: usize,
}

impl ReconSummary {
    pub fn of(rows: &[ReconciledRow]) -> Self {
        let mut summary = ReconSummary {
            total: rows.len(),
            ..Default::default()
        };

        for row in rows {
            match row.status {
                StatusBucket::Match => summary.matched += 1,
                StatusBucket::WeakMatch => summary.weak_match += 1,
                StatusBucket::NoMatch => summary.no_match += 1,
                StatusBucket::NoData => summary.no_data += 1,
            }
            if row.applied_override.is_some() {
                summary.overridden += 1;
            }
            if !row.warnings.is_empty() {
                summary.with_warnings += 1;
            }
        }

        summary
    }

    pub fn line(&self) -> String {
        format!(
            "{} rows: {} match, {} weak match, {} no match, {} no data ({} overridden, {} with warnings)",
            self.total,
            self.matched,
            self.weak_match,
            self.no_match,
            self.no_data,
            self.overridden,
            self.with_warnings
        )
    }
}

// ============================================================================
// RECONCILED ROWS
// ============================================================================

/// Flat CSV shape of a reconciled row
#[derive(Debug, Serialize)]
struct RowRecord<'a> {
    entity_id: i64,
    entity_name: &'a str,
    jurisdiction: &'a str,
    status: &'static str,
    score: Option<f64>,
    result_id: Option<i64>,
    license_number: Option<&'a str>,
    license_status: Option<&'a str>,
    business_name: Option<&'a str>,
    candidates: usize,
    searched: bool,
    override_type: Option<&'static str>,
    override_id: Option<i64>,
    warnings: String,
}

impl<'a> RowRecord<'a> {
    fn from_row(row: &'a ReconciledRow) -> Self {
        let selected = row.selected().map(|c| &c.result);
        RowRecord {
            entity_id: row.entity_id,
            entity_name: &row.entity_name,
            jurisdiction: &row.jurisdiction,
            status: row.status.as_str(),
            score: row.score,
            result_id: row.selected_result_id,
            license_number: selected.and_then(|r| r.license_number.as_deref()),
            license_status: selected.and_then(|r| r.license_status.as_deref()),
            business_name: selected.and_then(|r| r.business_name.as_deref()),
            candidates: row.candidates.len(),
            searched: row.searched,
            override_type: row.applied_override.as_ref().map(|o| o.override_type.as_str()),
            override_id: row.applied_override.as_ref().map(|o| o.override_id),
            warnings: warning_codes(&row.warnings),
        }
    }
}

pub fn write_rows<W: Write>(rows: &[ReconciledRow], format: OutputFormat, out: &mut W) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, rows)?;
            writeln!(out)?;
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(out);
            for row in rows {
                writer.serialize(RowRecord::from_row(row))?;
            }
            writer.flush()?;
        }
        OutputFormat::Table => {
            out.write_all(rows_table(rows).as_bytes())?;
        }
    }
    Ok(())
}

pub fn rows_table(rows: &[ReconciledRow]) -> String {
    let mut table = String::new();
    let _ = writeln!(
        table,
        "{:<32} {:<4} {:<11} {:>7}  {:<14} {:<9} {}",
        "ENTITY", "JUR", "STATUS", "SCORE", "LICENSE", "OVERRIDE", "WARNINGS"
    );

    for row in rows {
        let record = RowRecord::from_row(row);
        let _ = writeln!(
            table,
            "{:<32} {:<4} {:<11} {:>7}  {:<14} {:<9} {}",
            truncate(record.entity_name, 32),
            record.jurisdiction,
            record.status,
            record.score.map(|s| format!("{:.2}", s)).unwrap_or_else(|| "-".to_string()),
            truncate(record.license_number.unwrap_or("-"), 14),
            record.override_type.unwrap_or("-"),
            record.warnings,
        );
    }

    let _ = writeln!(table, "\n{}", ReconSummary::of(rows).line());
    table
}

// ============================================================================
// WARNINGS
// ============================================================================

#[derive(Debug, Serialize)]
struct WarningRecord<'a> {
    code: &'static str,
    severity: &'static str,
    entity_name: &'a str,
    jurisdiction: &'a str,
    license_number: Option<&'a str>,
    override_id: i64,
    message: &'a str,
    changes: String,
}

pub fn write_warnings<W: Write>(warnings: &[Warning], format: OutputFormat, out: &mut W) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, warnings)?;
            writeln!(out)?;
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(out);
            for w in warnings {
                writer.serialize(WarningRecord {
                    code: w.code.code(),
                    severity: w.severity.as_str(),
                    entity_name: &w.entity_name,
                    jurisdiction: &w.jurisdiction,
                    license_number: w.license_number.as_deref(),
                    override_id: w.override_id,
                    message: &w.message,
                    changes: describe_changes(w),
                })?;
            }
            writer.flush()?;
        }
        OutputFormat::Table => {
            out.write_all(warnings_table(warnings).as_bytes())?;
        }
    }
    Ok(())
}

pub fn warnings_table(warnings: &[Warning]) -> String {
    if warnings.is_empty() {
        return "No consistency warnings\n".to_string();
    }

    let mut table = String::new();
    for w in warnings {
        let _ = writeln!(
            table,
            "[{}] {:<7} {} / {}: {}",
            w.code.code(),
            w.severity.as_str(),
            w.entity_name,
            w.jurisdiction,
            w.message
        );
        for change in &w.changes {
            let _ = writeln!(
                table,
                "          {}: {} -> {}",
                change.field,
                change.old,
                change.new.as_deref().unwrap_or("(absent)")
            );
        }
    }
    let _ = writeln!(table, "\n{} warning(s)", warnings.len());
    table
}

// ============================================================================
// HELPERS
// ============================================================================

fn warning_codes(warnings: &[Warning]) -> String {
    warnings.iter().map(|w| w.code.code()).collect::<Vec<_>>().join(";")
}

fn describe_changes(w: &Warning) -> String {
    w.changes
        .iter()
        .map(|c| format!("{}: {} -> {}", c.field, c.old, c.new.as_deref().unwrap_or("")))
        .collect::<Vec<_>>()
        .join("; ")
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let mut cut: String = value.chars().take(width.saturating_sub(1)).collect();
        cut.push('…');
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Address, AppliedOverride, Candidate, DatasetId, FieldChange, OverrideType, RegistryResult, ResultStatus,
        Scores, Severity, WarningCode,
    };
    use chrono::Utc;

    fn create_test_row(status: StatusBucket, score: Option<f64>) -> ReconciledRow {
        let result = RegistryResult {
            id: 10,
            dataset_id: DatasetId(2),
            search_name: "Acme Rx".to_string(),
            jurisdiction: "FL".to_string(),
            license_number: Some("PH123".to_string()),
            license_type: None,
            license_status: Some("Active".to_string()),
            issue_date: None,
            expiration_date: None,
            business_name: Some("ACME RX LLC".to_string()),
            address: Address::default(),
            status: ResultStatus::Found,
            timestamp: Utc::now(),
        };
        ReconciledRow {
            entity_id: 1,
            entity_name: "Acme Rx".to_string(),
            jurisdiction: "FL".to_string(),
            status,
            score,
            selected_result_id: Some(10),
            candidates: vec![Candidate {
                result,
                scores: score.map(|s| Scores {
                    overall: s,
                    street: s,
                    locality: s,
                }),
            }],
            applied_override: None,
            searched: true,
            warnings: Vec::new(),
        }
    }

    fn create_test_warning() -> Warning {
        Warning {
            code: WarningCode::SnapshotDrift,
            severity: Severity::Warning,
            entity_name: "Acme Rx".to_string(),
            jurisdiction: "FL".to_string(),
            license_number: Some("PH123".to_string()),
            override_id: 3,
            message: "license PH123 changed since review: license_status".to_string(),
            changes: vec![FieldChange {
                field: "license_status".to_string(),
                old: "Active".to_string(),
                new: Some("Expired".to_string()),
            }],
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut overridden = create_test_row(StatusBucket::NoData, None);
        overridden.applied_override = Some(AppliedOverride {
            override_id: 1,
            override_type: OverrideType::Empty,
            license_number: None,
            reason: None,
            author: None,
            matched_result_id: None,
        });
        let rows = vec![
            create_test_row(StatusBucket::Match, Some(95.0)),
            create_test_row(StatusBucket::WeakMatch, Some(70.0)),
            overridden,
        ];

        let summary = ReconSummary::of(&rows);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.weak_match, 1);
        assert_eq!(summary.no_data, 1);
        assert_eq!(summary.overridden, 1);
    }

    #[test]
    fn test_rows_csv() {
        let rows = vec![create_test_row(StatusBucket::Match, Some(95.5))];
        let mut out = Vec::new();
        write_rows(&rows, OutputFormat::Csv, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("entity_id,entity_name,jurisdiction,status,score"));
        assert_eq!(
            lines.next().unwrap(),
            "1,Acme Rx,FL,match,95.5,10,PH123,Active,ACME RX LLC,1,true,,,"
        );
    }

    #[test]
    fn test_rows_json_roundtrips_status() {
        let rows = vec![create_test_row(StatusBucket::WeakMatch, Some(70.0))];
        let mut out = Vec::new();
        write_rows(&rows, OutputFormat::Json, &mut out).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value[0]["status"], "weak_match");
        assert_eq!(value[0]["score"], 70.0);
    }

    #[test]
    fn test_warnings_table_lists_changes() {
        let table = warnings_table(&[create_test_warning()]);
        assert!(table.contains("[W3]"));
        assert!(table.contains("license_status: Active -> Expired"));
        assert!(table.contains("1 warning(s)"));
    }

    #[test]
    fn test_warnings_csv() {
        let mut out = Vec::new();
        write_warnings(&[create_test_warning()], OutputFormat::Csv, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("W3,warning,Acme Rx,FL,PH123,3,"));
        assert!(text.contains("license_status: Active -> Expired"));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
