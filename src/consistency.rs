// 🩺 Consistency Checker - Do the overrides still agree with the live data?
//
//   W1  "empty" override, but a live found result exists for the pair
//   W2  "present" override whose license number no live result carries
//   W3  "present" override whose snapshot no longer matches the live result
//   W4  override names an entity the entity dataset does not contain (error)
//
// Checks are advisory. They never change what reconciliation selects.

use crate::db::{get_dataset, load_entities, load_overrides, load_results};
use crate::error::Result;
use crate::index::{pair_key, EntityIndex, OverrideIndex, PairKey, ResultIndex};
use crate::model::{
    Address, DatasetId, DatasetKind, Entity, FieldChange, OverrideRecord, OverrideSnapshot, OverrideType,
    RegistryResult, Warning, WarningCode,
};
use crate::normalize::{
    normalize_city, normalize_jurisdiction, normalize_postal, normalize_street, normalize_suite, split_street,
};
use chrono::NaiveDate;
use rusqlite::Connection;
use std::collections::BTreeSet;

// ============================================================================
// DATASET-LEVEL CHECK
// ============================================================================

pub fn check_consistency(
    conn: &Connection,
    entity_dataset: DatasetId,
    result_dataset: DatasetId,
    override_dataset: DatasetId,
) -> Result<Vec<Warning>> {
    get_dataset(conn, DatasetKind::Entities, entity_dataset)?;
    get_dataset(conn, DatasetKind::Results, result_dataset)?;
    get_dataset(conn, DatasetKind::Overrides, override_dataset)?;

    let entities = load_entities(conn, entity_dataset)?;
    let results = load_results(conn, result_dataset)?;
    let overrides = load_overrides(conn, override_dataset)?;

    let warnings = check_records(&entities, &results, &overrides);
    tracing::info!(
        override_dataset = override_dataset.0,
        overrides = overrides.len(),
        warnings = warnings.len(),
        "consistency check finished"
    );
    Ok(warnings)
}

/// Warnings ordered by (entity name, jurisdiction, code)
pub fn check_records(
    entities: &[Entity],
    results: &[RegistryResult],
    overrides: &[OverrideRecord],
) -> Vec<Warning> {
    let entity_index = EntityIndex::build(entities);
    let result_index = ResultIndex::build(results);
    let override_index = OverrideIndex::build(overrides);

    let keys: BTreeSet<PairKey> = overrides
        .iter()
        .map(|o| pair_key(&o.entity_name, &o.jurisdiction))
        .collect();

    let mut warnings = Vec::new();
    for (name, jurisdiction) in &keys {
        let pair_overrides = override_index.for_pair(name, jurisdiction);

        if !entity_index.contains_name(name) {
            warnings.extend(pair_overrides.iter().map(|o| unknown_entity(o)));
        }
        warnings.extend(check_pair(pair_overrides, &result_index));
    }

    sort_warnings(&mut warnings);
    warnings
}

pub fn sort_warnings(warnings: &mut [Warning]) {
    warnings.sort_by(|a, b| {
        a.entity_name
            .cmp(&b.entity_name)
            .then_with(|| a.jurisdiction.cmp(&b.jurisdiction))
            .then_with(|| a.code.cmp(&b.code))
            .then_with(|| a.override_id.cmp(&b.override_id))
    });
}

// ============================================================================
// PAIR-LEVEL CHECK (W1-W3)
// ============================================================================

/// W1-W3 for the overrides of one (entity name, jurisdiction) pair
pub fn check_pair(overrides: &[&OverrideRecord], results: &ResultIndex) -> Vec<Warning> {
    let mut warnings = Vec::new();

    for o in overrides {
        match o.override_type {
            OverrideType::Empty => {
                let live = results.found_for_pair(&o.entity_name, &o.jurisdiction);
                if !live.is_empty() {
                    let licenses: Vec<&str> = live
                        .iter()
                        .filter_map(|r| r.license_number.as_deref())
                        .collect();
                    warnings.push(warning(
                        o,
                        WarningCode::EmptyOverrideHasLiveResult,
                        format!(
                            "marked empty but {} live result(s) found ({})",
                            live.len(),
                            licenses.join(", ")
                        ),
                        Vec::new(),
                    ));
                }
            }
            OverrideType::Present => {
                let license = o.license_number.as_deref().unwrap_or("");
                let live = results.with_license(&o.entity_name, &o.jurisdiction, license);

                match live.first() {
                    None => warnings.push(warning(
                        o,
                        WarningCode::OverrideLicenseMissing,
                        format!("license {} no longer appears in the live results", license),
                        Vec::new(),
                    )),
                    Some(result) => {
                        let changes = snapshot_changes(&o.snapshot, result);
                        if !changes.is_empty() {
                            let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
                            warnings.push(warning(
                                o,
                                WarningCode::SnapshotDrift,
                                format!("license {} changed since review: {}", license, fields.join(", ")),
                                changes,
                            ));
                        }
                    }
                }
            }
        }
    }

    warnings
}

fn unknown_entity(o: &OverrideRecord) -> Warning {
    warning(
        o,
        WarningCode::UnknownEntity,
        format!("no entity named {:?} in the entity dataset", o.entity_name),
        Vec::new(),
    )
}

fn warning(o: &OverrideRecord, code: WarningCode, message: String, changes: Vec<FieldChange>) -> Warning {
    Warning {
        code,
        severity: code.severity(),
        entity_name: o.entity_name.trim().to_string(),
        jurisdiction: o.jurisdiction.clone(),
        license_number: o.license_number.clone(),
        override_id: o.id,
        message,
        changes,
    }
}

// ============================================================================
// SNAPSHOT DRIFT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldComparison {
    Same,
    Changed,
    /// Snapshot never recorded the field, or the values cannot be compared
    Unresolvable,
}

/// Snapshot fields whose live value differs. Unresolvable fields are not drift.
pub fn snapshot_changes(snapshot: &OverrideSnapshot, live: &RegistryResult) -> Vec<FieldChange> {
    let old = &snapshot.address;
    let new = &live.address;
    let old_suite = effective_suite(old);
    let new_suite = effective_suite(new);

    let fields: [(&str, Option<&str>, Option<&str>, FieldComparison); 8] = [
        field("address", old.address.as_deref(), new.address.as_deref(), |a, b| {
            compare_text(a, b, normalize_street)
        }),
        field("suite", old_suite.as_deref(), new_suite.as_deref(), |a, b| {
            compare_text(a, b, str::to_string)
        }),
        field("city", old.city.as_deref(), new.city.as_deref(), |a, b| {
            compare_text(a, b, normalize_city)
        }),
        field("state", old.state.as_deref(), new.state.as_deref(), |a, b| {
            compare_text(a, b, normalize_jurisdiction)
        }),
        field("zip", old.zip.as_deref(), new.zip.as_deref(), |a, b| {
            compare_text(a, b, normalize_postal)
        }),
        field(
            "license_status",
            snapshot.license_status.as_deref(),
            live.license_status.as_deref(),
            |a, b| compare_text(a, b, |s| s.to_lowercase()),
        ),
        field(
            "issue_date",
            snapshot.issue_date.as_deref(),
            live.issue_date.as_deref(),
            compare_date,
        ),
        field(
            "expiration_date",
            snapshot.expiration_date.as_deref(),
            live.expiration_date.as_deref(),
            compare_date,
        ),
    ];

    fields
        .into_iter()
        .filter(|(_, _, _, cmp)| *cmp == FieldComparison::Changed)
        .filter_map(|(name, old, new, _)| {
            Some(FieldChange {
                field: name.to_string(),
                old: old?.trim().to_string(),
                new: new.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
            })
        })
        .collect()
}

/// Unit of an address: the suite column, else the unit written in the street line
fn effective_suite(address: &Address) -> Option<String> {
    address
        .suite
        .as_deref()
        .and_then(normalize_suite)
        .or_else(|| address.address.as_deref().and_then(|line| split_street(line).1))
}

fn field<'a>(
    name: &'static str,
    old: Option<&'a str>,
    new: Option<&'a str>,
    compare: impl Fn(Option<&str>, Option<&str>) -> FieldComparison,
) -> (&'static str, Option<&'a str>, Option<&'a str>, FieldComparison) {
    (name, old, new, compare(old, new))
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Compare through a normalizer. Falls back to the lowercased raw text when
/// the normalizer cannot make anything of a value.
pub fn compare_text(old: Option<&str>, new: Option<&str>, normalize: impl Fn(&str) -> String) -> FieldComparison {
    let Some(old) = present(old) else {
        return FieldComparison::Unresolvable;
    };
    let Some(new) = present(new) else {
        return FieldComparison::Changed;
    };

    let canonical = |value: &str| {
        let normalized = normalize(value);
        if normalized.is_empty() {
            value.to_lowercase()
        } else {
            normalized
        }
    };

    if canonical(old) == canonical(new) {
        FieldComparison::Same
    } else {
        FieldComparison::Changed
    }
}

/// Dates compare as calendar dates regardless of format
pub fn compare_date(old: Option<&str>, new: Option<&str>) -> FieldComparison {
    let Some(old) = present(old) else {
        return FieldComparison::Unresolvable;
    };
    let Some(new) = present(new) else {
        return FieldComparison::Changed;
    };

    if old == new {
        return FieldComparison::Same;
    }

    match (parse_date(old), parse_date(new)) {
        (Some(a), Some(b)) if a == b => FieldComparison::Same,
        (Some(_), Some(_)) => FieldComparison::Changed,
        _ => FieldComparison::Unresolvable,
    }
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();

    // Try YYYY-MM-DD (also the date part of a timestamp)
    if let Some(date) = value.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()) {
        return Some(date);
    }

    // Try MM/DD/YYYY, then MM/DD/YY
    let year_digits = value.rsplit('/').next().map(str::len).unwrap_or(0);
    let format = match year_digits {
        4 => "%m/%d/%Y",
        2 => "%m/%d/%y",
        _ => return None,
    };
    NaiveDate::parse_from_str(value, format).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, ResultStatus};
    use chrono::{TimeZone, Utc};

    fn entity(name: &str, jurisdictions: &[&str]) -> Entity {
        Entity {
            id: 1,
            dataset_id: DatasetId(1),
            name: name.to_string(),
            address: Address::default(),
            jurisdictions: jurisdictions.iter().map(|j| j.to_string()).collect(),
        }
    }

    fn found(id: i64, name: &str, jurisdiction: &str, license: &str, status: &str) -> RegistryResult {
        RegistryResult {
            id,
            dataset_id: DatasetId(2),
            search_name: name.to_string(),
            jurisdiction: jurisdiction.to_string(),
            license_number: Some(license.to_string()),
            license_type: Some("Community Pharmacy".to_string()),
            license_status: Some(status.to_string()),
            issue_date: Some("2020-01-15".to_string()),
            expiration_date: Some("2026-02-28".to_string()),
            business_name: Some(name.to_uppercase()),
            address: Address::new("123 Main St", "Orlando", jurisdiction, "32801"),
            status: ResultStatus::Found,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    fn override_record(
        id: i64,
        name: &str,
        jurisdiction: &str,
        override_type: OverrideType,
        license: Option<&str>,
        snapshot: OverrideSnapshot,
    ) -> OverrideRecord {
        OverrideRecord {
            id,
            dataset_id: DatasetId(3),
            entity_name: name.to_string(),
            jurisdiction: jurisdiction.to_string(),
            license_number: license.map(str::to_string),
            override_type,
            reason: None,
            author: Some("reviewer".to_string()),
            created_at: Utc::now(),
            snapshot,
        }
    }

    #[test]
    fn test_status_change_is_drift() {
        let original = found(10, "Acme Rx", "FL", "PH123", "Active");
        let snapshot = OverrideSnapshot::of_result(&original);
        let live = vec![found(11, "Acme Rx", "FL", "PH123", "Expired")];
        let overrides = vec![override_record(1, "Acme Rx", "FL", OverrideType::Present, Some("PH123"), snapshot)];

        let warnings = check_records(&[entity("Acme Rx", &["FL"])], &live, &overrides);

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, WarningCode::SnapshotDrift);
        assert_eq!(warnings[0].changed_fields(), vec!["license_status"]);
        assert_eq!(warnings[0].changes[0].old, "Active");
        assert_eq!(warnings[0].changes[0].new.as_deref(), Some("Expired"));
    }

    #[test]
    fn test_empty_override_with_live_result() {
        let live = vec![found(10, "Acme Rx", "GA", "GA-77", "Active")];
        let overrides = vec![override_record(1, "Acme Rx", "GA", OverrideType::Empty, None, OverrideSnapshot::default())];

        let warnings = check_records(&[entity("Acme Rx", &["GA"])], &live, &overrides);

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, WarningCode::EmptyOverrideHasLiveResult);
        assert!(warnings[0].message.contains("GA-77"));
    }

    #[test]
    fn test_missing_license_and_unknown_entity() {
        let overrides = vec![
            override_record(1, "Acme Rx", "FL", OverrideType::Present, Some("PH999"), OverrideSnapshot::default()),
            override_record(2, "Ghost LLC", "FL", OverrideType::Empty, None, OverrideSnapshot::default()),
        ];

        let warnings = check_records(&[entity("Acme Rx", &["FL"])], &[], &overrides);

        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].code, WarningCode::OverrideLicenseMissing);
        assert_eq!(warnings[1].code, WarningCode::UnknownEntity);
        assert_eq!(warnings[1].severity, crate::model::Severity::Error);
    }

    #[test]
    fn test_format_only_differences_are_not_drift() {
        let mut live = found(10, "Acme Rx", "FL", "PH123", "ACTIVE ");
        live.issue_date = Some("01/15/2020".to_string());
        live.address = Address::new("123 Main Street", "ORLANDO", "Florida", "32801-1234");

        let mut snapshot = OverrideSnapshot::of_result(&found(9, "Acme Rx", "FL", "PH123", "Active"));
        // Fields never recorded in the snapshot cannot drift
        snapshot.expiration_date = None;
        live.expiration_date = Some("2030-01-01".to_string());

        assert!(snapshot_changes(&snapshot, &live).is_empty());
    }

    #[test]
    fn test_field_dropped_from_live_result_is_drift() {
        let snapshot = OverrideSnapshot::of_result(&found(9, "Acme Rx", "FL", "PH123", "Active"));
        let mut live = found(10, "Acme Rx", "FL", "PH123", "Active");
        live.license_status = None;

        let changes = snapshot_changes(&snapshot, &live);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "license_status");
        assert_eq!(changes[0].new, None);
    }

    #[test]
    fn test_unit_in_street_line_is_compared() {
        let mut original = found(9, "Acme Rx", "FL", "PH123", "Active");
        original.address = Address::new("123 Main St Ste 200", "Orlando", "FL", "32801");
        let snapshot = OverrideSnapshot::of_result(&original);

        let mut live = found(10, "Acme Rx", "FL", "PH123", "Active");
        live.address = Address::new("123 Main St Ste 300", "Orlando", "FL", "32801");

        let changes = snapshot_changes(&snapshot, &live);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "suite");
        assert_eq!(changes[0].old, "200");
        assert_eq!(changes[0].new.as_deref(), Some("300"));

        // Same unit moved from the street line to the suite column
        live.address = Address::new("123 Main Street", "Orlando", "FL", "32801").with_suite("Suite 200");
        assert!(snapshot_changes(&snapshot, &live).is_empty());
    }

    #[test]
    fn test_reports_exactly_the_changed_fields() {
        let snapshot = OverrideSnapshot::of_result(&found(9, "Acme Rx", "FL", "PH123", "Active"));

        let mut live = found(10, "Acme Rx", "FL", "PH123", "Suspended");
        live.address = Address::new("500 Oak Ave", "orlando", "FL", "32801");
        live.issue_date = Some("01/15/2020".to_string());
        live.expiration_date = Some("2027-02-28".to_string());

        let overrides = vec![override_record(1, "Acme Rx", "FL", OverrideType::Present, Some("PH123"), snapshot)];
        let warnings = check_records(&[entity("Acme Rx", &["FL"])], &[live], &overrides);

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, WarningCode::SnapshotDrift);
        assert_eq!(
            warnings[0].changed_fields(),
            vec!["address", "license_status", "expiration_date"]
        );

        let values: Vec<(&str, &str, Option<&str>)> = warnings[0]
            .changes
            .iter()
            .map(|c| (c.field.as_str(), c.old.as_str(), c.new.as_deref()))
            .collect();
        assert_eq!(
            values,
            vec![
                ("address", "123 Main St", Some("500 Oak Ave")),
                ("license_status", "Active", Some("Suspended")),
                ("expiration_date", "2026-02-28", Some("2027-02-28")),
            ]
        );
    }

    #[test]
    fn test_compare_date() {
        assert_eq!(compare_date(Some("2024-03-01"), Some("03/01/2024")), FieldComparison::Same);
        assert_eq!(compare_date(Some("3/1/24"), Some("2024-03-01")), FieldComparison::Same);
        assert_eq!(compare_date(Some("2024-03-01"), Some("2024-03-02")), FieldComparison::Changed);
        assert_eq!(compare_date(Some("soon"), Some("2024-03-02")), FieldComparison::Unresolvable);
        assert_eq!(compare_date(None, Some("2024-03-02")), FieldComparison::Unresolvable);
        assert_eq!(compare_date(Some("2024-03-01"), None), FieldComparison::Changed);
    }

    #[test]
    fn test_warnings_are_sorted() {
        let overrides = vec![
            override_record(1, "Zeta Rx", "FL", OverrideType::Empty, None, OverrideSnapshot::default()),
            override_record(2, "Acme Rx", "GA", OverrideType::Present, Some("X"), OverrideSnapshot::default()),
            override_record(3, "Acme Rx", "FL", OverrideType::Present, Some("Y"), OverrideSnapshot::default()),
        ];
        let warnings = check_records(&[], &[], &overrides);

        let order: Vec<(String, String, &str)> = warnings
            .iter()
            .map(|w| (w.entity_name.clone(), w.jurisdiction.clone(), w.code.code()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("Acme Rx".to_string(), "FL".to_string(), "W2"),
                ("Acme Rx".to_string(), "FL".to_string(), "W4"),
                ("Acme Rx".to_string(), "GA".to_string(), "W2"),
                ("Acme Rx".to_string(), "GA".to_string(), "W4"),
                ("Zeta Rx".to_string(), "FL".to_string(), "W4"),
            ]
        );
    }
}
