// End-to-end: import → score → reconcile → check, through the public API

use chrono::{TimeZone, Utc};
use registry_recon::db::{count_scores, get_events_for_subject};
use registry_recon::import::{read_entities, read_overrides, read_results};
use registry_recon::{
    check_consistency, compute_scores, ensure_scored, find_missing, get_dataset, import_entities,
    import_overrides, import_results, list_datasets, load_results, reconcile, resolve_dataset, setup_database,
    Address, DatasetId, DatasetKind, EntityInput, OverrideInput, ReconConfig, ReconError, ResultInput,
    ResultStatus, StatusBucket, WarningCode,
};
use rusqlite::Connection;

fn create_test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    conn
}

fn entity(name: &str, street: &str, city: &str, jurisdictions: &[&str]) -> EntityInput {
    EntityInput {
        name: name.to_string(),
        address: Address::new(street, city, "FL", "32801"),
        jurisdictions: jurisdictions.iter().map(|j| j.to_string()).collect(),
    }
}

fn found(name: &str, jurisdiction: &str, license: &str, street: &str, city: &str, status: &str) -> ResultInput {
    ResultInput {
        search_name: name.to_string(),
        jurisdiction: jurisdiction.to_string(),
        license_number: Some(license.to_string()),
        license_type: Some("Community Pharmacy".to_string()),
        license_status: Some(status.to_string()),
        issue_date: Some("2020-01-15".to_string()),
        expiration_date: Some("2026-02-28".to_string()),
        business_name: Some(name.to_uppercase()),
        address: Address::new(street, city, "FL", "32801"),
        status: ResultStatus::Found,
        timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
    }
}

fn no_results(name: &str, jurisdiction: &str) -> ResultInput {
    ResultInput {
        search_name: name.to_string(),
        jurisdiction: jurisdiction.to_string(),
        license_number: None,
        license_type: None,
        license_status: None,
        issue_date: None,
        expiration_date: None,
        business_name: None,
        address: Address::default(),
        status: ResultStatus::Empty,
        timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
    }
}

#[test]
fn exact_and_city_mismatch_addresses_both_match() {
    let conn = create_test_db();
    let config = ReconConfig::default();

    let entities = import_entities(
        &conn,
        "entities-v1",
        &[
            entity("Acme Rx", "123 Main Street", "Orlando", &["FL"]),
            entity("Beta Drug", "123 Main Street", "Orlando", &["FL"]),
        ],
    )
    .unwrap();
    let results = import_results(
        &conn,
        "results-2024-06",
        &[
            found("Acme Rx", "FL", "PH1", "123 Main St", "Orlando", "Active"),
            found("Beta Drug", "FL", "PH2", "123 Main St", "Winter Park", "Active"),
        ],
    )
    .unwrap();

    let rows = reconcile(&conn, entities.id, results.id, None, &config).unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].entity_name, "Acme Rx");
    assert_eq!(rows[0].score, Some(100.0));
    assert_eq!(rows[0].status, StatusBucket::Match);

    assert_eq!(rows[1].entity_name, "Beta Drug");
    assert_eq!(rows[1].score, Some(90.0));
    assert_eq!(rows[1].status, StatusBucket::Match);
    let locality = rows[1].selected().and_then(|c| c.scores).map(|s| s.locality);
    assert_eq!(locality, Some(66.67));
}

#[test]
fn scoring_is_lazy_and_idempotent() {
    let conn = create_test_db();
    let config = ReconConfig::default();

    let entities = import_entities(&conn, "e", &[entity("Acme Rx", "123 Main Street", "Orlando", &["FL", "GA"])]).unwrap();
    let results = import_results(
        &conn,
        "r",
        &[
            found("Acme Rx", "FL", "PH1", "123 Main St", "Orlando", "Active"),
            found("Acme Rx", "FL", "PH7", "9 Elm Rd", "Tampa", "Active"),
            no_results("Acme Rx", "GA"),
        ],
    )
    .unwrap();

    assert_eq!(find_missing(&conn, entities.id, results.id).unwrap().len(), 2);

    let first = compute_scores(&conn, entities.id, results.id, 1, &config).unwrap();
    assert_eq!(first.scored, 2);
    assert_eq!(first.batches, 2);
    assert!(find_missing(&conn, entities.id, results.id).unwrap().is_empty());

    let second = compute_scores(&conn, entities.id, results.id, 1, &config).unwrap();
    assert_eq!(second.scored, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(count_scores(&conn, entities.id, results.id).unwrap(), 2);

    // The combination is complete, readers do no further work
    assert!(ensure_scored(&conn, entities.id, results.id, &config).unwrap().is_none());

    let events = get_events_for_subject(&conn, "dataset_pair", &format!("{}:{}", entities.id.0, results.id.0)).unwrap();
    assert!(!events.is_empty());
}

#[test]
fn scores_are_kept_per_dataset_pair() {
    let conn = create_test_db();
    let config = ReconConfig::default();

    let entities = import_entities(&conn, "e", &[entity("Acme Rx", "123 Main Street", "Orlando", &["FL"])]).unwrap();
    let june = import_results(&conn, "r-06", &[found("Acme Rx", "FL", "PH1", "123 Main St", "Orlando", "Active")]).unwrap();
    let july = import_results(&conn, "r-07", &[found("Acme Rx", "FL", "PH1", "500 Oak Ave", "Orlando", "Active")]).unwrap();

    let june_rows = reconcile(&conn, entities.id, june.id, None, &config).unwrap();
    let july_rows = reconcile(&conn, entities.id, july.id, None, &config).unwrap();

    assert_eq!(june_rows[0].status, StatusBucket::Match);
    assert_ne!(july_rows[0].score, june_rows[0].score);
    assert_eq!(count_scores(&conn, entities.id, june.id).unwrap(), 1);
    assert_eq!(count_scores(&conn, entities.id, july.id).unwrap(), 1);
}

#[test]
fn empty_override_forces_no_data_and_flags_live_result() {
    let conn = create_test_db();
    let config = ReconConfig::default();

    let entities = import_entities(&conn, "e", &[entity("Acme Rx", "123 Main Street", "Orlando", &["FL", "GA"])]).unwrap();
    let results = import_results(
        &conn,
        "r",
        &[
            found("Acme Rx", "FL", "PH1", "123 Main St", "Orlando", "Active"),
            found("Acme Rx", "GA", "GA-77", "123 Main St", "Orlando", "Active"),
        ],
    )
    .unwrap();
    let overrides = import_overrides(
        &conn,
        "o",
        &[OverrideInput::empty("Acme Rx", "GA", Some("not licensed in GA".to_string()), None)],
    )
    .unwrap();

    let rows = reconcile(&conn, entities.id, results.id, Some(overrides.id), &config).unwrap();
    let ga = rows.iter().find(|r| r.jurisdiction == "GA").unwrap();
    let fl = rows.iter().find(|r| r.jurisdiction == "FL").unwrap();

    assert_eq!(ga.status, StatusBucket::NoData);
    assert_eq!(ga.selected_result_id, None);
    assert_eq!(ga.warnings[0].code, WarningCode::EmptyOverrideHasLiveResult);
    assert_eq!(fl.status, StatusBucket::Match);
    assert!(fl.applied_override.is_none());

    let warnings = check_consistency(&conn, entities.id, results.id, overrides.id).unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code.code(), "W1");
}

#[test]
fn present_override_reports_status_drift() {
    let conn = create_test_db();

    let entities = import_entities(&conn, "e", &[entity("Acme Rx", "123 Main Street", "Orlando", &["FL"])]).unwrap();
    let reviewed = import_results(&conn, "r-06", &[found("Acme Rx", "FL", "PH123", "123 Main St", "Orlando", "Active")]).unwrap();

    // Reviewer confirms the June result; the snapshot captures it
    let june = load_results(&conn, reviewed.id).unwrap();
    let overrides = import_overrides(
        &conn,
        "o",
        &[OverrideInput::present_from_result("Acme Rx", &june[0], None, Some("analyst".to_string()))],
    )
    .unwrap();

    let live = import_results(&conn, "r-07", &[found("Acme Rx", "FL", "PH123", "123 Main St", "Orlando", "Expired")]).unwrap();

    let unchanged = check_consistency(&conn, entities.id, reviewed.id, overrides.id).unwrap();
    assert!(unchanged.is_empty());

    let warnings = check_consistency(&conn, entities.id, live.id, overrides.id).unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, WarningCode::SnapshotDrift);
    assert_eq!(warnings[0].changed_fields(), vec!["license_status"]);
    assert_eq!(warnings[0].changes[0].old, "Active");
    assert_eq!(warnings[0].changes[0].new.as_deref(), Some("Expired"));

    // Drift is advisory: the override still selects its license
    let rows = reconcile(&conn, entities.id, live.id, Some(overrides.id), &ReconConfig::default()).unwrap();
    assert_eq!(rows[0].status, StatusBucket::Match);
    assert_eq!(rows[0].selected().and_then(|c| c.result.license_number.clone()), Some("PH123".to_string()));
}

#[test]
fn thresholds_come_from_config() {
    let conn = create_test_db();
    let config = ReconConfig::from_toml(
        r#"
        [thresholds]
        match_min = 95.0
        weak_match_min = 80.0
        "#,
    )
    .unwrap();

    let entities = import_entities(&conn, "e", &[entity("Beta Drug", "123 Main Street", "Orlando", &["FL"])]).unwrap();
    let results = import_results(&conn, "r", &[found("Beta Drug", "FL", "PH2", "123 Main St", "Winter Park", "Active")]).unwrap();

    let rows = reconcile(&conn, entities.id, results.id, None, &config).unwrap();
    assert_eq!(rows[0].score, Some(90.0));
    assert_eq!(rows[0].status, StatusBucket::WeakMatch);
}

#[test]
fn unknown_datasets_are_rejected() {
    let conn = create_test_db();
    let config = ReconConfig::default();
    let entities = import_entities(&conn, "e", &[entity("Acme Rx", "1 A St", "Orlando", &["FL"])]).unwrap();

    let err = reconcile(&conn, entities.id, DatasetId(4242), None, &config).unwrap_err();
    assert!(matches!(err, ReconError::DatasetNotFound { kind: DatasetKind::Results, .. }));

    let err = find_missing(&conn, DatasetId(4242), entities.id).unwrap_err();
    assert!(err.is_not_found());

    assert!(resolve_dataset(&conn, DatasetKind::Overrides, "nope").unwrap_err().is_not_found());
    assert!(get_dataset(&conn, DatasetKind::Entities, entities.id).is_ok());
}

#[test]
fn invalid_override_batch_writes_nothing() {
    let conn = create_test_db();

    let err = import_overrides(
        &conn,
        "o",
        &[
            OverrideInput::empty("Acme Rx", "GA", None, None),
            OverrideInput::empty("Acme Rx", "ga", None, None),
        ],
    )
    .unwrap_err();
    assert!(matches!(err, ReconError::OverrideConstraintViolation { .. }));
    assert!(list_datasets(&conn, Some(DatasetKind::Overrides)).unwrap().is_empty());

    let mut present = OverrideInput::empty("Acme Rx", "FL", None, None);
    present.override_type = registry_recon::OverrideType::Present;
    let err = import_overrides(&conn, "o", &[present]).unwrap_err();
    assert!(matches!(err, ReconError::OverrideConstraintViolation { .. }));
}

#[test]
fn dataset_tags_are_immutable() {
    let conn = create_test_db();
    import_entities(&conn, "e", &[]).unwrap();

    let err = import_entities(&conn, "e", &[]).unwrap_err();
    assert!(matches!(err, ReconError::DatasetTagExists { .. }));

    // The same tag is free under another kind
    assert!(import_results(&conn, "e", &[]).is_ok());
}

#[test]
fn csv_files_drive_the_whole_flow() {
    let conn = create_test_db();

    let entities_csv = "\
name,address,city,state,zip,jurisdictions
Acme Rx,123 Main Street,Orlando,FL,32801,FL;GA
";
    let results_csv = "\
search_name,jurisdiction,license_number,license_status,address,city,state,zip,timestamp
Acme Rx,FL,PH123,Active,123 Main St,Orlando,FL,32801,2024-06-01T09:00:00Z
Acme Rx,GA,,,,,,,2024-06-01T09:05:00Z
";
    let overrides_csv = "\
entity_name,jurisdiction,override_type,license_number,author
Acme Rx,GA,empty,,analyst
Ghost Pharmacy,FL,empty,,analyst
";

    let entities = import_entities(&conn, "e", &read_entities(entities_csv.as_bytes(), "entities.csv").unwrap()).unwrap();
    let results = import_results(&conn, "r", &read_results(results_csv.as_bytes(), "results.csv").unwrap()).unwrap();
    let overrides = import_overrides(&conn, "o", &read_overrides(overrides_csv.as_bytes(), "overrides.csv").unwrap()).unwrap();

    let rows = reconcile(&conn, entities.id, results.id, Some(overrides.id), &ReconConfig::default()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].jurisdiction, "FL");
    assert_eq!(rows[0].status, StatusBucket::Match);
    assert_eq!(rows[1].jurisdiction, "GA");
    assert_eq!(rows[1].status, StatusBucket::NoData);
    assert!(rows[1].searched);

    let warnings = check_consistency(&conn, entities.id, results.id, overrides.id).unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, WarningCode::UnknownEntity);
    assert_eq!(warnings[0].entity_name, "Ghost Pharmacy");
}
