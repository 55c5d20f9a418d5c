//! End-to-end report generation against an on-disk SQLite metric store

use rusqlite::Connection;
use slareport_core::backend::create_schema;
use slareport_core::config::{self, ReportConfig};
use slareport_core::html::render_html;
use slareport_core::provider::ReportKind;
use slareport_core::{
    parse_timestamp, render, render_csv, render_text, run_report, run_report_parallel,
    Classification, DayBound, ReportError, SqliteBackend, SqlitePool, Timerange,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const SAMPLES: &str = "
    INSERT INTO hosts VALUES (1, 'alpha', NULL, 'default');
    INSERT INTO hosts VALUES (2, 'beta', NULL, 'default');
    INSERT INTO services VALUES (10, 1, 'http', NULL);
    INSERT INTO services VALUES (11, 2, 'ssh', NULL);
    INSERT INTO hostgroup_members VALUES ('web', 1);
    INSERT INTO hostgroup_members VALUES ('db', 2);
    INSERT INTO customvars VALUES (2, 'env', 'prod');
    INSERT INTO availability VALUES (1, '2026-01-01 06:00:00', 100.0);
    INSERT INTO availability VALUES (1, '2026-01-02 06:00:00', 94.0);
    INSERT INTO availability VALUES (2, '2026-01-01 06:00:00', 99.8);
    INSERT INTO availability VALUES (2, '2026-01-02 06:00:00', 99.8);
    INSERT INTO availability VALUES (10, '2026-01-01 06:00:00', 100.0);
";

fn setup(config_json: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    let conn = Connection::open(dir.path().join("metrics.db")).unwrap();
    create_schema(&conn).unwrap();
    conn.execute_batch(SAMPLES).unwrap();
    drop(conn);
    fs::write(dir.path().join(".slareportrc.json"), config_json).unwrap();
    dir
}

fn january_2026() -> Timerange {
    Timerange::new(
        parse_timestamp("2026-01-01", DayBound::Start).unwrap(),
        parse_timestamp("2026-01-31", DayBound::End).unwrap(),
    )
    .unwrap()
}

fn open(root: &Path, overrides: ReportConfig) -> (SqliteBackend, config::ResolvedConfig) {
    let resolved = config::load_and_resolve(root, None, overrides).unwrap();
    let database = resolved.database.clone().expect("config sets a database");
    let backend = SqliteBackend::open(&database)
        .unwrap()
        .with_availability_query(resolved.availability_query.clone());
    (backend, resolved)
}

#[test]
fn test_host_report_end_to_end() {
    let dir = setup(r#"{ "database": "metrics.db" }"#);
    let (backend, resolved) = open(dir.path(), ReportConfig::default());

    let data = run_report(&backend, &resolved, &january_2026()).unwrap();
    assert_eq!(data.dimension_labels, vec!["Hostname"]);
    assert_eq!(data.value_labels, vec!["SLA"]);
    assert_eq!(data.rows.len(), 2);
    assert_eq!(data.rows[0].dimensions, vec!["alpha"]);
    assert_eq!(data.rows[0].values, vec![Some(97.0)]);
    assert_eq!(data.rows[1].dimensions, vec!["beta"]);

    let rendered = render(&data, resolved.threshold);
    let table = rendered.table().expect("report has rows");
    assert_eq!(table.rows[0].cells[0].classification, Classification::Nok);
    assert_eq!(table.rows[1].cells[0].classification, Classification::Ok);
    assert_eq!(table.totals.cells[0].display().as_deref(), Some("98.4"));
    assert_eq!(table.totals.cells[0].classification, Classification::Nok);

    let text = render_text(&rendered);
    assert_eq!(
        text,
        "Hostname  SLA\nalpha     97 (nok)\nbeta      99.8\nTotal     98.4 (nok)\n"
    );
}

#[test]
fn test_service_report_with_cli_overrides() {
    let dir = setup(r#"{ "database": "metrics.db", "threshold": 90 }"#);
    let overrides = ReportConfig {
        kind: Some(ReportKind::ServiceSla),
        filter: Some("service_description=HTTP".to_string()),
        ..Default::default()
    };
    let (backend, resolved) = open(dir.path(), overrides);
    assert_eq!(resolved.threshold, 90.0);

    let data = run_report(&backend, &resolved, &january_2026()).unwrap();
    assert_eq!(data.dimension_labels, vec!["Hostname", "Service"]);
    assert_eq!(data.rows.len(), 1);
    assert_eq!(data.rows[0].dimensions, vec!["alpha", "http"]);
    assert_eq!(data.rows[0].values, vec![Some(100.0)]);
}

#[test]
fn test_custom_variable_filter() {
    let dir = setup(r#"{ "database": "metrics.db", "filter": "_host_env=prod" }"#);
    let (backend, resolved) = open(dir.path(), ReportConfig::default());

    let data = run_report(&backend, &resolved, &january_2026()).unwrap();
    assert_eq!(data.rows.len(), 1);
    assert_eq!(data.rows[0].dimensions, vec!["beta"]);
}

#[test]
fn test_no_matching_objects_renders_notice() {
    let dir = setup(r#"{ "database": "metrics.db", "filter": "host_name=gamma*" }"#);
    let (backend, resolved) = open(dir.path(), ReportConfig::default());

    let data = run_report(&backend, &resolved, &january_2026()).unwrap();
    assert!(data.is_empty());

    let rendered = render(&data, resolved.threshold);
    assert_eq!(render_text(&rendered), "No data found.\n");
    assert_eq!(render_html(&rendered), "<p>No data found.</p>");
}

#[test]
fn test_disallowed_filter_column_fails_before_fetching() {
    let dir = setup(r#"{ "database": "metrics.db", "filter": "service_description=http" }"#);

    // host reports do not allow service columns
    let err = config::load_and_resolve(dir.path(), None, ReportConfig::default()).unwrap_err();
    match err.downcast_ref::<ReportError>() {
        Some(ReportError::InvalidFilterExpression { allowed, .. }) => {
            assert!(allowed.contains("host_name"));
            assert!(!allowed.contains("service_description"));
        }
        other => panic!("expected InvalidFilterExpression, got {:?}", other),
    }
}

#[test]
fn test_segmented_report_has_one_column_per_day() {
    let dir = setup(r#"{ "database": "metrics.db", "interval": "P1D" }"#);
    let (backend, resolved) = open(dir.path(), ReportConfig::default());
    let timerange = Timerange::new(
        parse_timestamp("2026-01-01", DayBound::Start).unwrap(),
        parse_timestamp("2026-01-03", DayBound::End).unwrap(),
    )
    .unwrap();

    let data = run_report(&backend, &resolved, &timerange).unwrap();
    assert_eq!(
        data.value_labels,
        vec![
            "2026-01-01 00:00:00 - 2026-01-01 23:59:59",
            "2026-01-02 00:00:00 - 2026-01-02 23:59:59",
            "2026-01-03 00:00:00 - 2026-01-03 23:59:59",
        ]
    );
    assert_eq!(data.rows[0].values, vec![Some(100.0), Some(94.0), None]);
    assert_eq!(data.rows[1].values, vec![Some(99.8), Some(99.8), None]);
    assert_eq!(data.averages[2], None);

    let csv = render_csv(&data);
    assert!(csv.lines().next().unwrap().starts_with("Hostname,"));
    assert_eq!(csv.lines().count(), 4);
}

#[test]
fn test_custom_availability_query() {
    let dir = setup(
        r#"{
            "database": "metrics.db",
            "availability_query": "SELECT MIN(ok_percent) FROM availability WHERE object_id = ?1 AND sample_time BETWEEN ?2 AND ?3"
        }"#,
    );
    let (backend, resolved) = open(dir.path(), ReportConfig::default());

    let data = run_report(&backend, &resolved, &january_2026()).unwrap();
    assert_eq!(data.rows[0].values, vec![Some(94.0)]);
}

#[test]
fn test_parallel_report_matches_sequential() {
    let dir = setup(r#"{ "database": "metrics.db", "interval": "P1D", "kind": "service" }"#);
    let (backend, resolved) = open(dir.path(), ReportConfig::default());
    let database = resolved.database.clone().unwrap();
    let pool = SqlitePool::open(&database)
        .unwrap()
        .with_availability_query(resolved.availability_query.clone());
    let timerange = january_2026();

    let sequential = run_report(&backend, &resolved, &timerange).unwrap();
    let parallel = run_report_parallel(&backend, &pool, &resolved, &timerange).unwrap();
    assert_eq!(sequential, parallel);
    assert_eq!(parallel.value_labels.len(), 31);
    assert_eq!(parallel.rows[0].dimensions, vec!["alpha", "http"]);
    assert_eq!(parallel.rows[0].values[0], Some(100.0));
}
