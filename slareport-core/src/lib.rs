//! slareport core library - SLA compliance reports for monitored hosts and services

#![deny(warnings)]

// Global invariants enforced in this crate:
// - Each report invocation owns its inputs; no global mutable state
// - Segmentation, filtering, classification and rendering are pure
// - The metric source is passed in explicitly, never looked up globally
// - Rows keep the object order they were given in
// - Absent availability stays absent through averaging and rendering

pub mod backend;
pub mod classify;
pub mod config;
pub mod error;
pub mod filter;
pub mod html;
pub mod provider;
pub mod render;
pub mod report;
pub mod timerange;

pub use backend::{SqliteBackend, SqlitePool};
pub use classify::{classify, Classification, DEFAULT_THRESHOLD};
pub use config::ResolvedConfig;
pub use error::ReportError;
pub use filter::ValidatedFilter;
pub use provider::{ObjectRef, ReportKind, SlaMetricProvider, StaticMetricProvider};
pub use render::{render, render_text, RenderedReport};
pub use report::{render_csv, render_json, ReportAssembler, ReportData, ReportRow};
pub use timerange::{parse_timestamp, segment, CalendarInterval, DayBound, Period, Timerange};

use anyhow::Context;
use tracing::info;

/// Generate report data from a SQLite metric store using resolved configuration
pub fn run_report(
    backend: &SqliteBackend,
    config: &ResolvedConfig,
    timerange: &Timerange,
) -> anyhow::Result<ReportData> {
    let objects = load_objects(backend, config)?;
    let assembler = ReportAssembler::new(config.kind, backend);
    let data = assembler.assemble(
        timerange,
        &objects,
        config.interval.as_ref(),
        Some(&config.filter),
    )?;
    Ok(data)
}

/// Same as [`run_report`], fetching availability concurrently through `pool`
///
/// The inventory still comes from `backend`; rows keep its order.
pub fn run_report_parallel(
    backend: &SqliteBackend,
    pool: &SqlitePool,
    config: &ResolvedConfig,
    timerange: &Timerange,
) -> anyhow::Result<ReportData> {
    let objects = load_objects(backend, config)?;
    let assembler = ReportAssembler::new(config.kind, pool);
    let data = assembler.assemble_parallel(
        timerange,
        &objects,
        config.interval.as_ref(),
        Some(&config.filter),
    )?;
    Ok(data)
}

fn load_objects(backend: &SqliteBackend, config: &ResolvedConfig) -> anyhow::Result<Vec<ObjectRef>> {
    let objects = backend
        .objects(config.kind)
        .context("failed to load monitored objects")?;
    info!(
        kind = config.kind.as_str(),
        objects = objects.len(),
        filter = config.filter.expression(),
        "generating report"
    );
    Ok(objects)
}
