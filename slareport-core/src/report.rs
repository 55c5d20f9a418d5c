//! Report data model, assembly and data exports
//!
//! Global invariants enforced:
//! - Every row has one dimension per dimension label and one value per value label
//! - `averages[i]` is the mean of the present values of column `i`, absent if none
//! - Rows keep the input object order; no reordering or deduplication
//! - Absent values are never treated as 0 or 100

use crate::error::{ReportError, Result};
use crate::filter::ValidatedFilter;
use crate::provider::{ObjectRef, ReportKind, SlaMetricProvider};
use crate::timerange::{segment, CalendarInterval, Period, Timerange};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Availability percentage of one object over one period; `None` means no data
pub type MetricValue = Option<f64>;

/// One monitored object and its values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub dimensions: Vec<String>,
    pub values: Vec<MetricValue>,
}

/// Tabular SLA report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReportData {
    pub dimension_labels: Vec<String>,
    pub value_labels: Vec<String>,
    pub rows: Vec<ReportRow>,
    pub averages: Vec<MetricValue>,
}

impl ReportData {
    /// Build report data, computing the column averages from `rows`
    pub fn new(
        dimension_labels: Vec<String>,
        value_labels: Vec<String>,
        rows: Vec<ReportRow>,
    ) -> Self {
        let averages = column_averages(&rows, value_labels.len());
        ReportData {
            dimension_labels,
            value_labels,
            rows,
            averages,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Mean of the present values per column
pub fn column_averages(rows: &[ReportRow], columns: usize) -> Vec<MetricValue> {
    (0..columns)
        .map(|i| {
            let (sum, count) = rows
                .iter()
                .filter_map(|row| row.values.get(i).copied().flatten())
                .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
            (count > 0).then(|| sum / count as f64)
        })
        .collect()
}

/// Builds [`ReportData`] by asking a metric source for every object and period
pub struct ReportAssembler<'p, P: ?Sized> {
    kind: ReportKind,
    provider: &'p P,
}

impl<'p, P: SlaMetricProvider + ?Sized> ReportAssembler<'p, P> {
    pub fn new(kind: ReportKind, provider: &'p P) -> Self {
        ReportAssembler { kind, provider }
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    /// Assemble a report over `timerange`
    ///
    /// Without an interval the whole range is one column labelled with the
    /// metric name; with one, each period becomes a column. Objects rejected
    /// by `filter` are skipped. The first metric source failure aborts the
    /// whole report.
    pub fn assemble(
        &self,
        timerange: &Timerange,
        objects: &[ObjectRef],
        interval: Option<&CalendarInterval>,
        filter: Option<&ValidatedFilter>,
    ) -> Result<ReportData> {
        let periods = plan_periods(timerange, interval);
        let selected = select_objects(objects, filter);

        let rows = selected
            .iter()
            .map(|object| self.build_row(object, &periods))
            .collect::<Result<Vec<_>>>()?;

        Ok(self.finish(&periods, interval.is_some(), rows))
    }

    fn build_row(&self, object: &ObjectRef, periods: &[Period]) -> Result<ReportRow> {
        let values = periods
            .iter()
            .map(|period| self.fetch(object, period))
            .collect::<Result<Vec<_>>>()?;
        Ok(ReportRow {
            dimensions: object.dimensions.clone(),
            values,
        })
    }

    fn fetch(&self, object: &ObjectRef, period: &Period) -> Result<MetricValue> {
        let value = self
            .kind
            .fetch_sla(self.provider, object, period)
            .and_then(check_percentage)
            .map_err(|source| ReportError::MetricProviderFailure {
                object_id: object.id.clone(),
                start: period.start,
                end: period.end,
                source,
            })?;
        debug!(
            object = %object.id,
            start = %period.start,
            end = %period.end,
            value = ?value,
            "fetched availability"
        );
        Ok(value)
    }

    fn finish(&self, periods: &[Period], segmented: bool, rows: Vec<ReportRow>) -> ReportData {
        let value_labels = if segmented {
            periods.iter().map(Period::label).collect()
        } else {
            vec![self.kind.metric_label().to_string()]
        };

        let data = ReportData::new(self.kind.dimension_labels(), value_labels, rows);
        for (label, average) in data.value_labels.iter().zip(&data.averages) {
            if average.is_none() && !data.rows.is_empty() {
                warn!(column = %label, "no availability data for any object");
            }
        }
        info!(
            kind = self.kind.as_str(),
            rows = data.rows.len(),
            columns = data.value_labels.len(),
            "assembled report"
        );
        data
    }
}

impl<'p, P: SlaMetricProvider + Sync + ?Sized> ReportAssembler<'p, P> {
    /// Same as [`ReportAssembler::assemble`], fetching objects concurrently
    ///
    /// Rows come back in input order.
    pub fn assemble_parallel(
        &self,
        timerange: &Timerange,
        objects: &[ObjectRef],
        interval: Option<&CalendarInterval>,
        filter: Option<&ValidatedFilter>,
    ) -> Result<ReportData> {
        let periods = plan_periods(timerange, interval);
        let selected = select_objects(objects, filter);

        let rows = selected
            .par_iter()
            .map(|object| self.build_row(object, &periods))
            .collect::<Result<Vec<_>>>()?;

        Ok(self.finish(&periods, interval.is_some(), rows))
    }
}

fn plan_periods(timerange: &Timerange, interval: Option<&CalendarInterval>) -> Vec<Period> {
    match interval {
        Some(interval) => segment(timerange, interval),
        None => vec![timerange.as_period()],
    }
}

fn select_objects<'a>(
    objects: &'a [ObjectRef],
    filter: Option<&ValidatedFilter>,
) -> Vec<&'a ObjectRef> {
    match filter {
        Some(filter) if !filter.is_match_all() => objects
            .iter()
            .filter(|object| filter.matches(&object.attributes))
            .collect(),
        _ => objects.iter().collect(),
    }
}

fn check_percentage(value: MetricValue) -> anyhow::Result<MetricValue> {
    match value {
        Some(v) if !v.is_finite() || !(0.0..=100.0).contains(&v) => {
            anyhow::bail!("availability {} is outside 0..=100", v)
        }
        other => Ok(other),
    }
}

/// Render report data as JSON (absent values are `null`)
pub fn render_json(data: &ReportData) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

/// Render report data as CSV with a trailing `Total` row
///
/// Values keep full precision; absent values are empty cells.
pub fn render_csv(data: &ReportData) -> String {
    let mut output = String::new();

    let header: Vec<&str> = data
        .dimension_labels
        .iter()
        .chain(&data.value_labels)
        .map(String::as_str)
        .collect();
    push_csv_line(&mut output, header);

    for row in &data.rows {
        let values: Vec<String> = row.values.iter().map(|v| csv_value(*v)).collect();
        let fields = row
            .dimensions
            .iter()
            .map(String::as_str)
            .chain(values.iter().map(String::as_str));
        push_csv_line(&mut output, fields);
    }

    if !data.rows.is_empty() {
        let averages: Vec<String> = data.averages.iter().map(|v| csv_value(*v)).collect();
        let padding = data.dimension_labels.len().saturating_sub(1);
        let fields = std::iter::once("Total")
            .chain(std::iter::repeat("").take(padding))
            .chain(averages.iter().map(String::as_str));
        push_csv_line(&mut output, fields);
    }

    output
}

fn csv_value(value: MetricValue) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn push_csv_line<'a>(output: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    let line = fields
        .into_iter()
        .map(csv_escape)
        .collect::<Vec<_>>()
        .join(",");
    output.push_str(&line);
    output.push('\n');
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
