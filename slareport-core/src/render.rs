//! Presentation table for SLA reports
//!
//! Rendering is a pure projection of [`ReportData`]: values are rounded for
//! display only and the data itself is never modified.

use crate::classify::{classify, Classification};
use crate::report::{MetricValue, ReportData};
use serde::Serialize;

/// Notice shown instead of a table when a report has no rows
pub const NO_DATA_NOTICE: &str = "No data found.";

/// Label of the totals row
pub const TOTAL_LABEL: &str = "Total";

/// A classified value cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Cell {
    pub value: MetricValue,
    pub classification: Classification,
}

impl Cell {
    fn new(value: MetricValue, threshold: f64) -> Self {
        Cell {
            value,
            classification: classify(value, threshold),
        }
    }

    /// Value rounded to two decimals, `None` when absent
    pub fn display(&self) -> Option<String> {
        self.value.map(format_value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub dimensions: Vec<String>,
    pub cells: Vec<Cell>,
}

/// Averages row; its label spans every dimension column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TotalsRow {
    pub label: String,
    pub span: usize,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<TableRow>,
    pub totals: TotalsRow,
}

impl Table {
    /// All body cells followed by the totals cells
    pub fn cells(&self) -> impl Iterator<Item = &Cell> {
        self.rows
            .iter()
            .flat_map(|row| row.cells.iter())
            .chain(self.totals.cells.iter())
    }
}

/// Either a table or the empty-report notice
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderedReport {
    NoData { notice: String },
    Table(Table),
}

impl RenderedReport {
    pub fn table(&self) -> Option<&Table> {
        match self {
            RenderedReport::Table(table) => Some(table),
            RenderedReport::NoData { .. } => None,
        }
    }
}

/// Project report data into a classified table
pub fn render(data: &ReportData, threshold: f64) -> RenderedReport {
    if data.rows.is_empty() {
        return RenderedReport::NoData {
            notice: NO_DATA_NOTICE.to_string(),
        };
    }

    let header = data
        .dimension_labels
        .iter()
        .chain(&data.value_labels)
        .cloned()
        .collect();

    let rows = data
        .rows
        .iter()
        .map(|row| TableRow {
            dimensions: row.dimensions.clone(),
            cells: row.values.iter().map(|v| Cell::new(*v, threshold)).collect(),
        })
        .collect();

    let totals = TotalsRow {
        label: TOTAL_LABEL.to_string(),
        span: data.dimension_labels.len(),
        cells: data
            .averages
            .iter()
            .map(|v| Cell::new(*v, threshold))
            .collect(),
    };

    RenderedReport::Table(Table {
        header,
        rows,
        totals,
    })
}

/// Round half away from zero to two decimals and print the shortest form
///
/// `98.4`, `100`, `99.99`. The scaled value is first cut to 15 significant
/// digits so decimal halves stored inexactly (`1.005`) still round up.
pub fn format_value(value: f64) -> String {
    let scaled = value * 100.0;
    let scaled = format!("{:.14e}", scaled).parse::<f64>().unwrap_or(scaled);
    let rounded = scaled.round() / 100.0;
    // avoid printing "-0"
    if rounded == 0.0 {
        return "0".to_string();
    }
    format!("{}", rounded)
}

/// Render as a fixed-width text table
pub fn render_text(report: &RenderedReport) -> String {
    let table = match report {
        RenderedReport::NoData { notice } => return format!("{}\n", notice),
        RenderedReport::Table(table) => table,
    };

    let mut lines: Vec<Vec<String>> = Vec::with_capacity(table.rows.len() + 2);
    lines.push(table.header.clone());
    for row in &table.rows {
        let mut line = row.dimensions.clone();
        line.extend(row.cells.iter().map(text_cell));
        lines.push(line);
    }
    let mut totals = vec![table.totals.label.clone()];
    totals.extend(std::iter::repeat(String::new()).take(table.totals.span.saturating_sub(1)));
    totals.extend(table.totals.cells.iter().map(text_cell));
    lines.push(totals);

    let columns = table.header.len();
    let widths: Vec<usize> = (0..columns)
        .map(|i| {
            lines
                .iter()
                .filter_map(|line| line.get(i))
                .map(|s| s.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut output = String::new();
    for line in &lines {
        let padded: Vec<String> = line
            .iter()
            .zip(&widths)
            .map(|(s, w)| format!("{:<width$}", s, width = w))
            .collect();
        output.push_str(padded.join("  ").trim_end());
        output.push('\n');
    }
    output
}

fn text_cell(cell: &Cell) -> String {
    match cell.display() {
        Some(value) if cell.classification == Classification::Nok => format!("{} (nok)", value),
        Some(value) => value,
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportRow;

    fn two_hosts() -> ReportData {
        ReportData::new(
            vec!["Hostname".to_string()],
            vec!["SLA".to_string()],
            vec![
                ReportRow {
                    dimensions: vec!["db01".to_string()],
                    values: vec![Some(97.0)],
                },
                ReportRow {
                    dimensions: vec!["web01".to_string()],
                    values: vec![Some(99.8)],
                },
            ],
        )
    }

    #[test]
    fn test_empty_report_renders_notice() {
        let data = ReportData::new(vec!["Hostname".to_string()], vec!["SLA".to_string()], vec![]);
        let rendered = render(&data, 99.5);
        assert_eq!(
            rendered,
            RenderedReport::NoData {
                notice: "No data found.".to_string()
            }
        );
        assert!(rendered.table().is_none());
    }

    #[test]
    fn test_two_hosts_end_to_end() {
        let rendered = render(&two_hosts(), 99.5);
        let table = rendered.table().unwrap();

        assert_eq!(table.header, vec!["Hostname", "SLA"]);
        assert_eq!(table.rows[0].cells[0].classification, Classification::Nok);
        assert_eq!(table.rows[1].cells[0].classification, Classification::Ok);
        assert_eq!(table.totals.label, "Total");
        assert_eq!(table.totals.span, 1);
        assert_eq!(table.totals.cells[0].classification, Classification::Nok);
        assert_eq!(table.totals.cells[0].display().as_deref(), Some("98.4"));

        let noks = table
            .cells()
            .filter(|c| c.classification == Classification::Nok)
            .count();
        assert_eq!(noks, 2);
    }

    #[test]
    fn test_render_does_not_round_data() {
        let data = ReportData::new(
            vec!["Hostname".to_string()],
            vec!["SLA".to_string()],
            vec![ReportRow {
                dimensions: vec!["h".to_string()],
                values: vec![Some(99.496)],
            }],
        );
        let rendered = render(&data, 99.5);
        let cell = rendered.table().unwrap().rows[0].cells[0];
        assert_eq!(cell.value, Some(99.496));
        assert_eq!(cell.display().as_deref(), Some("99.5"));
        assert_eq!(cell.classification, Classification::Nok);
        assert_eq!(data.rows[0].values, vec![Some(99.496)]);
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(100.0), "100");
        assert_eq!(format_value(98.4), "98.4");
        assert_eq!(format_value(99.994), "99.99");
        assert_eq!(format_value(0.001), "0");
        assert_eq!(format_value(12.345678), "12.35");
    }

    #[test]
    fn test_format_value_rounds_inexact_halves_up() {
        assert_eq!(format_value(1.005), "1.01");
        assert_eq!(format_value(2.675), "2.68");
        assert_eq!(format_value(99.995), "100");
        assert_eq!(format_value(99.985), "99.99");
    }

    #[test]
    fn test_absent_cells_are_unknown() {
        let data = ReportData::new(
            vec!["Hostname".to_string()],
            vec!["SLA".to_string()],
            vec![ReportRow {
                dimensions: vec!["h".to_string()],
                values: vec![None],
            }],
        );
        let rendered = render(&data, 99.5);
        let table = rendered.table().unwrap();
        assert_eq!(table.rows[0].cells[0].classification, Classification::Unknown);
        assert_eq!(table.totals.cells[0].classification, Classification::Unknown);
        assert_eq!(table.rows[0].cells[0].display(), None);
    }

    #[test]
    fn test_render_text() {
        let text = render_text(&render(&two_hosts(), 99.5));
        assert_eq!(
            text,
            "Hostname  SLA\n\
             db01      97 (nok)\n\
             web01     99.8\n\
             Total     98.4 (nok)\n"
        );
        assert_eq!(
            render_text(&RenderedReport::NoData {
                notice: NO_DATA_NOTICE.to_string()
            }),
            "No data found.\n"
        );
    }
}
