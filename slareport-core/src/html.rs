//! HTML report generation
//!
//! Produces the SLA table as an embeddable fragment, or wrapped in a
//! self-contained document with inline CSS.

use crate::render::{Cell, RenderedReport, Table};

/// Render the report as an HTML fragment
///
/// Empty reports become a single `<p>` notice.
pub fn render_html(report: &RenderedReport) -> String {
    match report {
        RenderedReport::NoData { notice } => format!("<p>{}</p>", html_escape(notice)),
        RenderedReport::Table(table) => render_table(table),
    }
}

/// Render the report as a standalone HTML document
pub fn render_html_document(report: &RenderedReport, title: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{css}</style>
</head>
<body>
    <div class="container">
        <h1>{title}</h1>
        {body}
        {footer}
    </div>
</body>
</html>"#,
        title = html_escape(title),
        css = inline_css(),
        body = render_html(report),
        footer = render_footer(),
    )
}

fn render_table(table: &Table) -> String {
    let header_cells: String = table
        .header
        .iter()
        .map(|label| format!("<th>{}</th>", html_escape(label)))
        .collect();

    let mut rows: Vec<String> = table
        .rows
        .iter()
        .map(|row| {
            let dimensions: String = row
                .dimensions
                .iter()
                .map(|d| format!("<td>{}</td>", html_escape(d)))
                .collect();
            let values: String = row.cells.iter().map(render_value_cell).collect();
            format!("<tr>{}{}</tr>", dimensions, values)
        })
        .collect();

    let totals: String = table.totals.cells.iter().map(render_value_cell).collect();
    rows.push(format!(
        r#"<tr><td colspan="{span}">{label}</td>{totals}</tr>"#,
        span = table.totals.span,
        label = html_escape(&table.totals.label),
        totals = totals,
    ));

    format!(
        r#"<table class="common-table sla-table"><thead><tr>{header}</tr></thead><tbody>{rows}</tbody></table>"#,
        header = header_cells,
        rows = rows.concat(),
    )
}

fn render_value_cell(cell: &Cell) -> String {
    format!(
        r#"<td class="sla-column {class}">{value}</td>"#,
        class = cell.classification.as_str(),
        value = cell.display().unwrap_or_else(|| "—".to_string()),
    )
}

fn inline_css() -> &'static str {
    r#"
body {
    font-family: system-ui, -apple-system, 'Segoe UI', sans-serif;
    line-height: 1.6;
    color: #111827;
    background: #ffffff;
}

.container {
    max-width: 1400px;
    margin: 0 auto;
    padding: 2rem;
}

h1 {
    font-size: 1.5rem;
    margin-bottom: 1rem;
}

.sla-table {
    border-collapse: collapse;
    width: 100%;
}

.sla-table th,
.sla-table td {
    border-bottom: 1px solid #e5e7eb;
    padding: 0.5rem 0.75rem;
    text-align: left;
}

.sla-table th {
    background: #f9fafb;
    font-weight: 600;
}

.sla-column {
    font-variant-numeric: tabular-nums;
    text-align: right;
}

.sla-column.ok {
    background: #dcfce7;
    color: #166534;
}

.sla-column.nok {
    background: #fee2e2;
    color: #991b1b;
}

.sla-column.unknown {
    background: #f3f4f6;
    color: #6b7280;
}

footer {
    margin-top: 2rem;
    color: #6b7280;
    font-size: 0.875rem;
}
"#
}

fn render_footer() -> String {
    r#"<footer>
    <p>Generated by slareport</p>
</footer>"#
        .to_string()
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
