//! Error kinds surfaced by report generation

use chrono::NaiveDateTime;
use thiserror::Error;

/// Result alias for report generation
pub type Result<T> = std::result::Result<T, ReportError>;

/// Errors that abort a report
///
/// An empty result is not an error: zero objects produce an empty
/// `ReportData` and a "No data found" notice.
#[derive(Error, Debug)]
pub enum ReportError {
    /// Filter references a column outside the safelist or does not parse
    #[error("Cannot apply the filter {expression}. You can only use the following columns: {allowed}")]
    InvalidFilterExpression {
        expression: String,
        allowed: String,
        reason: String,
    },

    /// The metric source failed for one (object, period) pair
    #[error("failed to fetch availability for object {object_id} between {start} and {end}")]
    MetricProviderFailure {
        object_id: String,
        start: NaiveDateTime,
        end: NaiveDateTime,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid time range: start {start} is after end {end}")]
    InvalidTimerange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("invalid timestamp '{0}' (expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)")]
    InvalidTimestamp(String),
}

impl ReportError {
    /// Underlying parser or safelist message for an invalid filter
    pub fn reason(&self) -> Option<&str> {
        match self {
            ReportError::InvalidFilterExpression { reason, .. } => Some(reason),
            _ => None,
        }
    }
}
