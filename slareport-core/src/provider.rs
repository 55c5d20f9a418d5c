//! Monitored objects, report kinds and the availability source boundary

use crate::filter::{Attributes, Safelist};
use crate::timerange::Period;
use anyhow::{bail, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A monitored host or service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Identifier the metric source is keyed by
    pub id: String,
    /// Display fields in report order (host, or host + service)
    pub dimensions: Vec<String>,
    /// Filterable columns of the object
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl ObjectRef {
    pub fn host(id: impl Into<String>, host: impl Into<String>) -> Self {
        ObjectRef {
            id: id.into(),
            dimensions: vec![host.into()],
            attributes: Attributes::new(),
        }
    }

    pub fn service(
        id: impl Into<String>,
        host: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        ObjectRef {
            id: id.into(),
            dimensions: vec![host.into(), service.into()],
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(column.into())
            .or_default()
            .push(value.into());
        self
    }
}

/// Source of availability percentages
///
/// Called once per (object, period) pair. Implementations may batch or cache
/// internally as long as each call answers for exactly its own pair.
pub trait SlaMetricProvider {
    /// Percentage of `[start, end]` the object was available, `None` without data
    fn availability(
        &self,
        object_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<f64>>;
}

impl<T: SlaMetricProvider + ?Sized> SlaMetricProvider for &T {
    fn availability(
        &self,
        object_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<f64>> {
        (**self).availability(object_id, start, end)
    }
}

/// Which objects a report covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReportKind {
    #[default]
    #[serde(rename = "host")]
    HostSla,
    #[serde(rename = "service")]
    ServiceSla,
}

impl ReportKind {
    pub const ALL: [ReportKind; 2] = [ReportKind::HostSla, ReportKind::ServiceSla];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::HostSla => "host",
            ReportKind::ServiceSla => "service",
        }
    }

    pub fn dimension_labels(&self) -> Vec<String> {
        let labels: &[&str] = match self {
            ReportKind::HostSla => &["Hostname"],
            ReportKind::ServiceSla => &["Hostname", "Service"],
        };
        labels.iter().map(|l| l.to_string()).collect()
    }

    /// Label of the value column when the range is not segmented
    pub fn metric_label(&self) -> &'static str {
        "SLA"
    }

    /// Columns a filter may reference for this kind
    pub fn safelist(&self) -> Safelist {
        match self {
            ReportKind::HostSla => Safelist::host(),
            ReportKind::ServiceSla => Safelist::service(),
        }
    }

    /// Fetch one availability value for an object of this kind
    pub fn fetch_sla<P: SlaMetricProvider + ?Sized>(
        &self,
        provider: &P,
        object: &ObjectRef,
        period: &Period,
    ) -> Result<Option<f64>> {
        let expected = match self {
            ReportKind::HostSla => 1,
            ReportKind::ServiceSla => 2,
        };
        if object.dimensions.len() != expected {
            bail!(
                "{} report expects {} display field(s) for object {}, got {}",
                self.as_str(),
                expected,
                object.id,
                object.dimensions.len()
            );
        }
        provider.availability(&object.id, period.start, period.end)
    }
}

impl std::str::FromStr for ReportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" | "hosts" => Ok(ReportKind::HostSla),
            "service" | "services" => Ok(ReportKind::ServiceSla),
            other => bail!("unknown report kind '{}' (expected host or service)", other),
        }
    }
}

/// In-memory availability source
///
/// Per-period values win over per-object values; anything unknown has no data.
#[derive(Debug, Clone, Default)]
pub struct StaticMetricProvider {
    per_object: HashMap<String, Option<f64>>,
    per_period: HashMap<(String, NaiveDateTime, NaiveDateTime), Option<f64>>,
    failing: HashSet<String>,
}

impl StaticMetricProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same value for every period of `object_id`
    pub fn with_value(mut self, object_id: impl Into<String>, value: Option<f64>) -> Self {
        self.per_object.insert(object_id.into(), value);
        self
    }

    pub fn with_period_value(
        mut self,
        object_id: impl Into<String>,
        period: Period,
        value: Option<f64>,
    ) -> Self {
        self.per_period
            .insert((object_id.into(), period.start, period.end), value);
        self
    }

    /// Every lookup for `object_id` fails
    pub fn with_failure(mut self, object_id: impl Into<String>) -> Self {
        self.failing.insert(object_id.into());
        self
    }
}

impl SlaMetricProvider for StaticMetricProvider {
    fn availability(
        &self,
        object_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Option<f64>> {
        if self.failing.contains(object_id) {
            bail!("metric source unavailable for object {}", object_id);
        }
        if let Some(value) = self
            .per_period
            .get(&(object_id.to_string(), start, end))
        {
            return Ok(*value);
        }
        Ok(self.per_object.get(object_id).copied().flatten())
    }
}
