//! Configuration file support for slareport
//!
//! Loads report configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.slareportrc.json` in the working directory
//! 3. `slareport.config.json` in the working directory
//!
//! All fields are optional. CLI flags take precedence over config file values.

use crate::backend::DEFAULT_AVAILABILITY_QUERY;
use crate::classify::DEFAULT_THRESHOLD;
use crate::filter::{self, ValidatedFilter, MATCH_ALL};
use crate::provider::ReportKind;
use crate::timerange::CalendarInterval;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Report configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// SLA pass/fail cutoff in percent (default: 99.5)
    #[serde(default)]
    pub threshold: Option<f64>,

    /// Object filter expression (default: "*", no filtering)
    #[serde(default)]
    pub filter: Option<String>,

    /// ISO-8601 calendar interval for per-period columns (default: whole range)
    #[serde(default)]
    pub interval: Option<String>,

    /// Report over hosts or services (default: host)
    #[serde(default)]
    pub kind: Option<ReportKind>,

    /// Path to the SQLite metric store
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// SQL returning the availability of `?1` between `?2` and `?3`
    #[serde(default)]
    pub availability_query: Option<String>,
}

/// Resolved configuration with parsed interval and validated filter
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub threshold: f64,
    pub filter: ValidatedFilter,
    pub interval: Option<CalendarInterval>,
    pub kind: ReportKind,
    pub database: Option<PathBuf>,
    pub availability_query: String,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

impl ReportConfig {
    /// Validate the configuration for logical errors
    ///
    /// The filter is checked against the safelist of this config's own kind.
    pub fn validate(&self) -> Result<()> {
        self.validate_settings()?;
        if let Some(ref expression) = self.filter {
            filter::validate(expression, &self.kind.unwrap_or_default().safelist())?;
        }
        Ok(())
    }

    /// Checks that hold whatever kind the report ends up running as
    ///
    /// A filter only has to be valid for some report kind here, since CLI
    /// overrides may still change the kind. `resolve` checks it against the
    /// effective kind.
    fn validate_settings(&self) -> Result<()> {
        if let Some(threshold) = self.threshold {
            if !threshold.is_finite() || !(0.0..=100.0).contains(&threshold) {
                anyhow::bail!("threshold must be between 0 and 100 (got {})", threshold);
            }
        }

        if let Some(ref interval) = self.interval {
            interval
                .parse::<CalendarInterval>()
                .with_context(|| format!("invalid interval: {}", interval))?;
        }

        if let Some(ref expression) = self.filter {
            let valid_for_any_kind = ReportKind::ALL
                .iter()
                .any(|kind| filter::validate(expression, &kind.safelist()).is_ok());
            if !valid_for_any_kind {
                filter::validate(expression, &self.kind.unwrap_or_default().safelist())?;
            }
        }

        if let Some(ref query) = self.availability_query {
            if query.trim().is_empty() {
                anyhow::bail!("availability_query must not be empty");
            }
        }

        Ok(())
    }

    /// Values from `overrides` win over values from `self`
    pub fn merge(self, overrides: ReportConfig) -> ReportConfig {
        ReportConfig {
            threshold: overrides.threshold.or(self.threshold),
            filter: overrides.filter.or(self.filter),
            interval: overrides.interval.or(self.interval),
            kind: overrides.kind.or(self.kind),
            database: overrides.database.or(self.database),
            availability_query: overrides.availability_query.or(self.availability_query),
        }
    }

    /// Resolve config into parsed form ready for use
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let kind = self.kind.unwrap_or_default();
        let filter = filter::validate(
            self.filter.as_deref().unwrap_or(MATCH_ALL),
            &kind.safelist(),
        )?;
        let interval = self
            .interval
            .as_deref()
            .map(str::parse::<CalendarInterval>)
            .transpose()?;

        Ok(ResolvedConfig {
            threshold: self.threshold.unwrap_or(DEFAULT_THRESHOLD),
            filter,
            interval,
            kind,
            database: self.database.clone(),
            availability_query: self
                .availability_query
                .clone()
                .unwrap_or_else(|| DEFAULT_AVAILABILITY_QUERY.to_string()),
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        ReportConfig::default().resolve()
    }
}

/// Discover and load a config file from the project root
///
/// Search order:
/// 1. `.slareportrc.json`
/// 2. `slareport.config.json`
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(project_root: &Path) -> Result<Option<(ReportConfig, PathBuf)>> {
    for name in [".slareportrc.json", "slareport.config.json"] {
        let path = project_root.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<ReportConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let mut config: ReportConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate_settings()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    // relative database paths are relative to the config file
    if let (Some(db), Some(dir)) = (config.database.as_ref(), path.parent()) {
        if db.is_relative() {
            config.database = Some(dir.join(db));
        }
    }

    Ok(config)
}

/// Load the config for a project without resolving it
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config from the project root.
/// Returns default config if nothing is found.
pub fn load_config(
    project_root: &Path,
    config_path: Option<&Path>,
) -> Result<(ReportConfig, Option<PathBuf>)> {
    if let Some(path) = config_path {
        let config = load_config_file(path)?;
        return Ok((config, Some(path.to_path_buf())));
    }
    Ok(match discover_config(project_root)? {
        Some((config, path)) => (config, Some(path)),
        None => (ReportConfig::default(), None),
    })
}

/// Load, merge CLI overrides into, and resolve config for a project
pub fn load_and_resolve(
    project_root: &Path,
    config_path: Option<&Path>,
    overrides: ReportConfig,
) -> Result<ResolvedConfig> {
    let (config, source_path) = load_config(project_root, config_path)?;
    let mut resolved = config.merge(overrides).resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}
