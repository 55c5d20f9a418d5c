//! slareport CLI - SLA compliance reports for monitored hosts and services

#![deny(warnings)]

// Global invariants enforced:
// - Configuration errors are reported before any metric is fetched
// - Logs go to stderr; report output goes to stdout or --output

use anyhow::Context;
use clap::{Parser, Subcommand};
use slareport_core::config::{self, ReportConfig};
use slareport_core::html::render_html_document;
use slareport_core::provider::ReportKind;
use slareport_core::{
    parse_timestamp, render, render_csv, render_json, render_text, run_report,
    run_report_parallel, DayBound, SqliteBackend, SqlitePool, Timerange,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "slareport")]
#[command(about = "SLA compliance reports for monitored hosts and services")]
#[command(version = env!("SLAREPORT_VERSION"))]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an SLA report for a time range
    Report {
        /// Range start (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)
        #[arg(long)]
        start: String,

        /// Range end, inclusive (a bare date means the end of that day)
        #[arg(long)]
        end: String,

        /// Report over hosts or services (overrides config file)
        #[arg(long)]
        kind: Option<ReportKind>,

        /// ISO-8601 interval for per-period columns, e.g. P1D or P1M
        #[arg(long)]
        interval: Option<String>,

        /// SLA threshold in percent (overrides config file)
        #[arg(long)]
        threshold: Option<f64>,

        /// Object filter expression, e.g. "hostgroup_name=web*"
        #[arg(long)]
        filter: Option<String>,

        /// Path to the SQLite metric store (overrides config file)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Output file path (for HTML format, default: slareport.html)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Fetch availability concurrently over a pool of read-only connections
        #[arg(long)]
        parallel: bool,
    },
    /// Inspect configuration files
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file without generating a report
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Csv,
    Html,
}

#[derive(Clone, Copy, PartialEq, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    initialize_tracing(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Report {
            start,
            end,
            kind,
            interval,
            threshold,
            filter,
            db,
            format,
            output,
            config,
            parallel,
        } => {
            let overrides = ReportConfig {
                threshold,
                filter,
                interval,
                kind,
                database: db,
                availability_query: None,
            };
            let timerange = Timerange::new(
                parse_timestamp(&start, DayBound::Start)?,
                parse_timestamp(&end, DayBound::End)?,
            )?;
            let report = ReportRequest {
                timerange,
                overrides,
                format,
                output,
                config,
                parallel,
            };
            handle_report(report)?;
        }
        Commands::Config { action } => handle_config(action)?,
    }

    Ok(())
}

/// Install the global subscriber writing to stderr
///
/// RUST_LOG wins when set; otherwise `warn`, or `debug` with --verbose.
fn initialize_tracing(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (text_layer, json_layer) = match format {
        LogFormat::Text => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .init();
}

struct ReportRequest {
    timerange: Timerange,
    overrides: ReportConfig,
    format: OutputFormat,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    parallel: bool,
}

fn handle_report(request: ReportRequest) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let resolved = config::load_and_resolve(&cwd, request.config.as_deref(), request.overrides)?;
    if let Some(ref path) = resolved.config_path {
        debug!(path = %path.display(), "loaded config");
    }

    let database = resolved.database.clone().ok_or_else(|| {
        anyhow::anyhow!("no metric database configured (use --db or set \"database\" in the config file)")
    })?;
    let backend = SqliteBackend::open(&database)
        .with_context(|| format!("failed to open metric database: {}", database.display()))?
        .with_availability_query(resolved.availability_query.clone());

    let data = if request.parallel {
        let pool = SqlitePool::open(&database)?
            .with_availability_query(resolved.availability_query.clone());
        run_report_parallel(&backend, &pool, &resolved, &request.timerange)?
    } else {
        run_report(&backend, &resolved, &request.timerange)?
    };

    match request.format {
        OutputFormat::Json => println!("{}", render_json(&data)),
        OutputFormat::Csv => print!("{}", render_csv(&data)),
        OutputFormat::Text => print!("{}", render_text(&render(&data, resolved.threshold))),
        OutputFormat::Html => {
            let title = format!(
                "{} SLA report: {}",
                if resolved.kind == ReportKind::ServiceSla {
                    "Service"
                } else {
                    "Host"
                },
                request.timerange.as_period().label()
            );
            let html = render_html_document(&render(&data, resolved.threshold), &title);
            let path = request
                .output
                .unwrap_or_else(|| PathBuf::from("slareport.html"));
            write_report(&path, &html)?;
            info!(path = %path.display(), "wrote HTML report");
            eprintln!("HTML report written to: {}", path.display());
        }
    }

    Ok(())
}

fn handle_config(action: ConfigAction) -> anyhow::Result<()> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;

    match action {
        ConfigAction::Validate { path } => {
            let (config, source) = config::load_config(&cwd, path.as_deref())?;
            config.validate()?;
            match source {
                Some(p) => println!("Config valid: {}", p.display()),
                None => println!("No config file found, defaults are valid"),
            }
        }
        ConfigAction::Show { path } => {
            let resolved = config::load_and_resolve(&cwd, path.as_deref(), ReportConfig::default())?;

            match resolved.config_path {
                Some(ref p) => println!("Config file: {}", p.display()),
                None => println!("Config file: (none, using defaults)"),
            }
            println!();
            println!("Report:");
            println!("  kind: {}", resolved.kind.as_str());
            println!("  threshold: {}", resolved.threshold);
            println!("  filter: {}", resolved.filter.expression());
            match resolved.interval {
                Some(ref interval) => println!("  interval: {}", interval),
                None => println!("  interval: (whole range)"),
            }
            println!();
            println!("Metric store:");
            match resolved.database {
                Some(ref db) => println!("  database: {}", db.display()),
                None => println!("  database: (not set)"),
            }
            println!("  availability_query: {}", resolved.availability_query);
        }
    }

    Ok(())
}

/// Write report output atomically (temp file + rename)
fn write_report(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let temp_path = path.with_extension("html.tmp");
    std::fs::write(&temp_path, contents)
        .with_context(|| format!("failed to write temporary file: {}", temp_path.display()))?;
    std::fs::rename(&temp_path, path)
        .with_context(|| format!("failed to rename temporary file to: {}", path.display()))?;

    Ok(())
}
