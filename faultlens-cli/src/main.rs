// FaultLens CLI - consolidate log warnings and errors into ranked families

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use faultlens_core::{AnalysisOutcome, Analyzer, AnalyzerConfig, ReportData};
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, ValueEnum, Debug, PartialEq, Eq)]
enum OutputFormat {
    Console,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "faultlens")]
#[command(about = "Group log warnings and errors into families with counts and time series", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory containing the log files (searched recursively)
    log_dir: PathBuf,

    /// Glob for log file names (default: *.log)
    #[arg(long)]
    pattern: Option<String>,

    /// Start of the window, relative to now (e.g. 24h, 2d6h, 1w)
    #[arg(long)]
    since: Option<String>,

    /// End of the window, relative to now (default: 0h)
    #[arg(long)]
    until: Option<String>,

    /// Severity level to analyze; repeat or comma-separate for several
    #[arg(long = "severity", value_name = "LEVEL", value_delimiter = ',')]
    severity: Vec<String>,

    /// Examples kept per family
    #[arg(long)]
    examples: Option<usize>,

    /// Maximum signature length in characters
    #[arg(long)]
    max_signature_length: Option<usize>,

    /// Files larger than this are truncated
    #[arg(long, value_name = "BYTES")]
    max_file_size: Option<u64>,

    /// Process files on a worker pool
    #[arg(long)]
    parallel: bool,

    /// Worker pool size (default: number of CPUs)
    #[arg(long)]
    workers: Option<usize>,

    /// Canonicalization rule set: default, filenet or custom
    #[arg(long)]
    normalizer: Option<String>,

    /// Config file (default: ./.faultlens.toml, then ~/.config/faultlens/config.toml)
    #[arg(long, env = "FAULTLENS_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "console")]
    format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Families shown in the console summary
    #[arg(long, default_value = "10")]
    top: usize,

    /// Debug logging
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    /// Flags win over whatever the config file said.
    fn apply_to(&self, config: &mut AnalyzerConfig) {
        if let Some(pattern) = &self.pattern {
            config.file_pattern = pattern.clone();
        }
        if let Some(since) = &self.since {
            config.since = Some(since.clone());
        }
        if let Some(until) = &self.until {
            config.until = Some(until.clone());
        }
        if !self.severity.is_empty() {
            config.severity_levels = self.severity.clone();
        }
        if let Some(examples) = self.examples {
            config.max_examples_per_family = examples;
        }
        if let Some(length) = self.max_signature_length {
            config.max_signature_length = length;
        }
        if let Some(bytes) = self.max_file_size {
            config.max_file_size_bytes = bytes;
        }
        if self.parallel {
            config.enable_parallel_processing = true;
        }
        if let Some(workers) = self.workers {
            config.worker_threads = workers;
        }
        if let Some(normalizer) = &self.normalizer {
            config.normalizer = normalizer.clone();
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("faultlens={level}").parse()?)
        .add_directive(format!("faultlens_core={level}").parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut config = AnalyzerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_to(&mut config);
    let analyzer = Analyzer::new(config).context("Invalid configuration")?;

    let cancel = analyzer.cancellation_token();
    let log_dir = cli.log_dir.clone();
    let mut task = tokio::task::spawn_blocking(move || analyzer.analyze_dir(&log_dir));

    let joined = tokio::select! {
        joined = &mut task => joined,
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => {
                    warn!("Interrupt received, finishing with partial results");
                    cancel.cancel();
                }
                Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
            }
            task.await
        }
    };
    let outcome = joined
        .context("Analysis task failed")?
        .with_context(|| format!("Failed to analyze {}", cli.log_dir.display()))?;

    write_report(&cli, &outcome)
}

fn write_report(cli: &Cli, outcome: &AnalysisOutcome) -> Result<()> {
    let report = ReportData::from_outcome(outcome);
    let rendered = match cli.format {
        OutputFormat::Json => report.to_json_pretty().context("Failed to serialize report")?,
        OutputFormat::Console => render_console(&report, cli.top),
    };

    match &cli.output {
        Some(path) => {
            fs::write(path, rendered).with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn render_console(report: &ReportData, top: usize) -> String {
    let meta = &report.metadata;
    let mut out = String::new();

    let bound = |ts: Option<chrono::NaiveDateTime>| ts.map_or_else(|| "open".to_string(), |t| t.to_string());
    let _ = writeln!(out, "FaultLens report");
    let _ = writeln!(out, "Window:   {} .. {}", bound(report.window.since), bound(report.window.until));
    let _ = writeln!(
        out,
        "Files:    {} scanned, {} truncated, {} unreadable ({} lines, {} ms)",
        meta.files_scanned, meta.files_truncated, meta.files_unreadable, meta.lines_read, meta.elapsed_ms
    );
    let _ = writeln!(
        out,
        "Entries:  {} in {} families (normalizer: {})",
        report.total_entries,
        report.families.len(),
        meta.normalizer
    );
    if meta.aborted {
        let _ = writeln!(out, "NOTE: analysis was cancelled; results are partial");
    }

    if report.families.is_empty() {
        let _ = writeln!(out, "\nNo matching entries.");
    } else {
        let _ = writeln!(out, "\n{:>4} {:>8} {:>7}  {:<19}  {:<19}  Family", "#", "Count", "Share", "First seen", "Last seen");
        for family in report.top(top) {
            let seen = |ts: Option<chrono::NaiveDateTime>| {
                ts.map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            };
            let _ = writeln!(
                out,
                "{:>4} {:>8} {:>6.1}%  {:<19}  {:<19}  {}",
                family.rank,
                family.count,
                family.share,
                seen(family.first_seen),
                seen(family.last_seen),
                family.label
            );
            if let Some(example) = family.examples.first() {
                let first_line = example.text.lines().next().unwrap_or("");
                let _ = writeln!(
                    out,
                    "{:>44}e.g. {}:{}  {}",
                    "",
                    example.source_file.display(),
                    example.line_start,
                    first_line
                );
            }
        }
        if report.families.len() > top {
            let _ = writeln!(out, "... {} more families", report.families.len() - top);
        }
    }

    if !meta.warnings.is_empty() {
        let _ = writeln!(out, "\nWarnings:");
        for warning in &meta.warnings {
            let _ = writeln!(out, "  - {}", warning);
        }
    }
    out
}
