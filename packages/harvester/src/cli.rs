//! Command-line interface for the harvester.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::config::{HarvestConfig, DEFAULT_MAX_YEAR, DEFAULT_MIN_YEAR, LEGINFO_BASE_URL};
use crate::content::extract_bill_text;
use crate::error::Result;
use crate::harvester::Harvester;
use crate::session::sessions;
use crate::store::replace_atomic;
use crate::types::HarvestSummary;

/// Leginfo Harvester - Download California bill texts, one file per bill.
#[derive(Parser)]
#[command(name = "leginfo-harvester")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Harvest every session in the year range into the data directory.
    Harvest(HarvestArgs),

    /// Print the sessions a harvest would visit, with their listing URLs.
    Sessions {
        /// First year of the range (inclusive)
        #[arg(long, default_value_t = DEFAULT_MIN_YEAR)]
        min_year: u32,

        /// Upper bound of the range; the last session starts at max_year - 2
        #[arg(long, default_value_t = DEFAULT_MAX_YEAR)]
        max_year: u32,

        /// Host the listing URLs are built on
        #[arg(long, default_value = LEGINFO_BASE_URL)]
        base_url: String,
    },

    /// Extract the bill text from a saved bill page.
    Extract {
        /// HTML file of a bill detail page
        file: PathBuf,
    },
}

/// Flags for `harvest`; unset flags keep the environment or default value.
#[derive(Args, Debug, Default)]
pub struct HarvestArgs {
    /// First year of the range (inclusive)
    #[arg(long)]
    pub min_year: Option<u32>,

    /// Upper bound of the range; the last session starts at max_year - 2
    #[arg(long)]
    pub max_year: Option<u32>,

    /// Maximum concurrent requests
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Retries after the first attempt for transient failures
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Shortest pause after each bill page, in milliseconds
    #[arg(long)]
    pub delay_min_ms: Option<u64>,

    /// Longest pause after each bill page, in milliseconds
    #[arg(long)]
    pub delay_max_ms: Option<u64>,

    /// Storage root (default: data/raw)
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Host to harvest from (default: https://leginfo.legislature.ca.gov)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Write the run summary as YAML to this path
    #[arg(long)]
    pub summary: Option<PathBuf>,
}

impl HarvestArgs {
    /// Layer the flags that were given over `config`.
    pub fn apply(&self, mut config: HarvestConfig) -> HarvestConfig {
        if let Some(min_year) = self.min_year {
            config.min_year = min_year;
        }
        if let Some(max_year) = self.max_year {
            config.max_year = max_year;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(secs) = self.timeout {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(ms) = self.delay_min_ms {
            config.delay_min = Duration::from_millis(ms);
        }
        if let Some(ms) = self.delay_max_ms {
            config.delay_max = Duration::from_millis(ms);
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        config
    }
}

/// How a successful invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Clean,
    /// The run finished but some tasks or listings failed.
    CompletedWithFailures,
    /// Cancellation left bills or sessions unharvested.
    Interrupted,
}

impl RunStatus {
    /// Status of a finished harvest; an interrupted run outranks failures.
    #[must_use]
    pub fn of(summary: &HarvestSummary) -> Self {
        if summary.is_interrupted() {
            Self::Interrupted
        } else if summary.has_failures() {
            Self::CompletedWithFailures
        } else {
            Self::Clean
        }
    }

    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Clean => 0,
            Self::CompletedWithFailures => 2,
            Self::Interrupted => 130,
        }
    }
}

/// Run the CLI.
pub async fn run() -> Result<RunStatus> {
    execute(Cli::parse()).await
}

/// Execute an already parsed command line.
pub async fn execute(cli: Cli) -> Result<RunStatus> {
    match cli.command {
        Commands::Harvest(args) => harvest_command(&args).await,
        Commands::Sessions {
            min_year,
            max_year,
            base_url,
        } => {
            sessions_command(min_year, max_year, &base_url);
            Ok(RunStatus::Clean)
        }
        Commands::Extract { file } => extract_command(&file),
    }
}

async fn harvest_command(args: &HarvestArgs) -> Result<RunStatus> {
    let config = args.apply(HarvestConfig::from_env());
    let harvester = Harvester::from_config(config.clone())?;

    let cancel = harvester.cancellation_token();
    spawn_shutdown_listener(cancel)?;

    println!(
        "{} sessions {}..{} into {}",
        style("Harvesting").bold(),
        style(config.min_year).cyan(),
        style(config.max_year).cyan(),
        style(config.data_dir.display()).green()
    );
    println!();

    let pb = ProgressBar::new_spinner();
    #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed}] {msg}")
            .expect("valid template"),
    );
    pb.set_message("Fetching session listings...");
    pb.enable_steady_tick(Duration::from_millis(100));

    let summary = harvester.with_progress(pb.clone()).run().await;
    pb.finish_and_clear();

    print_summary(&summary);

    if let Some(path) = &args.summary {
        replace_atomic(path, &summary.to_yaml()?)?;
        println!();
        println!("{} {}", style("Summary written to:").green().bold(), path.display());
    }

    Ok(RunStatus::of(&summary))
}

/// Cancel `cancel` on the first SIGINT or SIGTERM.
fn spawn_shutdown_listener(cancel: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received SIGINT, finishing in-flight tasks");
            }
            _ = sigterm.recv() => {
                tracing::warn!("received SIGTERM, finishing in-flight tasks");
            }
        }
        cancel.cancel();
    });
    Ok(())
}

fn print_summary(summary: &HarvestSummary) {
    println!("  Sessions: {}", summary.sessions);
    println!("  Links listed: {}", summary.links_listed);
    println!("  Candidates: {}", summary.candidates);
    println!("  Written: {}", style(summary.written).green());
    println!("  Already present: {}", summary.skipped);
    if summary.cancelled > 0 {
        println!("  Cancelled: {}", style(summary.cancelled).yellow().bold());
    }
    if !summary.cancelled_sessions.is_empty() {
        let ids: Vec<String> = summary.cancelled_sessions.iter().map(ToString::to_string).collect();
        println!(
            "  Sessions not listed (cancelled): {}",
            style(ids.join(", ")).yellow().bold()
        );
    }
    println!("  Duration: {:.1}s", summary.duration.as_secs_f64());

    if !summary.session_failures.is_empty() {
        println!();
        println!(
            "{} {}",
            style("Session failures:").red().bold(),
            summary.session_failures.len()
        );
        for failure in &summary.session_failures {
            println!("  {} [{}] {}", failure.session, failure.kind, failure.message);
        }
    }

    if !summary.failed.is_empty() {
        println!();
        println!(
            "{} {}",
            style("Failed bills:").red().bold(),
            summary.failed.len()
        );
        for failed in &summary.failed {
            println!(
                "  {}/{} [{} while {}] {}",
                failed.session,
                failed.bill_id,
                failed.kind,
                failed.state.as_str(),
                failed.message
            );
        }
    }
}

fn sessions_command(min_year: u32, max_year: u32, base_url: &str) {
    for session in sessions(min_year, max_year) {
        println!("{}\t{}", session, session.listing_url(base_url));
    }
}

fn extract_command(file: &Path) -> Result<RunStatus> {
    let markup = std::fs::read_to_string(file)?;
    match extract_bill_text(&markup, &file.display().to_string()) {
        Ok(text) => {
            println!("{text}");
            Ok(RunStatus::Clean)
        }
        Err(e) => {
            eprintln!("{} [{}] {e}", style("Extraction failed:").red().bold(), e.kind());
            Ok(RunStatus::CompletedWithFailures)
        }
    }
}
