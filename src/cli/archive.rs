//! Archive command implementation

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::CliError;
use crate::archiver::layout::DEFAULT_SOURCE_PATTERN;
use crate::archiver::{ArchiveConfig, Archiver, Credentials, RunMode};
use crate::downloader::HttpTransfer;
use crate::fetcher::http::{build_client, FigmaHttpClient, DEFAULT_API_BASE_URL};
use crate::report::{ArchiveSummary, FailureLog};
use crate::shutdown::SharedShutdown;
use crate::ExportFormat;

/// Maximum allowed workers or fetch concurrency
const MAX_CONCURRENCY: usize = 32;

/// Parse and validate a worker or concurrency count
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Parse a byte size such as `500000`, `512K`, `2M` or `1G` (binary units)
pub fn parse_size(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    let upper = trimmed.to_uppercase();
    let digits = upper.trim_end_matches('B');
    let (number, multiplier) = match digits.chars().last() {
        Some('K') => (&digits[..digits.len() - 1], 1024),
        Some('M') => (&digits[..digits.len() - 1], 1024 * 1024),
        Some('G') => (&digits[..digits.len() - 1], 1024 * 1024 * 1024),
        _ => (digits, 1),
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("'{trimmed}' is not a valid size"))?;
    if value == 0 {
        return Err("size must be positive".to_string());
    }
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{trimmed}' is too large"))
}

/// Parse a render scale between 0.01 and 4
fn parse_scale(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid scale"))?;
    if !(0.01..=4.0).contains(&value) {
        return Err(format!("scale {value} must be between 0.01 and 4"));
    }
    Ok(value)
}

/// Split a comma-separated list, dropping blanks
pub fn parse_list(s: &str) -> BTreeSet<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Output format for the run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Design archiver CLI
#[derive(Parser, Debug)]
#[command(name = "design-archiver")]
#[command(about = "Archive design documents with their image fills and node renders", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Expose Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download missing thumbnails, fills and renders, then rebuild manifests
    Archive(ArchiveArgs),

    /// Rebuild manifests from what is on disk
    Sync(super::SyncArgs),

    /// Summarize the failure log
    Failures(super::FailuresArgs),
}

/// Where documents come from and where the archive lives
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Directory of cached document JSON
    #[arg(long = "src", default_value = "files")]
    pub source_dir: PathBuf,

    /// Archive root
    #[arg(long, short = 'o', default_value = "archive")]
    pub output: PathBuf,

    /// Cached document file name; `{key}` is replaced by the document key
    #[arg(long, default_value = DEFAULT_SOURCE_PATTERN)]
    pub source_pattern: String,

    /// Index canvases themselves at depth 0
    #[arg(long, default_value_t = false)]
    pub include_canvas: bool,

    /// Only process these document keys (comma-separated)
    #[arg(long)]
    pub only: Option<String>,
}

impl SourceArgs {
    /// Base configuration for these locations
    pub fn base_config(&self) -> ArchiveConfig {
        let mut config = ArchiveConfig::new(&self.source_dir, &self.output);
        config.source_pattern = self.source_pattern.clone();
        config.index.include_canvas = self.include_canvas;
        config.only_keys = self.only.as_deref().map(parse_list);
        config
    }
}

/// Archive command arguments
#[derive(Args, Debug)]
pub struct ArchiveArgs {
    /// Document locations
    #[command(flatten)]
    pub source: SourceArgs,

    /// Access token, comma-separated tokens or a JSON array of tokens
    #[arg(long, env = "FIGMA_ACCESS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Render format (png, jpg, svg, pdf)
    #[arg(long, default_value = "png")]
    pub format: ExportFormat,

    /// Render scale (0.01 to 4)
    #[arg(long, default_value = "1", value_parser = parse_scale)]
    pub scale: f64,

    /// Deepest node level to render; unlimited when omitted
    #[arg(long)]
    pub depth: Option<usize>,

    /// Node types to render (comma-separated, e.g. FRAME,COMPONENT)
    #[arg(long)]
    pub types: Option<String>,

    /// Documents processed concurrently (default: 4, max: 32)
    #[arg(long, default_value = "4", value_parser = parse_concurrency)]
    pub workers: usize,

    /// Render requests in flight per document (default: 4, max: 32)
    #[arg(long, default_value = "4", value_parser = parse_concurrency)]
    pub fetch_concurrency: usize,

    /// K in the per-chunk rate-limit budget of K x fetch concurrency
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=20))]
    pub retry_multiplier: u32,

    /// Maximum encoded length of a render request URL
    #[arg(long, default_value = "4000", value_parser = clap::value_parser!(u64).range(256..=65536))]
    pub url_budget: u64,

    /// Downloads run together by the queue
    #[arg(long, default_value = "16", value_parser = parse_concurrency)]
    pub batch_size: usize,

    /// Seconds the download queue waits for work before giving up
    #[arg(long, default_value = "900")]
    pub idle_timeout: u64,

    /// Shrink downloaded PNG and JPEG files to at most this size (e.g. 2M)
    #[arg(long, value_parser = parse_size)]
    pub max_bytes: Option<u64>,

    /// Pixel density assumed when sizing image fills
    #[arg(long, default_value = "2.5")]
    pub density: f64,

    /// Skip thumbnails
    #[arg(long, default_value_t = false)]
    pub skip_thumbnail: bool,

    /// Skip image fills
    #[arg(long, default_value_t = false)]
    pub skip_fills: bool,

    /// Skip node renders
    #[arg(long, default_value_t = false)]
    pub skip_exports: bool,

    /// Report what is missing without downloading or writing anything
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Failure log path (default: <output>/errors.jsonl)
    #[arg(long)]
    pub error_log: Option<PathBuf>,

    /// Only process documents that have entries in the failure log
    #[arg(long, default_value_t = false)]
    pub retry_failed: bool,

    /// API root
    #[arg(long, default_value = DEFAULT_API_BASE_URL)]
    pub api_base_url: String,
}

impl ArchiveArgs {
    /// Build the run configuration from the arguments
    pub fn to_config(&self) -> Result<ArchiveConfig, CliError> {
        let mut config = self.source.base_config();

        config.render.format = self.format;
        config.render.scale = self.scale;
        config.index.depth = self.depth;
        config.index.types = self
            .types
            .as_deref()
            .map(|types| parse_list(&types.to_uppercase()));
        config.workers = self.workers;
        config.fetch.concurrency = self.fetch_concurrency;
        config.fetch.retry_multiplier = self.retry_multiplier;
        config.fetch.url_budget = self.url_budget as usize;
        config.queue.batch_size = self.batch_size;
        config.queue.idle_timeout = Duration::from_secs(self.idle_timeout);
        config.max_bytes = self.max_bytes;
        config.density = self.density;
        config.skip_thumbnail = self.skip_thumbnail;
        config.skip_fills = self.skip_fills;
        config.skip_exports = self.skip_exports;
        config.mode = if self.dry_run {
            RunMode::DryRun
        } else {
            RunMode::Archive
        };
        if let Some(error_log) = &self.error_log {
            config.error_log = error_log.clone();
        }

        if self.retry_failed {
            let failed = if config.error_log.is_file() {
                FailureLog::failed_file_keys(&config.error_log)?
            } else {
                warn!(path = %config.error_log.display(), "No failure log found; nothing to retry");
                BTreeSet::new()
            };
            config.only_keys = Some(match config.only_keys.take() {
                Some(only) => only.intersection(&failed).cloned().collect(),
                None => failed,
            });
        }

        config.validate()?;
        Ok(config)
    }

    /// Credentials for the configured mode; dry runs need none
    pub fn credentials(&self) -> Result<Credentials, CliError> {
        match (&self.token, self.dry_run) {
            (Some(raw), _) => Ok(Credentials::parse(raw)?),
            (None, true) => Ok(Credentials::default()),
            (None, false) => Err(CliError::ConfigurationError(
                "an access token is required: pass --token or set FIGMA_ACCESS_TOKEN".to_string(),
            )),
        }
    }

    /// Execute the archive command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let config = self.to_config()?;
        let credentials = self.credentials()?;

        let failures = if config.downloads_enabled() {
            Arc::new(FailureLog::open(&config.error_log)?)
        } else {
            Arc::new(FailureLog::disabled())
        };

        let client = build_client()?;
        let api = Arc::new(FigmaHttpClient::new(client.clone(), self.api_base_url.as_str()));
        let transfer = Arc::new(HttpTransfer::new(client));

        info!(
            workers = config.workers,
            tokens = credentials.len(),
            format = %config.render.format,
            scale = config.render.scale,
            mode = %config.mode,
            "Archive configured"
        );

        let progress = create_progress_bar();
        let archiver = Archiver::new(config, credentials, api, transfer, failures.clone(), shutdown)
            .with_progress(progress.clone());
        let result = archiver.run().await;
        progress.finish_and_clear();

        let summary = result?;
        output_summary(cli.output_format, &summary, failures.count());
        Ok(())
    }
}

/// Create the per-document progress bar
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} documents ({percent}%) {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Print the run summary
pub fn output_summary(format: OutputFormat, summary: &ArchiveSummary, failures: u64) {
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "summary": summary,
                "failures": failures,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
            );
        }
        OutputFormat::Human => {
            println!("\nArchive run finished");
            println!("{summary}");
            if failures > 0 {
                println!("Failures recorded: {failures}");
            }
        }
    }
}
