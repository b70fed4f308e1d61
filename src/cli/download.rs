//! Download command implementation

use crate::downloader::config::{
    BudgetConfig, DownloadConfig, JitterRange, DEFAULT_BUDGET_CAP, MAX_CONCURRENCY,
};
use crate::downloader::{BudgetLimiter, DownloadError, DownloadExecutor, JobProgress};
use crate::fetcher::http::{ApiHttpClient, StaticToken};
use crate::fetcher::retry::Retrying;
use crate::fetcher::{ContentClient, FetcherResult, ItemDownloader, Page};
use crate::identifier::GroupRef;
use crate::shutdown::SharedShutdown;
use crate::Item;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::CliError;

/// Parse and validate concurrency value
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

/// Mix Downloader CLI
#[derive(Parser, Debug)]
#[command(name = "mix-downloader")]
#[command(about = "Download every track of a mix, album or playlist under strict rate limits", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Data root directory; each group is written to {data-dir}/{kind}/{id}/
    #[arg(long, global = true, default_value = "data")]
    pub data_dir: PathBuf,

    /// Base URL of the content API
    #[arg(long, global = true, env = "MIX_DOWNLOADER_API_URL")]
    pub api_base_url: Option<String>,

    /// Bearer token for the content API
    #[arg(long, global = true, env = "MIX_DOWNLOADER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Catalog country code sent with every request
    #[arg(long, global = true, default_value = "US")]
    pub country_code: String,

    /// Number of concurrent track downloads per group (default: 4, max: 32)
    #[arg(long, global = true, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Maximum number of retries for transient failures (default: 5, range: 0-20)
    #[arg(long, global = true, default_value = "5", value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: u32,

    /// Entries requested per page
    #[arg(long, global = true, default_value = "100")]
    pub page_size: usize,

    /// Lower bound of the random delay before each track download, in milliseconds
    #[arg(long, global = true, default_value = "500")]
    pub jitter_min_ms: u64,

    /// Upper bound of the random delay before each track download, in milliseconds
    #[arg(long, global = true, default_value = "2000")]
    pub jitter_max_ms: u64,

    /// Track downloads admitted per budget interval
    #[arg(long, global = true, default_value_t = DEFAULT_BUDGET_CAP)]
    pub budget_cap: u32,

    /// Budget interval length in seconds
    #[arg(long, global = true, default_value = "66")]
    pub budget_interval_secs: u64,

    /// Minimum gap between two budgeted requests, in milliseconds
    #[arg(long, global = true, default_value = "250")]
    pub budget_spacing_ms: u64,

    /// Disable the track download budget
    #[arg(long, global = true, default_value_t = false)]
    pub no_budget: bool,

    /// Extension of downloaded track files
    #[arg(long, global = true, default_value = "flac")]
    pub file_extension: String,

    /// Expose Prometheus metrics on this address (e.g., 127.0.0.1:9090)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Build the orchestrator configuration from global flags
    pub fn download_config(&self) -> Result<DownloadConfig, CliError> {
        if self.jitter_min_ms > self.jitter_max_ms {
            return Err(CliError::InvalidArgument(format!(
                "--jitter-min-ms ({}) must not exceed --jitter-max-ms ({})",
                self.jitter_min_ms, self.jitter_max_ms
            )));
        }

        let download_budget = (!self.no_budget).then(|| BudgetConfig {
            cap: self.budget_cap,
            interval: Duration::from_secs(self.budget_interval_secs),
            spacing: Duration::from_millis(self.budget_spacing_ms),
        });

        let config = DownloadConfig {
            concurrency: self.concurrency,
            jitter: JitterRange::new(
                Duration::from_millis(self.jitter_min_ms),
                Duration::from_millis(self.jitter_max_ms),
            ),
            page_size: self.page_size,
            file_extension: self.file_extension.clone(),
            download_budget,
            max_retries: self.max_retries,
        };

        config.validate().map_err(CliError::ConfigurationError)?;
        Ok(config)
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download one or more groups
    Download(DownloadArgs),

    /// Validate group references or manifests
    Validate(super::ValidateCommand),
}

/// Download command arguments
#[derive(Parser, Debug)]
pub struct DownloadArgs {
    /// Group to download as KIND:ID (e.g., mix:0123abcd, album:77646168); repeatable
    #[arg(long = "group", required = true)]
    pub groups: Vec<GroupRef>,
}

/// Output format options
#[derive(Debug, Clone, Copy)]
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

/// Output result as JSON
fn output_json(
    group: &GroupRef,
    output_dir: &Path,
    result: &Result<JobProgress, DownloadError>,
) {
    let output = match result {
        Ok(progress) => serde_json::json!({
            "success": true,
            "group": group.to_string(),
            "output_dir": output_dir.display().to_string(),
            "progress": progress,
            "error": null,
        }),
        Err(e) => serde_json::json!({
            "success": false,
            "group": group.to_string(),
            "output_dir": output_dir.display().to_string(),
            "progress": null,
            "error": e.to_string(),
        }),
    };
    println!("{output}");
}

/// Output result in human-readable format
fn output_human(
    group: &GroupRef,
    output_dir: &Path,
    result: &Result<JobProgress, DownloadError>,
) {
    match result {
        Ok(progress) => {
            println!("\nDownload of {group} completed successfully!");
            println!("Output: {}", output_dir.display());
            println!(
                "Tracks downloaded: {}/{} ({:.1}%)",
                progress.items_downloaded,
                progress.items_total,
                progress.percentage()
            );
            if !progress.is_complete() {
                println!(
                    "Incomplete: {} track(s) missing",
                    progress.items_total - progress.items_downloaded
                );
            }
            if progress.skipped > 0 {
                println!("Non-track entries skipped: {}", progress.skipped);
            }
            if progress.items_uploaded > 0 {
                println!("Tracks uploaded: {}", progress.items_uploaded);
            }
            if let Some(elapsed) = progress.elapsed() {
                println!("Elapsed: {:.1}s", elapsed.num_milliseconds() as f64 / 1000.0);
            }
        }
        Err(e) => {
            eprintln!("\nDownload of {group} failed!");
            eprintln!("Error: {e}");
            error!(group = %group, error = %e, "Download failed");
        }
    }
}

/// Progress bar reporting for one group
///
/// Wraps the shared client: every listed page grows the bar by its track
/// entries, every finished track advances it.
struct ProgressReporter<C> {
    inner: Arc<C>,
    bar: ProgressBar,
}

#[async_trait]
impl<C: ContentClient> ContentClient for ProgressReporter<C> {
    async fn fetch_page(
        &self,
        cancel: &CancellationToken,
        group: &GroupRef,
        page_index: usize,
    ) -> FetcherResult<Page> {
        let page = self.inner.fetch_page(cancel, group, page_index).await?;
        let tracks = page.items.iter().filter(|entry| entry.is_track()).count();
        self.bar.inc_length(tracks as u64);
        Ok(page)
    }
}

#[async_trait]
impl<C: ItemDownloader> ItemDownloader for ProgressReporter<C> {
    async fn download_item(
        &self,
        cancel: &CancellationToken,
        item: &Item,
        destination: &Path,
    ) -> FetcherResult<()> {
        self.inner.download_item(cancel, item, destination).await?;
        self.bar.set_message(item.display_title());
        self.bar.inc(1);
        Ok(())
    }
}

fn create_progress_bar(group: &GroupRef) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(format!("Downloading {group}"));
    pb
}

impl DownloadArgs {
    /// Execute the download command
    ///
    /// Groups are processed one after another. Cancellation and authorization
    /// expiry stop the run; other failures are reported and the next group starts.
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let config = cli.download_config()?;
        let base_url = cli.api_base_url.clone().ok_or_else(|| {
            CliError::ConfigurationError(
                "--api-base-url or MIX_DOWNLOADER_API_URL is required".to_string(),
            )
        })?;
        let token = cli.token.clone().ok_or_else(|| {
            CliError::ConfigurationError(
                "--token or MIX_DOWNLOADER_TOKEN is required".to_string(),
            )
        })?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| CliError::ConfigurationError(format!("Failed to build HTTP client: {e}")))?;

        let limiter = config
            .download_budget
            .as_ref()
            .map(|budget| Arc::new(BudgetLimiter::from_config(budget)));

        let mut api = ApiHttpClient::new(
            http,
            base_url,
            Arc::new(StaticToken::new(token)),
            cli.country_code.clone(),
        )
        .with_page_size(config.page_size);
        if let Some(limiter) = &limiter {
            api = api.with_download_budget(limiter.clone());
        }
        let client = Arc::new(Retrying::new(api).with_max_retries(config.max_retries));

        let root = shutdown.token();
        let mut failures = 0usize;
        let mut fatal: Option<DownloadError> = None;

        for group in &self.groups {
            let bar = create_progress_bar(group);
            let reporter = Arc::new(ProgressReporter {
                inner: client.clone(),
                bar: bar.clone(),
            });
            let executor = DownloadExecutor::new(
                config.clone(),
                reporter.clone(),
                reporter,
                cli.data_dir.clone(),
            )?;
            let output_dir = executor.paths(group).group_dir();

            info!(group = %group, "Starting group download");
            let result = executor.download_group(&root, group).await;
            bar.finish_and_clear();

            match cli.output_format {
                OutputFormat::Json => output_json(group, &output_dir, &result),
                OutputFormat::Human => output_human(group, &output_dir, &result),
            }

            if let Err(e) = result {
                failures += 1;
                if e.is_cancellation() || e.is_auth_expired() {
                    warn!(group = %group, error = %e, "Stopping remaining groups");
                    fatal = Some(e);
                    break;
                }
            }
        }

        if let Some(limiter) = limiter {
            limiter.close().await;
        }

        if let Some(e) = fatal {
            return Err(CliError::DownloadError(e));
        }
        if failures > 0 {
            return Err(CliError::GroupsFailed {
                failed: failures,
                total: self.groups.len(),
            });
        }
        Ok(())
    }
}
