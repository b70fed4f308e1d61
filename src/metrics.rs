//! Production observability metrics for the mix downloader
//!
//! Counters and histograms for page listing, track downloads, interval budget
//! admission and HTTP retry behavior.
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Prometheus exporter for scraping endpoint (:9090/metrics)
//! - Recording is a no-op until [`init_metrics`] installs a recorder

use crate::GroupKind;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Correlation ID generator for request tracing
static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Initialize metrics system with Prometheus exporter
///
/// This should be called once at application startup, typically in main().
/// The function is idempotent and will not reinitialize if already called.
///
/// # Arguments
/// * `addr` - Socket address to bind Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "pages_fetched_total",
        Unit::Count,
        "Total number of collection pages fetched"
    );

    describe_counter!(
        "items_downloaded_total",
        Unit::Count,
        "Total number of tracks downloaded"
    );

    describe_counter!(
        "items_failed_total",
        Unit::Count,
        "Total number of track downloads that failed"
    );

    describe_counter!(
        "budget_units_admitted_total",
        Unit::Count,
        "Total number of budget units admitted by interval limiters"
    );

    describe_histogram!(
        "budget_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for interval budget"
    );

    describe_counter!(
        "groups_completed_total",
        Unit::Count,
        "Total number of groups downloaded completely"
    );

    describe_counter!(
        "groups_failed_total",
        Unit::Count,
        "Total number of groups that failed or were cancelled"
    );

    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of HTTP requests made to the content API"
    );

    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "HTTP request duration in seconds"
    );

    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );

    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Record an HTTP request with timing
pub struct HttpRequestMetrics {
    endpoint: &'static str,
    start_time: Instant,
    correlation_id: String,
}

impl HttpRequestMetrics {
    /// Start recording a new HTTP request
    pub fn start(endpoint: &'static str) -> Self {
        let correlation_id = generate_correlation_id();

        debug!(
            correlation_id = %correlation_id,
            endpoint = endpoint,
            "Starting HTTP request"
        );

        Self {
            endpoint,
            start_time: Instant::now(),
            correlation_id,
        }
    }

    /// Record completion of the HTTP request
    pub fn record_complete(&self, status_code: u16) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint,
            "status" => status_code.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => self.endpoint,
        )
        .record(duration.as_secs_f64());

        if status_code == 429 {
            warn!(
                correlation_id = %self.correlation_id,
                endpoint = self.endpoint,
                duration_ms = duration.as_millis(),
                "Rate limit error (429) received"
            );
        }

        debug!(
            correlation_id = %self.correlation_id,
            endpoint = self.endpoint,
            status = status_code,
            duration_ms = duration.as_millis(),
            "HTTP request completed"
        );
    }

    /// Record a network error (no status code)
    pub fn record_network_error(&self) {
        let duration = self.start_time.elapsed();

        counter!(
            "http_requests_total",
            "endpoint" => self.endpoint,
            "status" => "network_error",
        )
        .increment(1);

        warn!(
            correlation_id = %self.correlation_id,
            endpoint = self.endpoint,
            duration_ms = duration.as_millis(),
            "Network error recorded"
        );
    }

    /// Get the correlation ID for this request
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!(
        "http_retries_total",
        "attempt" => attempt.to_string(),
    )
    .increment(1);

    histogram!("retry_backoff_duration_seconds").record(duration.as_secs_f64());

    debug!(
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record one successfully fetched collection page
pub fn record_page_fetched(kind: GroupKind) {
    counter!("pages_fetched_total", "kind" => kind.to_string()).increment(1);
}

/// Record budget admission and the time spent waiting for it
pub fn record_budget_admitted(units: u32, waited: Duration) {
    counter!("budget_units_admitted_total").increment(u64::from(units));
    histogram!("budget_wait_seconds").record(waited.as_secs_f64());

    if waited.as_millis() > 100 {
        debug!(
            units = units,
            wait_ms = waited.as_millis(),
            "Budget admitted after wait"
        );
    }
}

/// Record one downloaded track
pub fn record_item_downloaded(kind: GroupKind) {
    counter!("items_downloaded_total", "kind" => kind.to_string()).increment(1);
}

/// Record one failed track download
pub fn record_item_failed(kind: GroupKind) {
    counter!("items_failed_total", "kind" => kind.to_string()).increment(1);
}

/// Per-group download metrics
pub struct GroupMetrics {
    kind: GroupKind,
    group_id: String,
    start_time: Instant,
}

impl GroupMetrics {
    /// Start tracking a group download
    pub fn start(kind: GroupKind, group_id: impl Into<String>) -> Self {
        let group_id = group_id.into();

        info!(kind = %kind, group_id = %group_id, "Group download started");

        Self {
            kind,
            group_id,
            start_time: Instant::now(),
        }
    }

    /// Record successful group completion
    pub fn record_success(&self, items_count: usize) {
        let duration = self.start_time.elapsed();

        counter!("groups_completed_total", "kind" => self.kind.to_string()).increment(1);

        info!(
            kind = %self.kind,
            group_id = %self.group_id,
            items_count = items_count,
            duration_secs = duration.as_secs(),
            "Group downloaded successfully"
        );
    }

    /// Record failed or cancelled group
    pub fn record_failure(&self, error: &str) {
        let duration = self.start_time.elapsed();

        counter!("groups_failed_total", "kind" => self.kind.to_string()).increment(1);

        error!(
            kind = %self.kind,
            group_id = %self.group_id,
            error = %error,
            duration_secs = duration.as_secs(),
            "Group download failed"
        );
    }
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}
