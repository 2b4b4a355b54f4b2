//! Observability features including logging and metrics

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::config::{LoggingConfig, MetricsConfig, ObservabilityConfig};

/// Set once the subscriber and exporter are installed
static INITIALIZED: OnceCell<()> = OnceCell::new();

/// Observability system for centralized logging and metrics
#[derive(Debug)]
pub struct ObservabilitySystem;

impl ObservabilitySystem {
    /// Initialize the observability system; a second call is an error
    pub fn init(config: &ObservabilityConfig) -> anyhow::Result<()> {
        INITIALIZED
            .set(())
            .map_err(|_| anyhow::anyhow!("Observability system already initialized"))?;

        Self::init_logging(&config.logging)?;

        if config.metrics.enabled {
            Self::init_metrics(&config.metrics)?;
        }

        info!("Observability system initialized");
        Ok(())
    }

    /// Initialize structured logging
    fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
        let level = match config.level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };

        let env_filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let registry = tracing_subscriber::registry().with(env_filter);

        match config.format.to_lowercase().as_str() {
            "json" => {
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE);
                registry.with(json_layer).try_init()?;
            }
            _ => {
                let pretty_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_span_events(FmtSpan::CLOSE);
                registry.with(pretty_layer).try_init()?;
            }
        }

        Ok(())
    }

    /// Install the Prometheus exporter with its own scrape listener
    fn init_metrics(config: &MetricsConfig) -> anyhow::Result<()> {
        let bind_addr: SocketAddr = config.bind_address.parse()?;

        PrometheusBuilder::new()
            .with_http_listener(bind_addr)
            .install()?;

        info!("Prometheus metrics initialized on {}", bind_addr);
        Ok(())
    }
}

/// Statement execution metrics
pub struct ExecutionMetrics;

impl ExecutionMetrics {
    /// Record a finished statement
    pub fn statement_executed(kind: &str, target: &str, outcome: &str, duration: Duration) {
        counter!("dbpanel_statements_total",
                "kind" => kind.to_string(),
                "target" => target.to_string(),
                "outcome" => outcome.to_string())
            .increment(1);
        histogram!("dbpanel_statement_duration_seconds",
                  "kind" => kind.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a serialization conflict that triggered another attempt
    pub fn serialization_retry(target: &str) {
        counter!("dbpanel_serialization_retries_total", "target" => target.to_string())
            .increment(1);
    }

    /// Record a write abandoned after the last permitted attempt
    pub fn retry_exhausted(target: &str) {
        counter!("dbpanel_retry_exhausted_total", "target" => target.to_string())
            .increment(1);
    }

    /// Record a privilege lookup that degraded to "no access"
    pub fn privilege_check_failed(table: &str) {
        counter!("dbpanel_privilege_check_failures_total", "table" => table.to_string())
            .increment(1);
    }
}

/// Performance timer helper
pub struct PerfTimer {
    start: Instant,
    metric_name: String,
}

impl PerfTimer {
    pub fn new(metric_name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            metric_name: metric_name.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            let hist = histogram!(self.metric_name.clone());
            hist.record(self.start.elapsed().as_secs_f64());
        }
    }
}
