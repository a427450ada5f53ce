//! Telemetry initialisation and the processor metrics registry.
//!
//! # Design
//! - Centralises logging setup (fmt or JSON) with a single entry point.
//! - Keeps the metrics surface small: three counters covering event intake
//!   and pipeline outcomes, rendered on demand.
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::multiple_crate_versions)]

use std::sync::Arc;

use anyhow::{Result, anyhow};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default logging target when `RUST_LOG` is not provided.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Log level string (e.g., `info`, `debug`).
    pub level: &'a str,
    /// Output format selection for the tracing subscriber.
    pub format: LogFormat,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
        }
    }
}

/// Available output formats for the logger.
#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    /// Emit logs as structured JSON objects.
    Json,
    /// Emit human-readable, pretty-printed logs.
    Pretty,
}

impl LogFormat {
    /// Choose a sensible default for the current build.
    #[must_use]
    pub const fn infer() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

/// Configure and install the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the tracing subscriber cannot be installed (for
/// example, because another subscriber has already been set globally).
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(build_env_filter(config.level))
            .with(
                fmt::layer()
                    .json()
                    .with_target(false)
                    .with_thread_ids(false),
            )
            .try_init()
            .map_err(|err| anyhow!("failed to install tracing subscriber: {err}")),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(build_env_filter(config.level))
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .try_init()
            .map_err(|err| anyhow!("failed to install tracing subscriber: {err}")),
    }
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Prometheus-backed metrics registry shared across the processor.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    events_total: IntCounterVec,
    pipeline_total: IntCounterVec,
    stage_failures_total: IntCounterVec,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_total = IntCounterVec::new(
            Opts::new(
                "carload_events_total",
                "Allocation events observed by intake disposition",
            ),
            &["kind"],
        )?;
        let pipeline_total = IntCounterVec::new(
            Opts::new(
                "carload_pipeline_total",
                "Allocation pipeline runs by terminal outcome",
            ),
            &["outcome"],
        )?;
        let stage_failures_total = IntCounterVec::new(
            Opts::new(
                "carload_pipeline_stage_failures_total",
                "Allocation pipeline failures by stage",
            ),
            &["stage"],
        )?;

        registry.register(Box::new(events_total.clone()))?;
        registry.register(Box::new(pipeline_total.clone()))?;
        registry.register(Box::new(stage_failures_total.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                events_total,
                pipeline_total,
                stage_failures_total,
            }),
        })
    }

    /// Record an observed event by intake disposition
    /// (`matched`, `filtered`, `malformed`).
    pub fn inc_event(&self, kind: &str) {
        self.inner.events_total.with_label_values(&[kind]).inc();
    }

    /// Record one pipeline run by terminal outcome (`success`, `failed`).
    pub fn inc_pipeline(&self, outcome: &str) {
        self.inner
            .pipeline_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record a pipeline failure attributed to one stage.
    pub fn inc_stage_failure(&self, stage: &str) {
        self.inner
            .stage_failures_total
            .with_label_values(&[stage])
            .inc();
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding the registry fails.
    pub fn render(&self) -> Result<String> {
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
