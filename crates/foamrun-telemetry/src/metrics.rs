//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes only the counters/gauges the case runner and HTTP surface need.

use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    case_runs_total: IntCounterVec,
    pipeline_steps_total: IntCounterVec,
    tool_invocations_total: IntCounterVec,
    active_runs: IntGauge,
    waiting_runs: IntGauge,
    last_run_duration_ms: IntGauge,
}

/// Snapshot of selected gauges for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Pipelines currently holding a run slot.
    pub active_runs: i64,
    /// Requests waiting for a free run slot.
    pub waiting_runs: i64,
    /// Wall-clock duration of the most recently finished case run, slot wait included (ms).
    pub last_run_duration_ms: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = counter_vec(
            "http_requests_total",
            "Total HTTP requests received",
            &["route", "code"],
        )?;
        let case_runs_total = counter_vec(
            "case_runs_total",
            "Case pipelines finished, by outcome",
            &["outcome"],
        )?;
        let pipeline_steps_total = counter_vec(
            "pipeline_steps_total",
            "Case pipeline steps executed, by status",
            &["step", "status"],
        )?;
        let tool_invocations_total = counter_vec(
            "tool_invocations_total",
            "External tool invocations, by tool role and status",
            &["tool", "status"],
        )?;
        let active_runs = gauge("active_runs", "Pipelines currently holding a run slot")?;
        let waiting_runs = gauge("waiting_runs", "Requests waiting for a run slot")?;
        let last_run_duration_ms = gauge(
            "last_run_duration_ms",
            "Duration of the most recently finished case run, slot wait included (ms)",
        )?;

        register(&registry, "http_requests_total", &http_requests_total)?;
        register(&registry, "case_runs_total", &case_runs_total)?;
        register(&registry, "pipeline_steps_total", &pipeline_steps_total)?;
        register(&registry, "tool_invocations_total", &tool_invocations_total)?;
        register(&registry, "active_runs", &active_runs)?;
        register(&registry, "waiting_runs", &waiting_runs)?;
        register(&registry, "last_run_duration_ms", &last_run_duration_ms)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                case_runs_total,
                pipeline_steps_total,
                tool_invocations_total,
                active_runs,
                waiting_runs,
                last_run_duration_ms,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Record a finished case pipeline with its outcome label and duration.
    pub fn observe_case_run(&self, outcome: &str, duration: Duration) {
        self.inner
            .case_runs_total
            .with_label_values(&[outcome])
            .inc();
        self.inner
            .last_run_duration_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Increment the pipeline step counter.
    pub fn inc_pipeline_step(&self, step: &str, status: &str) {
        self.inner
            .pipeline_steps_total
            .with_label_values(&[step, status])
            .inc();
    }

    /// Increment the external tool invocation counter.
    pub fn inc_tool_invocation(&self, tool: &str, status: &str) {
        self.inner
            .tool_invocations_total
            .with_label_values(&[tool, status])
            .inc();
    }

    /// Adjust the active run gauge by `delta`.
    pub fn add_active_runs(&self, delta: i64) {
        self.inner.active_runs.add(delta);
    }

    /// Adjust the waiting run gauge by `delta`.
    pub fn add_waiting_runs(&self, delta: i64) {
        self.inner.waiting_runs.add(delta);
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::exposition("metrics.encode", source))?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::exposition("metrics.utf8", source))
    }

    /// Take a point-in-time snapshot of the run gauges.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_runs: self.inner.active_runs.get(),
            waiting_runs: self.inner.waiting_runs.get(),
            last_run_duration_ms: self.inner.last_run_duration_ms.get(),
        }
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::collector("metrics.build", name, source))
}

fn gauge(name: &'static str, help: &str) -> Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::collector("metrics.build", name, source))
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::collector("metrics.register", name, source))
}
