//! Error types for logging setup and the metrics registry.

use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised by telemetry helpers.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global tracing subscriber was already installed, or installing failed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        #[source]
        source: tracing_subscriber::util::TryInitError,
    },
    /// A run or request collector could not be built or registered.
    #[error("failed to set up metric collector")]
    Collector {
        /// Step that failed (`metrics.build` or `metrics.register`).
        operation: &'static str,
        /// Metric name tied to the failure.
        metric: &'static str,
        /// Underlying Prometheus error.
        #[source]
        source: prometheus::Error,
    },
    /// The text exposition for `/metrics` could not be produced.
    #[error("failed to render metrics exposition")]
    Exposition {
        /// Step that failed (`metrics.encode` or `metrics.utf8`).
        operation: &'static str,
        /// Underlying encoder or UTF-8 error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl TelemetryError {
    pub(crate) const fn collector(
        operation: &'static str,
        metric: &'static str,
        source: prometheus::Error,
    ) -> Self {
        Self::Collector {
            operation,
            metric,
            source,
        }
    }

    pub(crate) fn exposition<E>(operation: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Exposition {
            operation,
            source: Box::new(source),
        }
    }

    /// Metric the failure refers to, if any.
    #[must_use]
    pub const fn metric(&self) -> Option<&'static str> {
        match self {
            Self::Collector { metric, .. } => Some(metric),
            Self::SubscriberInstall { .. } | Self::Exposition { .. } => None,
        }
    }
}
