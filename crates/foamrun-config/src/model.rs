//! Typed settings consumed by the binary, the HTTP surface, and the case runner.

use std::ffi::OsString;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Complete process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Listener and request-shape settings.
    pub server: ServerSettings,
    /// Pipeline resource limits.
    pub runner: RunnerLimits,
    /// Tracing subscriber settings.
    pub logging: LoggingSettings,
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Interface the listener binds to.
    pub bind_addr: IpAddr,
    /// TCP port for the listener.
    pub http_port: u16,
    /// Largest accepted request body in bytes.
    pub max_upload_bytes: usize,
}

impl ServerSettings {
    /// Socket address composed from the bind address and port.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.http_port)
    }
}

/// Resource limits applied to every case pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerLimits {
    /// Size of the run slot pool.
    pub max_concurrent_runs: usize,
    /// Upper bound on a single external tool invocation.
    pub tool_timeout: Duration,
    /// Directory under which per-request workspaces are created.
    pub work_root: PathBuf,
    /// Search path for external tools; `None` means the process `PATH`.
    pub tool_path: Option<OsString>,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Explicit output format; `None` lets the build profile decide.
    pub format: Option<LogFormatChoice>,
}

/// Log output formats selectable through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormatChoice {
    /// Structured JSON lines.
    Json,
    /// Human-readable output.
    Pretty,
}

impl LogFormatChoice {
    /// Parse the configuration spelling of a format.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn socket_addr_combines_bind_and_port() {
        let server = ServerSettings {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            http_port: 8080,
            max_upload_bytes: 1,
        };
        assert_eq!(server.socket_addr().to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn log_format_choice_parses_known_values() {
        assert_eq!(LogFormatChoice::parse("JSON"), Some(LogFormatChoice::Json));
        assert_eq!(
            LogFormatChoice::parse(" pretty "),
            Some(LogFormatChoice::Pretty)
        );
        assert_eq!(LogFormatChoice::parse("xml"), None);
    }
}
