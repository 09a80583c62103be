//! Environment-backed configuration loading.
//!
//! # Design
//! - All reads go through a lookup function so tests never mutate the process environment.
//! - Empty values count as unset; everything else must parse or loading fails.

use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;


use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{AppConfig, LogFormatChoice, LoggingSettings, RunnerLimits, ServerSettings};

/// Prefix shared by every foamrun environment variable.
pub const ENV_PREFIX: &str = "FOAMRUN_";

const BIND_ADDR: &str = "FOAMRUN_BIND_ADDR";
const HTTP_PORT: &str = "FOAMRUN_HTTP_PORT";
const MAX_UPLOAD_BYTES: &str = "FOAMRUN_MAX_UPLOAD_BYTES";
const MAX_CONCURRENT_RUNS: &str = "FOAMRUN_MAX_CONCURRENT_RUNS";
const TOOL_TIMEOUT_SECS: &str = "FOAMRUN_TOOL_TIMEOUT_SECS";
const WORK_ROOT: &str = "FOAMRUN_WORK_ROOT";
const TOOL_PATH: &str = "FOAMRUN_TOOL_PATH";
const LOG_LEVEL: &str = "FOAMRUN_LOG_LEVEL";
const LOG_FORMAT: &str = "FOAMRUN_LOG_FORMAT";

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when a variable is set to a value
    /// that cannot be parsed or violates a limit.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration using `lookup` to resolve variable names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidField`] when a variable is set to a value
    /// that cannot be parsed or violates a limit.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let bind_addr = match read(BIND_ADDR) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid(BIND_ADDR, "invalid_ip", &raw))?,
            None => defaults::BIND_ADDR,
        };
        let http_port = parse_nonzero(HTTP_PORT, read(HTTP_PORT), defaults::HTTP_PORT)?;
        let max_upload_bytes = parse_nonzero(
            MAX_UPLOAD_BYTES,
            read(MAX_UPLOAD_BYTES),
            defaults::MAX_UPLOAD_BYTES,
        )?;
        let max_concurrent_runs = parse_nonzero(
            MAX_CONCURRENT_RUNS,
            read(MAX_CONCURRENT_RUNS),
            defaults::MAX_CONCURRENT_RUNS,
        )?;
        let tool_timeout = parse_nonzero(
            TOOL_TIMEOUT_SECS,
            read(TOOL_TIMEOUT_SECS),
            defaults::TOOL_TIMEOUT.as_secs(),
        )
        .map(Duration::from_secs)?;
        let work_root = read(WORK_ROOT).map_or_else(std::env::temp_dir, PathBuf::from);
        let tool_path = read(TOOL_PATH).map(OsString::from);

        let level = read(LOG_LEVEL).unwrap_or_else(|| defaults::LOG_LEVEL.to_string());
        let format = match read(LOG_FORMAT) {
            Some(raw) => Some(
                LogFormatChoice::parse(&raw)
                    .ok_or_else(|| ConfigError::invalid(LOG_FORMAT, "unknown_format", &raw))?,
            ),
            None => None,
        };

        let config = Self {
            server: ServerSettings {
                bind_addr,
                http_port,
                max_upload_bytes,
            },
            runner: RunnerLimits {
                max_concurrent_runs,
                tool_timeout,
                work_root,
                tool_path,
            },
            logging: LoggingSettings { level, format },
        };
        Ok(config)
    }
}

fn parse_nonzero<T>(field: &'static str, raw: Option<String>, default: T) -> ConfigResult<T>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value: T = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(field, "not_a_number", &raw))?;
    if value == T::default() {
        return Err(ConfigError::invalid(field, "zero", &raw));
    }
    Ok(value)
}
