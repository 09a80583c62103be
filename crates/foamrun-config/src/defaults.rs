//! Fallback values applied when the environment leaves a setting unset.
//!
//! # Design
//! - Keep every default in one place so documentation and tests agree.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Listen on every interface, matching the historical deployment.
pub const BIND_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
/// HTTP port served when `FOAMRUN_HTTP_PORT` is unset.
pub const HTTP_PORT: u16 = 5000;
/// Concurrent pipelines allowed to hold a run slot.
pub const MAX_CONCURRENT_RUNS: usize = 2;
/// Upper bound on a single external tool invocation.
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Largest accepted upload body.
pub const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;
/// Log level used when neither `RUST_LOG` nor `FOAMRUN_LOG_LEVEL` is set.
pub const LOG_LEVEL: &str = "info";
