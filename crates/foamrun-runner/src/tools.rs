//! External tool lookup and invocation.
//!
//! # Design
//! - [`ToolCatalog`] turns program names into executable paths on a fixed search path.
//! - [`ToolInvoker`] is the seam between the pipeline and real processes.
//! - [`ProcessInvoker`] bounds every run with a timeout and keeps only a tail of stderr.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{RunnerError, RunnerResult};
use crate::model::{ToolInvocation, ToolRole};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Bytes of stderr retained for error reports.
pub const STDERR_TAIL_BYTES: usize = 4096;

/// Resolves tool names against a search path.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    search_path: Vec<PathBuf>,
}

impl ToolCatalog {
    /// Build a catalog from a `PATH`-style value.
    #[must_use]
    pub fn new(search_path: &OsStr) -> Self {
        Self {
            search_path: env::split_paths(search_path)
                .filter(|dir| !dir.as_os_str().is_empty())
                .collect(),
        }
    }

    /// Use `search_path` when provided, otherwise the process `PATH`.
    #[must_use]
    pub fn from_search_path(search_path: Option<OsString>) -> Self {
        search_path
            .or_else(|| env::var_os("PATH"))
            .map_or_else(Self::default, |value| Self::new(&value))
    }

    /// Directories searched, in order.
    #[must_use]
    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// First executable named `name` on the search path.
    ///
    /// Names containing a path separator are never resolved.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) {
            return None;
        }
        self.search_path
            .iter()
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }

    /// Invocation of a fixed pipeline tool against `case_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::ToolUnavailable`] if the tool is not on the search path.
    pub fn fixed_tool(
        &self,
        role: ToolRole,
        case_dir: &Path,
        timeout: Duration,
    ) -> RunnerResult<ToolInvocation> {
        let Some(name) = role.program() else {
            return Err(RunnerError::ToolUnavailable {
                tool: role.as_str().to_string(),
            });
        };
        let program = self
            .resolve(name)
            .ok_or_else(|| RunnerError::ToolUnavailable {
                tool: name.to_string(),
            })?;
        Ok(ToolInvocation::new(role, name, program, case_dir, timeout))
    }

    /// Invocation of the solver named by the case.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::SolverNotFound`] if `solver` does not resolve.
    pub fn solver(
        &self,
        solver: &str,
        case_dir: &Path,
        timeout: Duration,
    ) -> RunnerResult<ToolInvocation> {
        let program = self
            .resolve(solver)
            .ok_or_else(|| RunnerError::SolverNotFound {
                solver: solver.to_string(),
            })?;
        Ok(ToolInvocation::new(
            ToolRole::Solver,
            solver,
            program,
            case_dir,
            timeout,
        ))
    }
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|metadata| metadata.is_file() && has_exec_bit(&metadata))
}

#[cfg(unix)]
fn has_exec_bit(metadata: &fs::Metadata) -> bool {
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
const fn has_exec_bit(_metadata: &fs::Metadata) -> bool {
    true
}

/// Runs a resolved tool invocation to completion.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Run `invocation`, succeeding only on a zero exit status.
    async fn invoke(&self, invocation: &ToolInvocation) -> RunnerResult<()>;
}

/// [`ToolInvoker`] backed by child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessInvoker;

#[async_trait]
impl ToolInvoker for ProcessInvoker {
    async fn invoke(&self, invocation: &ToolInvocation) -> RunnerResult<()> {
        let command_line = invocation.command_line();
        debug!(tool = %invocation.name, command = %command_line, "spawning tool");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::ToolSpawn {
                tool: invocation.name.clone(),
                source,
            })?;
        let stderr = child.stderr.take();

        let finished = tokio::time::timeout(invocation.timeout, async {
            let tail = async {
                match stderr {
                    Some(stream) => read_tail(stream).await,
                    None => Vec::new(),
                }
            };
            tokio::join!(child.wait(), tail)
        })
        .await;

        let Ok((status, tail)) = finished else {
            if let Err(err) = child.start_kill() {
                warn!(tool = %invocation.name, error = %err, "failed to kill timed out tool");
            }
            if let Err(err) = child.wait().await {
                warn!(tool = %invocation.name, error = %err, "failed to reap timed out tool");
            }
            return Err(RunnerError::ToolTimedOut {
                tool: invocation.name.clone(),
                command: command_line,
                timeout: invocation.timeout,
            });
        };

        let status =
            status.map_err(|source| RunnerError::io("tool.wait", &invocation.program, source))?;
        if status.success() {
            return Ok(());
        }
        Err(RunnerError::ToolFailed {
            tool: invocation.name.clone(),
            command: command_line,
            exit_code: status.code(),
            stderr_tail: String::from_utf8_lossy(&tail).trim().to_string(),
        })
    }
}

async fn read_tail<R>(mut reader: R) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut tail = Vec::with_capacity(STDERR_TAIL_BYTES);
    let mut chunk = [0_u8; 1024];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => {
                tail.extend_from_slice(&chunk[..read]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let excess = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }
    tail
}
