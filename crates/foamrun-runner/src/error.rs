//! # Design
//!
//! - Provide structured, constant-message errors for the case pipeline.
//! - Capture operation context (paths, tools, exit codes) as fields rather than in messages.
//! - Expose a coarse [`ErrorClass`] so callers translate failures once, at their boundary.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for case pipeline operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Errors produced while running a case pipeline.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The uploaded blob could not be decoded as a zip archive.
    #[error("case archive could not be decoded")]
    ArchiveDecode {
        /// Operation that triggered the archive failure.
        operation: &'static str,
        /// Archive path on disk.
        path: PathBuf,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },
    /// An archive entry would escape the extraction root or is not a plain file.
    #[error("case archive contains an unsafe entry")]
    UnsafeArchiveEntry {
        /// Entry name as stored in the archive.
        entry: String,
        /// Static reason for the rejection.
        reason: &'static str,
    },
    /// The extracted tree has no top-level directory.
    #[error("no case directory found in archive")]
    NoCaseFound {
        /// Extraction root that was inspected.
        root: PathBuf,
    },
    /// `controlDict` has no usable `application` line.
    #[error("controlDict does not name a solver application")]
    MissingSolverIdentifier {
        /// Path of the inspected `controlDict`.
        control_dict: PathBuf,
    },
    /// The solver named by `controlDict` is not an executable on the search path.
    #[error("solver executable not found")]
    SolverNotFound {
        /// Solver identifier read from `controlDict`.
        solver: String,
    },
    /// A fixed pipeline tool is not an executable on the search path.
    #[error("external tool executable not found")]
    ToolUnavailable {
        /// Program name that failed lookup.
        tool: String,
    },
    /// Spawning an external tool failed.
    #[error("external tool could not be started")]
    ToolSpawn {
        /// Program name of the tool.
        tool: String,
        /// Underlying IO error.
        source: io::Error,
    },
    /// An external tool exited unsuccessfully.
    #[error("external tool exited unsuccessfully")]
    ToolFailed {
        /// Program name of the tool.
        tool: String,
        /// Rendered command line.
        command: String,
        /// Exit code, or `None` when terminated by a signal.
        exit_code: Option<i32>,
        /// Trailing bytes of the tool's stderr.
        stderr_tail: String,
    },
    /// An external tool exceeded its time budget and was killed.
    #[error("external tool timed out")]
    ToolTimedOut {
        /// Program name of the tool.
        tool: String,
        /// Rendered command line.
        command: String,
        /// Budget that elapsed.
        timeout: Duration,
    },
    /// IO failures while interacting with the filesystem.
    #[error("case pipeline io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Directory traversal failures while packaging results.
    #[error("case pipeline walkdir failure")]
    Walkdir {
        /// Operation that triggered the walkdir failure.
        operation: &'static str,
        /// Path involved in the walkdir failure.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// Zip failures while writing the result archive.
    #[error("case pipeline zip failure")]
    Zip {
        /// Operation that triggered the archive failure.
        operation: &'static str,
        /// Path involved in the archive failure.
        path: PathBuf,
        /// Underlying zip error.
        source: zip::result::ZipError,
    },
    /// A blocking filesystem task panicked or was cancelled.
    #[error("blocking pipeline task failed")]
    Join {
        /// Operation that was running on the blocking pool.
        operation: &'static str,
        /// Underlying join error.
        source: tokio::task::JoinError,
    },
    /// The run slot pool was closed while waiting for a slot.
    #[error("run slot pool closed")]
    SlotPoolClosed,
}

/// Coarse failure taxonomy used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The upload is not a usable archive.
    InvalidArchive,
    /// The archive decoded but does not describe a runnable case.
    CaseStructure,
    /// An external tool could not be found, started, or finished unsuccessfully.
    ExternalTool,
    /// Anything else.
    Unexpected,
}

impl ErrorClass {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArchive => "invalid_archive",
            Self::CaseStructure => "case_structure",
            Self::ExternalTool => "external_tool",
            Self::Unexpected => "unexpected",
        }
    }
}

impl RunnerError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn walkdir(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: walkdir::Error,
    ) -> Self {
        Self::Walkdir {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn zip(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: zip::result::ZipError,
    ) -> Self {
        Self::Zip {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unsafe_entry(entry: &str, reason: &'static str) -> Self {
        Self::UnsafeArchiveEntry {
            entry: entry.to_string(),
            reason,
        }
    }

    /// Coarse class of this failure.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::ArchiveDecode { .. } | Self::UnsafeArchiveEntry { .. } => {
                ErrorClass::InvalidArchive
            }
            Self::NoCaseFound { .. } | Self::MissingSolverIdentifier { .. } => {
                ErrorClass::CaseStructure
            }
            Self::SolverNotFound { .. }
            | Self::ToolUnavailable { .. }
            | Self::ToolSpawn { .. }
            | Self::ToolFailed { .. }
            | Self::ToolTimedOut { .. } => ErrorClass::ExternalTool,
            Self::Io { .. }
            | Self::Walkdir { .. }
            | Self::Zip { .. }
            | Self::Join { .. }
            | Self::SlotPoolClosed => ErrorClass::Unexpected,
        }
    }

    /// Human-readable description of the failure built from its context fields.
    #[must_use]
    pub fn detail(&self) -> String {
        match self {
            Self::ArchiveDecode { source, .. } => source.to_string(),
            Self::UnsafeArchiveEntry { entry, reason } => {
                format!("entry '{entry}' rejected ({reason})")
            }
            Self::NoCaseFound { .. } => self.to_string(),
            Self::MissingSolverIdentifier { control_dict } => format!(
                "no 'application' entry in {}",
                control_dict.display()
            ),
            Self::SolverNotFound { solver } => {
                format!("solver '{solver}' was not found on the tool search path")
            }
            Self::ToolUnavailable { tool } => {
                format!("'{tool}' was not found on the tool search path")
            }
            Self::ToolSpawn { tool, source } => format!("failed to start '{tool}': {source}"),
            Self::ToolFailed {
                command,
                exit_code,
                stderr_tail,
                ..
            } => {
                let status = exit_code.map_or_else(
                    || "was terminated by a signal".to_string(),
                    |code| format!("returned non-zero exit status {code}"),
                );
                if stderr_tail.is_empty() {
                    format!("Command '{command}' {status}.")
                } else {
                    format!("Command '{command}' {status}. stderr: {stderr_tail}")
                }
            }
            Self::ToolTimedOut {
                command, timeout, ..
            } => format!(
                "Command '{command}' timed out after {} seconds.",
                timeout.as_secs()
            ),
            Self::Io {
                operation,
                path,
                source,
            } => format!("{operation} failed for {}: {source}", path.display()),
            Self::Walkdir {
                operation, source, ..
            } => format!("{operation} failed: {source}"),
            Self::Zip {
                operation, source, ..
            } => format!("{operation} failed: {source}"),
            Self::Join { operation, source } => format!("{operation} failed: {source}"),
            Self::SlotPoolClosed => self.to_string(),
        }
    }
}
