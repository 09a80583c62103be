//! Domain models for the case pipeline.
//!
//! # Design
//! - Keep settings and invocation descriptions plain data; the service owns behaviour.
//! - Step and tool labels are stable strings shared by logs and metrics.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

/// Marker file that enables the `blockMesh` step.
pub const BLOCK_MESH_DICT: &str = "blockMeshDict";
/// Marker file that enables the `snappyHexMesh` step.
pub const SNAPPY_HEX_MESH_DICT: &str = "snappyHexMeshDict";

/// Runtime settings for a [`crate::CaseRunner`].
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Directory under which per-request workspaces are created.
    pub work_root: PathBuf,
    /// Upper bound on a single external tool invocation.
    pub tool_timeout: Duration,
    /// Size of the run slot pool.
    pub max_concurrent_runs: usize,
}

/// Role an external tool plays in the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolRole {
    /// Structured hex mesh generation.
    BlockMesh,
    /// Mesh refinement around geometry.
    SnappyHexMesh,
    /// Potential-flow field initialisation.
    PotentialFoam,
    /// Main solver named by `controlDict`.
    Solver,
}

impl ToolRole {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BlockMesh => "block_mesh",
            Self::SnappyHexMesh => "snappy_hex_mesh",
            Self::PotentialFoam => "potential_foam",
            Self::Solver => "solver",
        }
    }

    /// Program name for fixed tools; the solver's name comes from the case.
    #[must_use]
    pub const fn program(self) -> Option<&'static str> {
        match self {
            Self::BlockMesh => Some("blockMesh"),
            Self::SnappyHexMesh => Some("snappyHexMesh"),
            Self::PotentialFoam => Some("potentialFoam"),
            Self::Solver => None,
        }
    }

    /// Marker under `system/` whose presence enables this tool, if gated.
    #[must_use]
    pub const fn marker(self) -> Option<&'static str> {
        match self {
            Self::BlockMesh => Some(BLOCK_MESH_DICT),
            Self::SnappyHexMesh => Some(SNAPPY_HEX_MESH_DICT),
            Self::PotentialFoam | Self::Solver => None,
        }
    }

    const fn extra_args(self) -> &'static [&'static str] {
        match self {
            Self::SnappyHexMesh => &["-overwrite"],
            Self::BlockMesh | Self::PotentialFoam | Self::Solver => &[],
        }
    }

    /// Pipeline step this tool runs in.
    #[must_use]
    pub const fn step(self) -> StepKind {
        match self {
            Self::BlockMesh => StepKind::BlockMesh,
            Self::SnappyHexMesh => StepKind::SnappyHexMesh,
            Self::PotentialFoam => StepKind::PotentialFoam,
            Self::Solver => StepKind::Solver,
        }
    }
}

/// Fully resolved description of one external tool run.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Role the tool plays.
    pub role: ToolRole,
    /// Program name as requested (for messages).
    pub name: String,
    /// Resolved executable path.
    pub program: PathBuf,
    /// Arguments passed after the program.
    pub args: Vec<OsString>,
    /// Upper bound on the run.
    pub timeout: Duration,
}

impl ToolInvocation {
    /// Build the `-case <dir>` invocation for `role`.
    #[must_use]
    pub fn new(
        role: ToolRole,
        name: impl Into<String>,
        program: PathBuf,
        case_dir: &Path,
        timeout: Duration,
    ) -> Self {
        let mut args = vec![OsString::from("-case"), case_dir.as_os_str().to_os_string()];
        args.extend(role.extra_args().iter().map(|arg| OsString::from(*arg)));
        Self {
            role,
            name: name.into(),
            program,
            args,
            timeout,
        }
    }

    /// Command line rendered for logs and error messages.
    #[must_use]
    pub fn command_line(&self) -> String {
        let mut rendered = self.name.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }
}

/// Pipeline steps in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    /// Write the upload and unpack it.
    Extract,
    /// Decide which directory is the case root.
    ResolveCase,
    /// Run `blockMesh`.
    BlockMesh,
    /// Run `snappyHexMesh`.
    SnappyHexMesh,
    /// Run `potentialFoam`.
    PotentialFoam,
    /// Run the solver named by `controlDict`.
    Solver,
    /// Zip the extraction root.
    Package,
}

impl StepKind {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::ResolveCase => "resolve_case",
            Self::BlockMesh => "block_mesh",
            Self::SnappyHexMesh => "snappy_hex_mesh",
            Self::PotentialFoam => "potential_foam",
            Self::Solver => "solver",
            Self::Package => "package",
        }
    }
}

/// Terminal status of a pipeline step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    /// Step ran and succeeded.
    Completed,
    /// Step was not needed for this case.
    Skipped,
    /// Step ran and failed; the pipeline stopped here.
    Failed,
}

impl StepStatus {
    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// One entry in a [`RunReport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepRecord {
    /// Step that ran.
    pub step: StepKind,
    /// How it ended.
    pub status: StepStatus,
    /// Wall-clock time spent in the step.
    pub elapsed: Duration,
}

/// Per-request record of what the pipeline did.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// Identifier attached to every log line of the run.
    pub run_id: Uuid,
    /// Steps in execution order.
    pub steps: Vec<StepRecord>,
    /// Solver identifier, once read from `controlDict`.
    pub solver: Option<String>,
}

impl RunReport {
    pub(crate) fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            steps: Vec::new(),
            solver: None,
        }
    }

    pub(crate) fn record(&mut self, step: StepKind, status: StepStatus, elapsed: Duration) {
        self.steps.push(StepRecord {
            step,
            status,
            elapsed,
        });
    }

    /// Status recorded for `step`, if it was reached.
    #[must_use]
    pub fn status_of(&self, step: StepKind) -> Option<StepStatus> {
        self.steps
            .iter()
            .find(|record| record.step == step)
            .map(|record| record.status)
    }

    /// Compact `step=status` summary for log lines.
    #[must_use]
    pub fn summary(&self) -> String {
        self.steps
            .iter()
            .map(|record| format!("{}={}", record.step.as_str(), record.status.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }
}
