//! Case pipeline: extract, mesh, initialise, solve, package.
//!
//! # Design
//! - Every run owns a private workspace under the configured work root; the
//!   workspace travels with the [`ResultArchive`] and is removed once the
//!   archive is consumed or dropped.
//! - A fixed-size slot pool bounds concurrent pipelines; callers wait for a slot.
//! - Filesystem-heavy steps run on the blocking pool, tools run as child processes.

use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use foamrun_telemetry::Metrics;
use futures_core::Stream;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::archive;
use crate::case;
use crate::error::{RunnerError, RunnerResult};
use crate::model::{RunReport, RunnerSettings, StepKind, StepStatus, ToolInvocation, ToolRole};
use crate::tools::{ProcessInvoker, ToolCatalog, ToolInvoker};

const WORKSPACE_PREFIX: &str = "foamrun-";
const UPLOAD_FILE: &str = "upload.zip";
const EXTRACT_DIR: &str = "case";
const RESULTS_FILE: &str = "results.zip";
const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// Runs uploaded cases through the solver tool chain.
#[derive(Clone)]
pub struct CaseRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    settings: RunnerSettings,
    catalog: ToolCatalog,
    invoker: Arc<dyn ToolInvoker>,
    metrics: Metrics,
    slots: Semaphore,
}

impl CaseRunner {
    /// Construct a runner that spawns real processes.
    #[must_use]
    pub fn new(settings: RunnerSettings, catalog: ToolCatalog, metrics: Metrics) -> Self {
        Self::with_invoker(settings, catalog, Arc::new(ProcessInvoker), metrics)
    }

    /// Construct a runner with a custom tool invoker.
    #[must_use]
    pub fn with_invoker(
        settings: RunnerSettings,
        catalog: ToolCatalog,
        invoker: Arc<dyn ToolInvoker>,
        metrics: Metrics,
    ) -> Self {
        let slots = Semaphore::new(settings.max_concurrent_runs.max(1));
        Self {
            inner: Arc::new(RunnerInner {
                settings,
                catalog,
                invoker,
                metrics,
                slots,
            }),
        }
    }

    /// Settings the runner was built with.
    #[must_use]
    pub fn settings(&self) -> &RunnerSettings {
        &self.inner.settings
    }

    /// Run the pipeline for one uploaded case archive.
    ///
    /// The upload is written into the run's workspace and released before the
    /// run waits for a free slot. Dropping the returned future kills any
    /// running tool and removes the workspace.
    ///
    /// # Errors
    ///
    /// Returns the first [`RunnerError`] raised by any step; the workspace has
    /// already been removed when the error is returned.
    pub async fn run<B>(&self, upload: B) -> RunnerResult<ResultArchive>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "case_run",
            run_id = %run_id,
            upload_bytes = upload.as_ref().len()
        );
        self.run_staged(run_id, upload).instrument(span).await
    }

    async fn run_staged<B>(&self, run_id: Uuid, upload: B) -> RunnerResult<ResultArchive>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let metrics = &self.inner.metrics;
        let started = Instant::now();
        let mut report = RunReport::new(run_id);
        let result = self.stage_then_execute(&mut report, upload).await;
        let elapsed = started.elapsed();

        match result {
            Ok((workspace, len)) => {
                metrics.observe_case_run("success", elapsed);
                info!(
                    steps = %report.summary(),
                    solver = report.solver.as_deref().unwrap_or_default(),
                    archive_bytes = len,
                    elapsed_ms = millis(elapsed),
                    "case run completed"
                );
                Ok(ResultArchive {
                    workspace,
                    len,
                    report,
                })
            }
            Err(err) => {
                metrics.observe_case_run(err.class().as_str(), elapsed);
                info!(
                    steps = %report.summary(),
                    class = err.class().as_str(),
                    elapsed_ms = millis(elapsed),
                    "case run failed"
                );
                Err(err)
            }
        }
    }

    async fn stage_then_execute<B>(
        &self,
        report: &mut RunReport,
        upload: B,
    ) -> RunnerResult<(Workspace, u64)>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let work_root = self.inner.settings.work_root.clone();
        let workspace = blocking("stage", move || {
            Workspace::stage(&work_root, upload.as_ref())
        })
        .await?;

        let metrics = &self.inner.metrics;
        let waiting = GaugeGuard::enter(metrics, Metrics::add_waiting_runs);
        let slot = self.inner.slots.acquire().await;
        drop(waiting);
        let Ok(_slot) = slot else {
            workspace.close().await;
            return Err(RunnerError::SlotPoolClosed);
        };
        let _active = GaugeGuard::enter(metrics, Metrics::add_active_runs);

        self.execute(report, workspace).await
    }

    async fn execute(
        &self,
        report: &mut RunReport,
        workspace: Workspace,
    ) -> RunnerResult<(Workspace, u64)> {
        let workspace = self
            .timed(
                report,
                StepKind::Extract,
                blocking("extract", move || workspace.unpack()),
            )
            .await?;

        match self.process(report, &workspace).await {
            Ok(len) => Ok((workspace, len)),
            Err(err) => {
                workspace.close().await;
                Err(err)
            }
        }
    }

    async fn process(&self, report: &mut RunReport, workspace: &Workspace) -> RunnerResult<u64> {
        let timeout = self.inner.settings.tool_timeout;
        let catalog = &self.inner.catalog;
        let extract_root = workspace.extract_root();

        let root = extract_root.clone();
        let case_root = self
            .timed(
                report,
                StepKind::ResolveCase,
                blocking("resolve_case", move || case::resolve_case_root(&root)),
            )
            .await?;
        debug!(case_root = %case_root.display(), "case root resolved");

        for role in [ToolRole::BlockMesh, ToolRole::SnappyHexMesh] {
            let enabled = role
                .marker()
                .is_some_and(|marker| case::has_marker(&case_root, marker));
            if enabled {
                let invocation = catalog.fixed_tool(role, &case_root, timeout);
                self.timed(report, role.step(), self.run_tool(invocation))
                    .await?;
            } else {
                self.finish_step(report, role.step(), StepStatus::Skipped, Duration::ZERO);
            }
        }

        let invocation = catalog.fixed_tool(ToolRole::PotentialFoam, &case_root, timeout);
        self.timed(report, StepKind::PotentialFoam, self.run_tool(invocation))
            .await?;

        let started = Instant::now();
        let root = case_root.clone();
        let solved = match blocking("read_control_dict", move || {
            case::read_solver_identifier(&root)
        })
        .await
        {
            Ok(solver) => {
                report.solver = Some(solver.clone());
                self.run_tool(catalog.solver(&solver, &case_root, timeout))
                    .await
            }
            Err(err) => Err(err),
        };
        self.settle(report, StepKind::Solver, started, solved)?;

        let results_path = workspace.results_path();
        let (files, len) = self
            .timed(
                report,
                StepKind::Package,
                blocking("package", move || {
                    let files = archive::package_directory(&extract_root, &results_path)?;
                    let len = fs::metadata(&results_path)
                        .map_err(|source| {
                            RunnerError::io("package.metadata", &results_path, source)
                        })?
                        .len();
                    Ok((files, len))
                }),
            )
            .await?;
        debug!(files, archive_bytes = len, "case results packaged");
        Ok(len)
    }

    async fn run_tool(&self, invocation: RunnerResult<ToolInvocation>) -> RunnerResult<()> {
        let invocation = invocation?;
        info!(
            tool = %invocation.name,
            command = %invocation.command_line(),
            "running tool"
        );
        let result = self.inner.invoker.invoke(&invocation).await;
        let status = match &result {
            Ok(()) => "success",
            Err(RunnerError::ToolTimedOut { .. }) => "timeout",
            Err(_) => "failure",
        };
        self.inner
            .metrics
            .inc_tool_invocation(invocation.role.as_str(), status);
        result
    }

    async fn timed<T, F>(&self, report: &mut RunReport, step: StepKind, work: F) -> RunnerResult<T>
    where
        F: Future<Output = RunnerResult<T>>,
    {
        let started = Instant::now();
        let result = work.await;
        self.settle(report, step, started, result)
    }

    fn settle<T>(
        &self,
        report: &mut RunReport,
        step: StepKind,
        started: Instant,
        result: RunnerResult<T>,
    ) -> RunnerResult<T> {
        let status = if result.is_ok() {
            StepStatus::Completed
        } else {
            StepStatus::Failed
        };
        self.finish_step(report, step, status, started.elapsed());
        result
    }

    fn finish_step(
        &self,
        report: &mut RunReport,
        step: StepKind,
        status: StepStatus,
        elapsed: Duration,
    ) {
        report.record(step, status, elapsed);
        self.inner
            .metrics
            .inc_pipeline_step(step.as_str(), status.as_str());
        debug!(
            step = step.as_str(),
            status = status.as_str(),
            elapsed_ms = millis(elapsed),
            "pipeline step finished"
        );
    }
}

async fn blocking<T, F>(operation: &'static str, work: F) -> RunnerResult<T>
where
    F: FnOnce() -> RunnerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|source| RunnerError::Join { operation, source })?
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

struct GaugeGuard<'a> {
    metrics: &'a Metrics,
    adjust: fn(&Metrics, i64),
}

impl<'a> GaugeGuard<'a> {
    fn enter(metrics: &'a Metrics, adjust: fn(&Metrics, i64)) -> Self {
        adjust(metrics, 1);
        Self { metrics, adjust }
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        (self.adjust)(self.metrics, -1);
    }
}

/// Per-run scratch directory: `upload.zip`, the extracted `case/`, and `results.zip`.
#[derive(Debug)]
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn stage(work_root: &Path, upload: &[u8]) -> RunnerResult<Self> {
        fs::create_dir_all(work_root)
            .map_err(|source| RunnerError::io("workspace.create_root", work_root, source))?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(work_root)
            .map_err(|source| RunnerError::io("workspace.create", work_root, source))?;
        let workspace = Self { dir };
        let upload_path = workspace.upload_path();
        if let Err(source) = fs::write(&upload_path, upload) {
            workspace.remove();
            return Err(RunnerError::io("workspace.write_upload", &upload_path, source));
        }
        Ok(workspace)
    }

    fn unpack(self) -> RunnerResult<Self> {
        match archive::extract_zip(&self.upload_path(), &self.extract_root()) {
            Ok(_) => Ok(self),
            Err(err) => {
                self.remove();
                Err(err)
            }
        }
    }

    fn upload_path(&self) -> PathBuf {
        self.dir.path().join(UPLOAD_FILE)
    }

    fn extract_root(&self) -> PathBuf {
        self.dir.path().join(EXTRACT_DIR)
    }

    fn results_path(&self) -> PathBuf {
        self.dir.path().join(RESULTS_FILE)
    }

    fn remove(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(err) = self.dir.close() {
            warn!(path = %path.display(), error = %err, "failed to remove case workspace");
        }
    }

    async fn close(self) {
        if let Err(err) = tokio::task::spawn_blocking(move || self.remove()).await {
            warn!(error = %err, "case workspace cleanup task failed");
        }
    }
}

/// Packaged results of a finished run, backed by a file in the run's workspace.
#[derive(Debug)]
pub struct ResultArchive {
    workspace: Workspace,
    len: u64,
    report: RunReport,
}

impl ResultArchive {
    /// Size of the archive in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Whether the archive has no bytes.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// What the pipeline did to produce this archive.
    #[must_use]
    pub const fn report(&self) -> &RunReport {
        &self.report
    }

    /// Read the whole archive and remove the workspace.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Io`] if the archive file cannot be read.
    pub async fn into_bytes(self) -> RunnerResult<Vec<u8>> {
        let path = self.workspace.results_path();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|source| RunnerError::io("result.read", &path, source));
        self.workspace.close().await;
        bytes
    }

    /// Stream the archive in chunks; the workspace is removed when the stream
    /// finishes or is dropped.
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + 'static {
        async_stream::try_stream! {
            let Self { workspace, .. } = self;
            let mut file = tokio::fs::File::open(workspace.results_path()).await?;
            let mut chunk = vec![0_u8; STREAM_CHUNK_BYTES];
            loop {
                let read = file.read(&mut chunk).await?;
                if read == 0 {
                    break;
                }
                yield chunk[..read].to_vec();
            }
            drop(file);
            workspace.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use foamrun_test_support::{ToolBin, read_archive_entries, simple_foam_case, zip_bytes};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingInvoker {
        calls: Mutex<Vec<String>>,
        running: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl RecordingInvoker {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl ToolInvoker for RecordingInvoker {
        async fn invoke(&self, invocation: &ToolInvocation) -> RunnerResult<()> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(invocation.command_line());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        work_root: TempDir,
        bin: ToolBin,
        metrics: Metrics,
    }

    impl Harness {
        fn new() -> Result<Self> {
            let bin = ToolBin::new()?;
            bin.install_openfoam_stand_ins()?;
            Ok(Self {
                work_root: TempDir::new()?,
                bin,
                metrics: Metrics::new()?,
            })
        }

        fn runner(&self, invoker: Arc<dyn ToolInvoker>, slots: usize) -> CaseRunner {
            CaseRunner::with_invoker(
                RunnerSettings {
                    work_root: self.work_root.path().to_path_buf(),
                    tool_timeout: Duration::from_secs(30),
                    max_concurrent_runs: slots,
                },
                ToolCatalog::new(&self.bin.search_path()),
                invoker,
                self.metrics.clone(),
            )
        }

        fn leftover_workspaces(&self) -> Result<usize> {
            Ok(fs::read_dir(self.work_root.path())?.count())
        }
    }

    #[tokio::test]
    async fn mesh_steps_are_skipped_without_markers() -> Result<()> {
        let harness = Harness::new()?;
        let invoker = Arc::new(RecordingInvoker::default());
        let runner = harness.runner(invoker.clone(), 1);

        let result = runner.run(simple_foam_case()?).await?;

        let calls = invoker.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("potentialFoam -case "));
        assert!(calls[1].starts_with("simpleFoam -case "));
        assert!(calls[1].ends_with("/case/case"), "tools run in the unwrapped folder");

        let report = result.report();
        assert_eq!(
            report.status_of(StepKind::BlockMesh),
            Some(StepStatus::Skipped)
        );
        assert_eq!(
            report.status_of(StepKind::SnappyHexMesh),
            Some(StepStatus::Skipped)
        );
        assert_eq!(report.solver.as_deref(), Some("simpleFoam"));
        assert_eq!(
            report.summary(),
            "extract=completed,resolve_case=completed,block_mesh=skipped,\
             snappy_hex_mesh=skipped,potential_foam=completed,solver=completed,package=completed"
        );

        assert!(!result.is_empty());
        let bytes = result.into_bytes().await?;
        assert!(read_archive_entries(&bytes)?.contains("case/system/controlDict"));
        assert_eq!(harness.leftover_workspaces()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn markers_enable_mesh_steps_in_order() -> Result<()> {
        let harness = Harness::new()?;
        let invoker = Arc::new(RecordingInvoker::default());
        let runner = harness.runner(invoker.clone(), 1);
        let upload = zip_bytes(&[
            ("system/controlDict", b"application simpleFoam;\n"),
            ("system/blockMeshDict", b"vertices ();\n"),
            ("system/snappyHexMeshDict", b"castellatedMesh true;\n"),
            ("constant/", b""),
        ])?;

        let result = runner.run(upload).await?;

        let tools: Vec<String> = invoker
            .calls()
            .iter()
            .filter_map(|call| call.split_whitespace().next().map(str::to_string))
            .collect();
        assert_eq!(
            tools,
            ["blockMesh", "snappyHexMesh", "potentialFoam", "simpleFoam"]
        );
        assert!(invoker.calls()[1].ends_with(" -overwrite"));
        drop(result);
        assert_eq!(harness.leftover_workspaces()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_application_never_invokes_a_solver() -> Result<()> {
        let harness = Harness::new()?;
        let invoker = Arc::new(RecordingInvoker::default());
        let runner = harness.runner(invoker.clone(), 1);
        let upload = zip_bytes(&[("case/system/controlDict", b"endTime 10;\n")])?;

        let err = runner.run(upload).await.expect_err("no application line");

        assert!(matches!(err, RunnerError::MissingSolverIdentifier { .. }));
        let calls = invoker.calls();
        assert_eq!(calls.len(), 1, "only potentialFoam ran: {calls:?}");
        assert!(calls[0].starts_with("potentialFoam"));
        assert_eq!(harness.leftover_workspaces()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_solver_is_reported_before_spawning() -> Result<()> {
        let harness = Harness::new()?;
        let invoker = Arc::new(RecordingInvoker::default());
        let runner = harness.runner(invoker.clone(), 1);
        let upload = zip_bytes(&[("case/system/controlDict", b"application pisoFoam;\n")])?;

        let err = runner.run(upload).await.expect_err("unknown solver");

        assert!(matches!(err, RunnerError::SolverNotFound { ref solver } if solver == "pisoFoam"));
        assert_eq!(invoker.calls().len(), 1);
        assert_eq!(harness.leftover_workspaces()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn slot_pool_bounds_concurrent_runs() -> Result<()> {
        let harness = Harness::new()?;
        let invoker = Arc::new(RecordingInvoker::with_delay(Duration::from_millis(50)));
        let runner = harness.runner(invoker.clone(), 2);

        let runs = (0..5).map(|_| {
            let runner = runner.clone();
            async move { runner.run(simple_foam_case()?).await.map_err(anyhow::Error::from) }
        });
        let results = futures_util::future::join_all(runs).await;

        for result in results {
            drop(result?);
        }
        let peak = invoker.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
        let snapshot = harness.metrics.snapshot();
        assert_eq!(snapshot.active_runs, 0);
        assert_eq!(snapshot.waiting_runs, 0);
        assert_eq!(harness.leftover_workspaces()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_archive_leaves_no_workspace() -> Result<()> {
        let harness = Harness::new()?;
        let invoker = Arc::new(RecordingInvoker::default());
        let runner = harness.runner(invoker.clone(), 1);

        let err = runner
            .run(b"PK but not really".to_vec())
            .await
            .expect_err("invalid zip");

        assert!(matches!(err, RunnerError::ArchiveDecode { .. }));
        assert!(invoker.calls().is_empty());
        assert_eq!(harness.leftover_workspaces()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn streamed_archive_matches_file_and_cleans_up() -> Result<()> {
        use futures_util::StreamExt;

        let harness = Harness::new()?;
        let runner = harness.runner(Arc::new(RecordingInvoker::default()), 1);
        let result = runner.run(simple_foam_case()?).await?;
        let expected_len = result.len();

        let mut stream = Box::pin(result.into_stream());
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk?);
        }

        assert_eq!(u64::try_from(bytes.len())?, expected_len);
        assert!(read_archive_entries(&bytes)?.contains("case/0/U"));
        assert_eq!(harness.leftover_workspaces()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn waiting_runs_keep_their_upload_on_disk() -> Result<()> {
        let harness = Harness::new()?;
        let invoker = Arc::new(RecordingInvoker::with_delay(Duration::from_millis(300)));
        let runner = harness.runner(invoker, 1);

        let spawn_run = |upload: Vec<u8>| {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run(upload).await })
        };
        let first = spawn_run(simple_foam_case()?);
        let second = spawn_run(simple_foam_case()?);

        let deadline = Instant::now() + Duration::from_secs(10);
        while harness.metrics.snapshot().waiting_runs == 0 {
            assert!(Instant::now() < deadline, "no run waited for a slot");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let staged = fs::read_dir(harness.work_root.path())?
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.path().join(UPLOAD_FILE).is_file())
            .count();
        assert_eq!(staged, 2, "the waiting run staged its upload before queueing");

        drop(first.await??);
        drop(second.await??);
        assert_eq!(harness.leftover_workspaces()?, 0);
        Ok(())
    }
}
