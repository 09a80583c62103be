//! Stand-in executables that mimic external solver tools.
//!
//! Every script records its name and arguments in `invocations.log` inside the
//! bin directory (never inside the case), then runs a caller-supplied shell body
//! with `$case_dir` bound to the value that followed `-case`.

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tempfile::TempDir;

const INVOCATION_LOG: &str = "invocations.log";

/// Temporary directory populated with stand-in tool scripts.
pub struct ToolBin {
    dir: TempDir,
}

impl ToolBin {
    /// Create an empty bin directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary directory cannot be created.
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::Builder::new().prefix("foamrun-bin-").tempdir()?,
        })
    }

    /// Bin directory containing the installed scripts.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Value suitable for a tool search path containing only this directory.
    #[must_use]
    pub fn search_path(&self) -> OsString {
        self.dir.path().as_os_str().to_os_string()
    }

    /// Install `name` as an executable script running `body`.
    ///
    /// # Errors
    ///
    /// Returns an error if the script cannot be written or made executable.
    pub fn install(&self, name: &str, body: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        let log = self.dir.path().join(INVOCATION_LOG);
        let script = format!(
            "#!/bin/sh\n\
             echo \"{name} $*\" >> \"{log}\"\n\
             case_dir=\"\"\n\
             while [ $# -gt 0 ]; do\n\
             \x20 if [ \"$1\" = \"-case\" ]; then case_dir=\"$2\"; shift; fi\n\
             \x20 shift\n\
             done\n\
             {body}\n",
            log = log.display(),
        );
        fs::write(&path, script)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    /// Install a tool that succeeds without touching the case.
    ///
    /// # Errors
    ///
    /// Returns an error if the script cannot be installed.
    pub fn install_noop(&self, name: &str) -> Result<PathBuf> {
        self.install(name, "exit 0")
    }

    /// Install a tool that writes `contents` to `relative` inside the case.
    ///
    /// # Errors
    ///
    /// Returns an error if the script cannot be installed.
    pub fn install_writer(&self, name: &str, relative: &str, contents: &str) -> Result<PathBuf> {
        let body = format!(
            "mkdir -p \"$(dirname \"$case_dir/{relative}\")\"\n\
             printf '%s' '{contents}' > \"$case_dir/{relative}\""
        );
        self.install(name, &body)
    }

    /// Install a tool that prints to stderr and exits with `code`.
    ///
    /// # Errors
    ///
    /// Returns an error if the script cannot be installed.
    pub fn install_failure(&self, name: &str, code: i32) -> Result<PathBuf> {
        self.install(
            name,
            &format!("echo \"{name}: fatal error in case\" >&2\nexit {code}"),
        )
    }

    /// Install a tool that sleeps for `seconds` before succeeding.
    ///
    /// # Errors
    ///
    /// Returns an error if the script cannot be installed.
    pub fn install_sleeper(&self, name: &str, seconds: u32) -> Result<PathBuf> {
        self.install(name, &format!("exec sleep {seconds}"))
    }

    /// Install the fixed tool chain (`blockMesh`, `snappyHexMesh`, `potentialFoam`)
    /// as no-op stand-ins plus a `simpleFoam` solver writing `100/U`.
    ///
    /// # Errors
    ///
    /// Returns an error if any script cannot be installed.
    pub fn install_openfoam_stand_ins(&self) -> Result<()> {
        self.install_writer("blockMesh", "constant/polyMesh/points", "mesh")?;
        self.install_noop("snappyHexMesh")?;
        self.install_noop("potentialFoam")?;
        self.install_writer("simpleFoam", "100/U", "solved")?;
        Ok(())
    }

    /// Lines recorded by every script invocation, in call order.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be read.
    pub fn invocations(&self) -> Result<Vec<String>> {
        let log = self.dir.path().join(INVOCATION_LOG);
        if !log.exists() {
            return Ok(Vec::new());
        }
        Ok(fs::read_to_string(log)?
            .lines()
            .map(str::to_string)
            .collect())
    }

    /// Tool names invoked so far, in call order.
    ///
    /// # Errors
    ///
    /// Returns an error if the log exists but cannot be read.
    pub fn invoked_tools(&self) -> Result<Vec<String>> {
        Ok(self
            .invocations()?
            .iter()
            .filter_map(|line| line.split_whitespace().next().map(str::to_string))
            .collect())
    }
}
