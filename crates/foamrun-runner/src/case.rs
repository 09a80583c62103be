//! Case directory inspection: locating the case root and reading `controlDict`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RunnerError, RunnerResult};

/// Directory holding the case dictionaries.
pub const SYSTEM_DIR: &str = "system";
/// Dictionary naming the solver application.
pub const CONTROL_DICT: &str = "controlDict";

const APPLICATION_KEY: &str = "application";

/// Decide which directory under `extract_root` the tools should run against.
///
/// The extraction root wins when it holds `system/` itself. A single top-level
/// folder holding `system/` is unwrapped. Anything else runs against the
/// extraction root; deeper nesting surfaces later as a missing `controlDict`.
///
/// # Errors
///
/// Returns [`RunnerError::NoCaseFound`] when the root has no subdirectories and
/// [`RunnerError::Io`] if the root cannot be listed.
pub fn resolve_case_root(extract_root: &Path) -> RunnerResult<PathBuf> {
    let listing = fs::read_dir(extract_root)
        .map_err(|source| RunnerError::io("case.list_root", extract_root, source))?;

    let mut directories = Vec::new();
    for entry in listing {
        let entry = entry.map_err(|source| RunnerError::io("case.read_entry", extract_root, source))?;
        let file_type = entry
            .file_type()
            .map_err(|source| RunnerError::io("case.file_type", entry.path(), source))?;
        if file_type.is_dir() {
            directories.push(entry.path());
        }
    }

    if directories.is_empty() {
        return Err(RunnerError::NoCaseFound {
            root: extract_root.to_path_buf(),
        });
    }
    if extract_root.join(SYSTEM_DIR).is_dir() {
        return Ok(extract_root.to_path_buf());
    }
    if let [only] = directories.as_slice()
        && only.join(SYSTEM_DIR).is_dir()
    {
        return Ok(only.clone());
    }
    Ok(extract_root.to_path_buf())
}

/// Whether `system/<marker>` exists under `case_root`.
#[must_use]
pub fn has_marker(case_root: &Path, marker: &str) -> bool {
    case_root.join(SYSTEM_DIR).join(marker).exists()
}

/// Path of the case's `controlDict`.
#[must_use]
pub fn control_dict_path(case_root: &Path) -> PathBuf {
    case_root.join(SYSTEM_DIR).join(CONTROL_DICT)
}

/// Extract the solver name from `controlDict` contents.
///
/// The first line mentioning `application` wins; its last token, minus any
/// trailing `;`, is the identifier.
#[must_use]
pub fn parse_solver_identifier(contents: &str) -> Option<String> {
    let line = contents.lines().find(|line| line.contains(APPLICATION_KEY))?;
    let token = line.split_whitespace().last()?.trim_end_matches(';');
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Read and parse the solver identifier for the case at `case_root`.
///
/// # Errors
///
/// Returns [`RunnerError::Io`] if `controlDict` cannot be read and
/// [`RunnerError::MissingSolverIdentifier`] if it names no application.
pub fn read_solver_identifier(case_root: &Path) -> RunnerResult<String> {
    let control_dict = control_dict_path(case_root);
    let contents = fs::read(&control_dict)
        .map_err(|source| RunnerError::io("case.read_control_dict", &control_dict, source))?;
    parse_solver_identifier(&String::from_utf8_lossy(&contents))
        .ok_or(RunnerError::MissingSolverIdentifier { control_dict })
}
