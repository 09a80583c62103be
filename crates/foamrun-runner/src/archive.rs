//! Zip extraction into a case workspace and packaging of the finished tree.
//!
//! # Design
//! - Extraction refuses absolute paths, parent traversal, and symlink entries.
//! - Packaging walks in file-name order so identical trees produce identical entry lists.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::error::{RunnerError, RunnerResult};

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

/// Unpack the zip at `source` into `target`, creating directories as needed.
///
/// # Errors
///
/// Returns [`RunnerError::ArchiveDecode`] if the archive cannot be read,
/// [`RunnerError::UnsafeArchiveEntry`] if an entry is not safe to materialise,
/// and [`RunnerError::Io`] for filesystem failures.
pub fn extract_zip(source: &Path, target: &Path) -> RunnerResult<usize> {
    let file =
        File::open(source).map_err(|source_err| RunnerError::io("extract.open", source, source_err))?;
    let mut archive = ZipArchive::new(file).map_err(|source_err| RunnerError::ArchiveDecode {
        operation: "extract.decode",
        path: source.to_path_buf(),
        source: source_err,
    })?;

    fs::create_dir_all(target)
        .map_err(|source_err| RunnerError::io("extract.create_root", target, source_err))?;

    let mut files = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|source_err| RunnerError::ArchiveDecode {
                operation: "extract.read_entry",
                path: source.to_path_buf(),
                source: source_err,
            })?;
        let entry_path = sanitize_archive_path(entry.name())?;
        if entry
            .unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
        {
            return Err(RunnerError::unsafe_entry(entry.name(), "symlink"));
        }
        let destination = target.join(&entry_path);

        if entry.name().ends_with('/') {
            fs::create_dir_all(&destination).map_err(|source_err| {
                RunnerError::io("extract.create_dir", &destination, source_err)
            })?;
            continue;
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|source_err| RunnerError::io("extract.create_parent", parent, source_err))?;
        }

        let mut output = File::create(&destination)
            .map_err(|source_err| RunnerError::io("extract.create_file", &destination, source_err))?;
        io::copy(&mut entry, &mut output)
            .map_err(|source_err| RunnerError::io("extract.copy", &destination, source_err))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            let perms = fs::Permissions::from_mode(mode & 0o7777);
            fs::set_permissions(&destination, perms).map_err(|source_err| {
                RunnerError::io("extract.set_permissions", &destination, source_err)
            })?;
        }
        files += 1;
    }

    debug!(archive = %source.display(), files, "case archive extracted");
    Ok(files)
}

/// Normalise an archive entry name into a relative path that stays under the root.
///
/// # Errors
///
/// Returns [`RunnerError::UnsafeArchiveEntry`] for absolute names, parent
/// traversal, or names that normalise to nothing.
pub fn sanitize_archive_path(entry: &str) -> RunnerResult<PathBuf> {
    let path = Path::new(entry);
    if path.is_absolute() {
        return Err(RunnerError::unsafe_entry(entry, "absolute_path"));
    }

    let mut sanitized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RunnerError::unsafe_entry(entry, "invalid_segment"));
            }
        }
    }

    if sanitized.as_os_str().is_empty() {
        return Err(RunnerError::unsafe_entry(entry, "empty_path"));
    }
    Ok(sanitized)
}

/// Zip every regular file under `root` into `destination`, named relative to `root`.
///
/// Symlinks are not followed and directories only appear through the files they hold.
///
/// # Errors
///
/// Returns [`RunnerError::Walkdir`], [`RunnerError::Zip`], or [`RunnerError::Io`]
/// when traversal, encoding, or file access fails.
pub fn package_directory(root: &Path, destination: &Path) -> RunnerResult<usize> {
    let file = File::create(destination)
        .map_err(|source_err| RunnerError::io("package.create", destination, source_err))?;
    let mut writer = ZipWriter::new(file);
    let base_options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut files = 0;
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry =
            entry.map_err(|source_err| RunnerError::walkdir("package.walk", root, source_err))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = archive_entry_name(root, path)?;
        let metadata = entry
            .metadata()
            .map_err(|source_err| RunnerError::walkdir("package.metadata", path, source_err))?;

        let options = base_options.large_file(metadata.len() >= u64::from(u32::MAX));
        #[cfg(unix)]
        let options = options.unix_permissions(metadata.permissions().mode() & 0o777);

        writer
            .start_file(name, options)
            .map_err(|source_err| RunnerError::zip("package.start_file", path, source_err))?;
        let mut input =
            File::open(path).map_err(|source_err| RunnerError::io("package.open", path, source_err))?;
        io::copy(&mut input, &mut writer)
            .map_err(|source_err| RunnerError::io("package.copy", path, source_err))?;
        files += 1;
    }

    writer
        .finish()
        .map_err(|source_err| RunnerError::zip("package.finish", destination, source_err))?;
    debug!(root = %root.display(), files, "result archive written");
    Ok(files)
}

fn archive_entry_name(root: &Path, path: &Path) -> RunnerResult<String> {
    let relative = path.strip_prefix(root).map_err(|_| RunnerError::Io {
        operation: "package.strip_prefix",
        path: path.to_path_buf(),
        source: io::Error::other("entry outside packaging root"),
    })?;
    Ok(relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}
