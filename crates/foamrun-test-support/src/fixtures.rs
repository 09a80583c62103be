//! Zip fixtures shaped like solver case directories.

use std::collections::BTreeSet;
use std::io::{Cursor, Read, Write};

use anyhow::Result;
use zip::ZipArchive;
use zip::write::FileOptions;

/// `controlDict` body naming `simpleFoam` as the solver application.
pub const SIMPLE_FOAM_CONTROL_DICT: &str = "FoamFile\n{\n    version     2.0;\n    object      controlDict;\n}\n\napplication     simpleFoam;\n\nstartFrom       startTime;\nendTime         100;\n";

/// Build an in-memory zip archive. Entries ending in `/` become directories.
///
/// # Errors
///
/// Returns an error if the zip writer fails.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default();
    for (name, contents) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options)?;
        } else {
            writer.start_file(*name, options)?;
            writer.write_all(contents)?;
        }
    }
    Ok(writer.finish()?.into_inner())
}

/// Case wrapped in a single `case/` folder with no mesh dictionaries.
///
/// # Errors
///
/// Returns an error if the zip writer fails.
pub fn simple_foam_case() -> Result<Vec<u8>> {
    zip_bytes(&[
        ("case/", b""),
        ("case/system/", b""),
        ("case/system/controlDict", SIMPLE_FOAM_CONTROL_DICT.as_bytes()),
        ("case/system/fvSchemes", b"ddtSchemes {}\n"),
        ("case/constant/transportProperties", b"nu 1e-05;\n"),
        ("case/0/U", b"internalField uniform (1 0 0);\n"),
    ])
}

/// Names of every file entry (directories excluded) in an archive.
///
/// # Errors
///
/// Returns an error if the archive cannot be decoded.
pub fn read_archive_entries(bytes: &[u8]) -> Result<BTreeSet<String>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut names = BTreeSet::new();
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        if !entry.is_dir() {
            names.insert(entry.name().to_string());
        }
    }
    Ok(names)
}

/// Contents of a single entry in an archive.
///
/// # Errors
///
/// Returns an error if the archive cannot be decoded or the entry is missing.
pub fn read_archive_entry(bytes: &[u8], name: &str) -> Result<String> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entry = archive.by_name(name)?;
    let mut contents = String::new();
    entry.read_to_string(&mut contents)?;
    Ok(contents)
}
