#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

//! Shared test helpers used across integration suites.
//! Layout: fixtures.rs (case archives), tools.rs (stand-in external executables).

pub mod fixtures;
pub mod tools;

pub use fixtures::{
    SIMPLE_FOAM_CONTROL_DICT, read_archive_entries, read_archive_entry, simple_foam_case, zip_bytes,
};
pub use tools::ToolBin;
