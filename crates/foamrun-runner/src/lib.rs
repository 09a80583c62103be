#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

//! Case pipeline for uploaded solver cases.
//!
//! Layout: `archive.rs` (zip extraction and packaging), `case.rs` (case root and
//! `controlDict` inspection), `tools.rs` (executable lookup and process invocation),
//! `model.rs` (settings, steps, reports), `service.rs` (the pipeline itself).

pub mod archive;
pub mod case;
pub mod error;
pub mod model;
pub mod service;
pub mod tools;

pub use error::{ErrorClass, RunnerError, RunnerResult};
pub use model::{RunReport, RunnerSettings, StepKind, StepRecord, StepStatus, ToolInvocation, ToolRole};
pub use service::{CaseRunner, ResultArchive};
pub use tools::{ProcessInvoker, ToolCatalog, ToolInvoker};
