#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

//! HTTP surface for the case runner.
//!
//! Layout: `error.rs` (server bootstrap errors), `state.rs` (shared handler state),
//! `http/` (router, upload handler, health and metrics endpoints, middleware).

pub mod error;
pub mod http;
pub(crate) mod state;

pub use error::{ApiServerError, ApiServerResult};
pub use http::router::ApiServer;
