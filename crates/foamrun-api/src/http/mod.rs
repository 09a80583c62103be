//! HTTP surface modules (router, handlers, middleware).

/// Shared constants, header names, and fixed response messages.
pub mod constants;
/// Error responses rendered as `{"error": message}`.
pub mod errors;
/// Health and metrics endpoints.
pub mod health;
/// Router construction and server host.
pub mod router;
/// Metrics middleware for HTTP requests.
pub mod telemetry;
/// Case upload endpoint.
pub mod upload;
