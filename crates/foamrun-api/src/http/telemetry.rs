//! Request counting middleware feeding `http_requests_total`.

use axum::{
    body::Body,
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use foamrun_telemetry::Metrics;

/// Route label used when a request reached no registered route.
pub(crate) const UNMATCHED_ROUTE: &str = "unmatched";

/// Count each request against its route template and response status.
///
/// Route templates (`/upload`) are used instead of raw paths to keep the
/// label set bounded.
pub(crate) async fn count_requests(
    State(telemetry): State<Metrics>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(
            || UNMATCHED_ROUTE.to_string(),
            |matched| matched.as_str().to_string(),
        );
    let response = next.run(request).await;
    telemetry.inc_http_request(&route, response.status().as_u16());
    response
}
