//! Router construction and server host for the API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::Request,
    middleware,
    routing::{get, post},
};
use foamrun_runner::CaseRunner;
use foamrun_telemetry::{Metrics, build_sha};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{Span, info, warn};

use crate::error::{ApiServerError, ApiServerResult};
use crate::http::constants::{HEADER_REQUEST_ID, ROUTE_HEALTH, ROUTE_METRICS, ROUTE_UPLOAD};
use crate::http::health::{health, metrics};
use crate::http::telemetry::count_requests;
use crate::http::upload::upload_case;
use crate::state::ApiState;

/// Axum router wrapper that hosts the case runner endpoints.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Construct the API around a case runner.
    ///
    /// `max_upload_bytes` caps the request body accepted by `POST /upload`.
    #[must_use]
    pub fn new(runner: CaseRunner, telemetry: Metrics, max_upload_bytes: usize) -> Self {
        let state = Arc::new(ApiState::new(runner, telemetry.clone()));
        let trace_layer = TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let method = request.method().clone();
                let uri_path = request.uri().path();
                let request_id = request
                    .headers()
                    .get(HEADER_REQUEST_ID)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("")
                    .to_string();

                tracing::info_span!(
                    "http.request",
                    method = %method,
                    route = %uri_path,
                    request_id = %request_id,
                    build_sha = %build_sha(),
                    status_code = tracing::field::Empty,
                    latency_ms = tracing::field::Empty
                )
            })
            .on_request(|_request: &Request<_>, _span: &Span| {})
            .on_response(
                |response: &axum::response::Response, latency: Duration, span: &Span| {
                    let status = response.status().as_u16();
                    span.record("status_code", status);
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
                    span.record("latency_ms", latency_ms);
                },
            );
        let layered = ServiceBuilder::new()
            .layer(foamrun_telemetry::set_request_id_layer())
            .layer(foamrun_telemetry::propagate_request_id_layer())
            .layer(trace_layer)
            .layer(middleware::from_fn_with_state(telemetry, count_requests));

        let router = Router::new()
            .route(ROUTE_HEALTH, get(health))
            .route(ROUTE_METRICS, get(metrics))
            .route(
                ROUTE_UPLOAD,
                post(upload_case).layer(DefaultBodyLimit::max(max_upload_bytes)),
            )
            .route_layer(layered)
            .with_state(state);

        Self { router }
    }

    /// Serve the API on `addr` until interrupted.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server terminates unexpectedly.
    pub async fn serve(self, addr: SocketAddr) -> ApiServerResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ApiServerError::Bind { addr, source })?;
        info!(addr = %addr, "starting api");
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|source| ApiServerError::Serve { source })
    }

    #[cfg(test)]
    pub(crate) fn router(&self) -> Router {
        self.router.clone()
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::body::{Body, to_bytes};
    use axum::http::{StatusCode, header};
    use foamrun_runner::{RunnerSettings, ToolCatalog};
    use foamrun_test_support::{ToolBin, read_archive_entries, simple_foam_case, zip_bytes};
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "foamrun-test-boundary";

    struct TestApp {
        server: ApiServer,
        bin: ToolBin,
        work_root: TempDir,
    }

    impl TestApp {
        fn new() -> Result<Self> {
            Self::with_limit(16 * 1024 * 1024)
        }

        fn with_limit(max_upload_bytes: usize) -> Result<Self> {
            let bin = ToolBin::new()?;
            bin.install_openfoam_stand_ins()?;
            let work_root = TempDir::new()?;
            let telemetry = Metrics::new()?;
            let runner = CaseRunner::new(
                RunnerSettings {
                    work_root: work_root.path().to_path_buf(),
                    tool_timeout: Duration::from_secs(60),
                    max_concurrent_runs: 2,
                },
                ToolCatalog::new(&bin.search_path()),
                telemetry.clone(),
            );
            Ok(Self {
                server: ApiServer::new(runner, telemetry, max_upload_bytes),
                bin,
                work_root,
            })
        }

        async fn send(
            &self,
            request: Request<Body>,
        ) -> Result<(StatusCode, header::HeaderMap, Vec<u8>)> {
            let response = self.server.router().oneshot(request).await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = to_bytes(response.into_body(), usize::MAX).await?;
            Ok((status, headers, body.to_vec()))
        }

        fn workspaces(&self) -> Result<usize> {
            Ok(std::fs::read_dir(self.work_root.path())?.count())
        }
    }

    fn multipart_request(
        field: &str,
        file_name: Option<&str>,
        contents: &[u8],
    ) -> Result<Request<Body>> {
        let disposition = file_name.map_or_else(
            || format!("form-data; name=\"{field}\""),
            |name| format!("form-data; name=\"{field}\"; filename=\"{name}\""),
        );
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/zip\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(contents);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Ok(Request::builder()
            .method("POST")
            .uri(ROUTE_UPLOAD)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))?)
    }

    fn error_message(body: &[u8]) -> Result<String> {
        let value: Value = serde_json::from_slice(body)?;
        Ok(value["error"].as_str().unwrap_or_default().to_string())
    }

    #[tokio::test]
    async fn upload_returns_results_archive() -> Result<()> {
        let app = TestApp::new()?;
        let upload = simple_foam_case()?;

        let (status, headers, body) = app
            .send(multipart_request("file", Some("case.zip"), &upload)?)
            .await?;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"results.zip\""
        );
        assert!(headers.contains_key(HEADER_REQUEST_ID));
        let mut expected = read_archive_entries(&upload)?;
        expected.insert("case/100/U".to_string());
        assert_eq!(read_archive_entries(&body)?, expected);
        assert_eq!(app.bin.invoked_tools()?, ["potentialFoam", "simpleFoam"]);
        assert_eq!(app.workspaces()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_part_is_rejected() -> Result<()> {
        let app = TestApp::new()?;

        let (status, _, body) = app
            .send(multipart_request("attachment", Some("case.zip"), b"zip")?)
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body)?, "No file part");

        let not_multipart = Request::builder()
            .method("POST")
            .uri(ROUTE_UPLOAD)
            .body(Body::from("plain"))?;
        let (status, _, body) = app.send(not_multipart).await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body)?, "No file part");
        Ok(())
    }

    #[tokio::test]
    async fn empty_file_name_is_rejected() -> Result<()> {
        let app = TestApp::new()?;
        let (status, _, body) = app
            .send(multipart_request("file", Some(""), b"")?)
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_message(&body)?, "No selected file");
        Ok(())
    }

    #[tokio::test]
    async fn wrong_suffix_is_rejected_before_running() -> Result<()> {
        let app = TestApp::new()?;
        let (status, _, body) = app
            .send(multipart_request("file", Some("case.tar.gz"), &simple_foam_case()?)?)
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            error_message(&body)?,
            "Invalid file format, only .zip files are allowed."
        );
        assert!(app.bin.invocations()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn archive_without_directories_is_not_a_case() -> Result<()> {
        let app = TestApp::new()?;
        let upload = zip_bytes(&[("controlDict", b"application simpleFoam;\n")])?;
        let (status, _, body) = app
            .send(multipart_request("file", Some("case.zip"), &upload)?)
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            error_message(&body)?,
            "No valid OpenFOAM case found in the zip file."
        );
        Ok(())
    }

    #[tokio::test]
    async fn garbage_zip_is_a_client_error() -> Result<()> {
        let app = TestApp::new()?;
        let (status, _, body) = app
            .send(multipart_request("file", Some("case.zip"), b"not a zip at all")?)
            .await?;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error_message(&body)?.starts_with("Invalid zip archive: "));
        assert_eq!(app.workspaces()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn solver_failure_is_a_server_error() -> Result<()> {
        let app = TestApp::new()?;
        app.bin.install_failure("simpleFoam", 1)?;
        let (status, _, body) = app
            .send(multipart_request("file", Some("case.zip"), &simple_foam_case()?)?)
            .await?;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = error_message(&body)?;
        assert!(message.starts_with("Error running OpenFOAM command: Command 'simpleFoam -case "));
        assert!(message.contains("returned non-zero exit status 1."));
        assert_eq!(app.workspaces()?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_uploads_are_refused() -> Result<()> {
        let app = TestApp::with_limit(1024)?;
        let padding = vec![0_u8; 4096];
        let (status, _, _) = app
            .send(multipart_request("file", Some("case.zip"), &padding)?)
            .await?;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(app.bin.invocations()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn health_and_metrics_are_served() -> Result<()> {
        let app = TestApp::new()?;
        let request = Request::builder().uri(ROUTE_HEALTH).body(Body::empty())?;
        let (status, _, body) = app.send(request).await?;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body)?;
        assert_eq!(value["status"], "ok");

        let request = Request::builder().uri(ROUTE_METRICS).body(Body::empty())?;
        let (status, _, body) = app.send(request).await?;
        assert_eq!(status, StatusCode::OK);
        let exposition = String::from_utf8(body)?;
        assert!(exposition.contains("http_requests_total"));
        assert!(exposition.contains("route=\"/health\""));
        Ok(())
    }

    #[tokio::test]
    async fn responses_carry_a_generated_request_id() -> Result<()> {
        let app = TestApp::new()?;
        let request = Request::builder().uri(ROUTE_HEALTH).body(Body::empty())?;
        let (status, headers, _) = app.send(request).await?;
        assert_eq!(status, StatusCode::OK);
        let request_id = headers
            .get(HEADER_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(!request_id.is_empty(), "x-request-id should be generated");
        Ok(())
    }

    #[tokio::test]
    async fn caller_request_id_is_echoed_back() -> Result<()> {
        let app = TestApp::new()?;
        let request = Request::builder()
            .uri(ROUTE_HEALTH)
            .header(HEADER_REQUEST_ID, "case-42")
            .body(Body::empty())?;
        let (_, headers, _) = app.send(request).await?;
        assert_eq!(headers[HEADER_REQUEST_ID], "case-42");
        Ok(())
    }

    #[tokio::test]
    async fn serve_reports_an_occupied_port() -> Result<()> {
        let app = TestApp::new()?;
        let holder = TcpListener::bind("127.0.0.1:0").await?;
        let addr = holder.local_addr()?;

        let err = app.server.serve(addr).await.expect_err("port already bound");

        assert!(matches!(err, ApiServerError::Bind { addr: failed, .. } if failed == addr));
        assert!(err.is_address_in_use());
        Ok(())
    }
}
