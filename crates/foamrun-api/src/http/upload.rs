//! `POST /upload`: run an uploaded case and stream back its results.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, State, multipart::MultipartRejection},
    http::{
        StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::Response,
};
use tracing::{error, info, warn};

use crate::http::constants::{
    ALLOWED_SUFFIX, MSG_INVALID_FORMAT, MSG_NO_FILE_PART, MSG_NO_SELECTED_FILE, RESULTS_FILENAME,
    UPLOAD_FIELD, ZIP_CONTENT_TYPE,
};
use crate::http::errors::ApiError;
use crate::state::ApiState;

pub(crate) async fn upload_case(
    State(state): State<Arc<ApiState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart.map_err(|rejection| {
        warn!(error = %rejection, "upload is not a multipart form");
        ApiError::bad_request(MSG_NO_FILE_PART)
    })?;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "malformed multipart body");
        ApiError::new(err.status(), err.body_text())
    })? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        validate_file_name(&file_name)?;

        let bytes = field.bytes().await.map_err(|err| {
            warn!(error = %err, "failed to read uploaded file");
            ApiError::new(err.status(), err.body_text())
        })?;
        info!(file_name = %file_name, upload_bytes = bytes.len(), "case upload received");
        return run_case(&state, bytes).await;
    }

    warn!("upload has no file part");
    Err(ApiError::bad_request(MSG_NO_FILE_PART))
}

fn validate_file_name(file_name: &str) -> Result<(), ApiError> {
    if file_name.is_empty() {
        warn!("upload has an empty file name");
        return Err(ApiError::bad_request(MSG_NO_SELECTED_FILE));
    }
    if !file_name.ends_with(ALLOWED_SUFFIX) {
        warn!(file_name = %file_name, "upload is not a zip file");
        return Err(ApiError::bad_request(MSG_INVALID_FORMAT));
    }
    Ok(())
}

async fn run_case(state: &ApiState, upload: Bytes) -> Result<Response, ApiError> {
    let archive = state
        .runner
        .run(upload)
        .await
        .map_err(|err| ApiError::from_runner(&err))?;
    let len = archive.len();

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, ZIP_CONTENT_TYPE)
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{RESULTS_FILENAME}\""),
        )
        .header(CONTENT_LENGTH, len)
        .body(Body::from_stream(archive.into_stream()))
        .map_err(|err| {
            error!(error = %err, "failed to build results response");
            ApiError::internal("failed to build results response")
        })
}
