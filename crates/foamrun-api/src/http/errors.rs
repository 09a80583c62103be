//! Error responses in the `{"error": message}` shape clients expect.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use foamrun_runner::{ErrorClass, RunnerError};
use serde::Serialize;
use tracing::{error, warn};

use crate::http::constants::{
    MSG_INVALID_ARCHIVE_PREFIX, MSG_NO_CASE_FOUND, MSG_NO_SOLVER, MSG_TOOL_FAILURE_PREFIX,
    MSG_UNEXPECTED_PREFIX,
};

#[derive(Serialize)]
pub(crate) struct ErrorBody {
    pub(crate) error: String,
}

/// Status code plus the client-facing message.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Translate a pipeline failure and log it once.
    pub(crate) fn from_runner(err: &RunnerError) -> Self {
        let class = err.class();
        let detail = err.detail();
        let api_error = match err {
            RunnerError::NoCaseFound { .. } => Self::bad_request(MSG_NO_CASE_FOUND),
            RunnerError::MissingSolverIdentifier { .. } => Self::bad_request(MSG_NO_SOLVER),
            _ => match class {
                ErrorClass::InvalidArchive | ErrorClass::CaseStructure => {
                    Self::bad_request(format!("{MSG_INVALID_ARCHIVE_PREFIX}: {detail}"))
                }
                ErrorClass::ExternalTool => {
                    Self::internal(format!("{MSG_TOOL_FAILURE_PREFIX}: {detail}"))
                }
                ErrorClass::Unexpected => {
                    Self::internal(format!("{MSG_UNEXPECTED_PREFIX}: {detail}"))
                }
            },
        };

        if api_error.status.is_server_error() {
            error!(class = class.as_str(), error = %err, detail = %detail, "case run failed");
        } else {
            warn!(class = class.as_str(), error = %err, detail = %detail, "case rejected");
        }
        api_error
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}
