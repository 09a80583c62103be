//! Shared HTTP constants (headers, routes, fixed client-facing messages).

pub(crate) const HEADER_REQUEST_ID: &str = "x-request-id";

pub(crate) const ROUTE_UPLOAD: &str = "/upload";
pub(crate) const ROUTE_HEALTH: &str = "/health";
pub(crate) const ROUTE_METRICS: &str = "/metrics";

pub(crate) const UPLOAD_FIELD: &str = "file";
pub(crate) const ALLOWED_SUFFIX: &str = ".zip";
pub(crate) const RESULTS_FILENAME: &str = "results.zip";
pub(crate) const ZIP_CONTENT_TYPE: &str = "application/zip";

pub(crate) const MSG_NO_FILE_PART: &str = "No file part";
pub(crate) const MSG_NO_SELECTED_FILE: &str = "No selected file";
pub(crate) const MSG_INVALID_FORMAT: &str = "Invalid file format, only .zip files are allowed.";
pub(crate) const MSG_NO_CASE_FOUND: &str = "No valid OpenFOAM case found in the zip file.";
pub(crate) const MSG_NO_SOLVER: &str = "No solver application found in system/controlDict.";
pub(crate) const MSG_INVALID_ARCHIVE_PREFIX: &str = "Invalid zip archive";
pub(crate) const MSG_TOOL_FAILURE_PREFIX: &str = "Error running OpenFOAM command";
pub(crate) const MSG_UNEXPECTED_PREFIX: &str = "Unexpected error";
