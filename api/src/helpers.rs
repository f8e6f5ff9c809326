//! Some helper functions for the API.

use rocket::data::{Data, Limits, ToByteUnit};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::Response;
use rocket::response::status as rocket_status;
use rocket::serde::json::Json;
use rocket::serde::{Deserialize, Serialize};
use stepboard_common::{Error, MergeError};
use std::time::Instant;

/// Body size accepted for uploads when `limits.csv` is not configured.
const DEFAULT_CSV_LIMIT_MIB: u64 = 2;

/// Logs method, path, status and latency for every request.
#[derive(Clone, Copy)]
pub struct RequestTimingFairing;

#[rocket::async_trait]
impl Fairing for RequestTimingFairing {
    fn info(&self) -> Info {
        Info {
            name: "Request timing",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _data: &mut rocket::Data<'_>) {
        request.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let started_at = request.local_cache(Instant::now);
        let elapsed = started_at.elapsed();
        let status = response.status().code;

        tracing::info!(
            method = %request.method(),
            path = %request.uri(),
            status = status,
            elapsed_ms = elapsed.as_millis(),
            "Request Completed"
        );
    }
}

/// The upload page is served from another origin.
#[derive(Clone, Copy)]
pub struct CorsFairing;

#[rocket::async_trait]
impl Fairing for CorsFairing {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", "*"));
        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "GET, POST, OPTIONS",
        ));
        response.set_header(Header::new("Access-Control-Allow-Headers", "*"));
        response.set_header(Header::new("Access-Control-Max-Age", "86400"));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "rocket::serde")]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    NotFound,
    BadRequest,
    Conflict,
    PayloadTooLarge,
    ServiceUnavailable,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct ApiErrorBody {
    pub error: ApiErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ApiErrorBody {
    fn new(error: ApiErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(error, ApiErrorKind::ServiceUnavailable);
        Self {
            error,
            message: message.into(),
            retryable,
        }
    }
}

pub type ApiError = rocket_status::Custom<Json<ApiErrorBody>>;
pub type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(status: Status, kind: ApiErrorKind, message: impl Into<String>) -> ApiError {
    rocket_status::Custom(status, Json(ApiErrorBody::new(kind, message)))
}

pub fn not_found_error(message: impl Into<String>) -> ApiError {
    api_error(Status::NotFound, ApiErrorKind::NotFound, message)
}

pub fn bad_request_error(message: impl Into<String>) -> ApiError {
    api_error(Status::BadRequest, ApiErrorKind::BadRequest, message)
}

pub fn payload_too_large_error(message: impl Into<String>) -> ApiError {
    api_error(Status::PayloadTooLarge, ApiErrorKind::PayloadTooLarge, message)
}

pub fn internal_error(message: impl Into<String>) -> ApiError {
    api_error(Status::InternalServerError, ApiErrorKind::Internal, message)
}

/// Map a core failure onto a status the caller can act on.
pub fn core_error(err: Error) -> ApiError {
    let message = err.to_string();
    match err {
        Error::Validation(_) => bad_request_error(message),
        Error::Merge(MergeError::MissingSubmissionData(_)) => {
            api_error(Status::Conflict, ApiErrorKind::Conflict, message)
        }
        e if e.is_retryable() => api_error(
            Status::ServiceUnavailable,
            ApiErrorKind::ServiceUnavailable,
            message,
        ),
        e => {
            tracing::error!(error = %e, "Leaderboard operation failed");
            internal_error(message)
        }
    }
}

/// Read a text body up to the configured `csv` limit.
pub async fn read_text_body(data: Data<'_>, limits: &Limits) -> Result<String, ApiError> {
    let limit = limits
        .get("csv")
        .unwrap_or_else(|| DEFAULT_CSV_LIMIT_MIB.mebibytes());
    let body = data
        .open(limit)
        .into_string()
        .await
        .map_err(|e| bad_request_error(format!("Could not read request body: {e}")))?;
    if !body.is_complete() {
        return Err(payload_too_large_error(format!(
            "Request body exceeds the {limit} limit"
        )));
    }
    Ok(body.into_inner())
}
