// src/server/errors.rs
//
// HTTP error responses: every failure leaves as JSON `{ error, details? }`.

use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::error::{ConvertError, ErrorCategory};

pub type AppResult<T> = Result<T, AppError>;

/// Error as it leaves the HTTP boundary: a status plus a short message and
/// an optional human-readable cause.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub details: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

/// HTTP status for each error category.
pub fn status_for(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        ErrorCategory::ResourceLimit => StatusCode::GATEWAY_TIMEOUT,
        ErrorCategory::Transport => StatusCode::BAD_GATEWAY,
        ErrorCategory::UnsupportedInput
        | ErrorCategory::Codec
        | ErrorCategory::TargetUnreachable
        | ErrorCategory::InternalBug => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({ "error": self.message, "details": details }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ConvertError> for AppError {
    fn from(err: ConvertError) -> Self {
        let status = status_for(err.category());
        let message = err.summary().into_owned();
        let details = err.to_string();
        let app = Self::new(status, message.clone());
        if details == message {
            app
        } else {
            app.with_details(details)
        }
    }
}

/// Multipart stream failures. An over-limit body reads the same as an
/// oversized file so the client always sees the upload cap message.
pub fn from_multipart(err: MultipartError, max_upload_bytes: u64) -> ConvertError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ConvertError::file_too_large(max_upload_bytes.saturating_add(1), max_upload_bytes)
    } else {
        ConvertError::invalid_argument("multipart", "body", err.body_text())
    }
}

/// The request never became a multipart stream (wrong or missing content
/// type, bad boundary).
pub fn from_multipart_rejection(rejection: MultipartRejection) -> ConvertError {
    ConvertError::invalid_argument("Content-Type", "request", rejection.body_text())
}
