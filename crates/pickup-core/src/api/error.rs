//! Transport-level failures from the pickup backend.

use thiserror::Error;

/// A failed exchange with the pickup backend, classified by HTTP status.
///
/// Bodies are kept (truncated) because the backend puts its structured
/// rejections there; `ApiClient` re-reads them for scan and assignment calls.
#[derive(Error, Debug)]
pub enum ApiError {
    /// 403: the station's agent may not perform this action
    #[error("Backend refused the request for this station: {0}")]
    AccessDenied(String),

    /// 401: missing or revoked station token
    #[error("Station token rejected; check PICKUP_API_TOKEN")]
    Unauthorized,

    #[error("Record missing on the pickup backend: {0}")]
    NotFound(String),

    /// 422: the backend rejected the record or scan as submitted
    #[error("Backend rejected the submission: {0}")]
    Validation(String),

    #[error("Pickup backend is throttling this station; retries exhausted")]
    RateLimited,

    #[error("Pickup backend failed: {0}")]
    ServerError(String),

    #[error("Could not reach the pickup backend: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Unreadable reply from the pickup backend: {0}")]
    InvalidResponse(String),
}

/// Bodies longer than this are cut before they reach logs or the status line
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (cut, {} bytes in reply)", &body[..end], body.len())
        }
    }

    /// Classify a non-success reply from the backend.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let body = Self::truncate_body(body);
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::AccessDenied(body),
            404 => ApiError::NotFound(body),
            422 => ApiError::Validation(body),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(body),
            _ => ApiError::InvalidResponse(format!("unexpected status {}: {}", status, body)),
        }
    }

    /// Body carried by a 403 or 422, where the backend explains a refusal
    pub fn rejection_body(&self) -> Option<&str> {
        match self {
            ApiError::AccessDenied(body) | ApiError::Validation(body) => Some(body),
            _ => None,
        }
    }
}
