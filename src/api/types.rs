//! Request and response bodies of the HTTP API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::report::Row;
use crate::types::Id;

// =============================================================================
// Requests
// =============================================================================

/// Query string of `GET /api/reports/{reportType}`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeParams {
    /// Scope the description to one project
    #[serde(default)]
    pub project_id: Option<Id>,
}

// =============================================================================
// Responses
// =============================================================================

/// Aggregate response
#[derive(Debug, Serialize)]
pub struct AggregateResponse {
    pub results: Vec<Row>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Set on 503 so clients know the same request may succeed later
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

/// Error surfaced by a handler
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub retryable: bool,
}

impl ApiError {
    /// Malformed request body or query string
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            retryable: false,
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        Self {
            status: StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
            retryable: self.retryable,
        };
        (self.status, Json(body)).into_response()
    }
}
