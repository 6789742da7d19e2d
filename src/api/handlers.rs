//! HTTP handlers
//!
//! Every report handler resolves the caller first, then the report type,
//! then authorizes. Failures are mapped through [`ApiError`] so the status
//! code always comes from [`ReportError::status_code`].

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::{debug, warn};

use super::types::{AggregateResponse, ApiError, DescribeParams, HealthResponse};
use super::AppState;
use crate::auth::{authorize, bearer_token, Identity};
use crate::error::ReportError;
use crate::metrics;
use crate::report::{
    AggregateRequest, DrillDownRequest, DrillDownResponse, ReportDescription, ReportType,
};

fn caller(state: &AppState, headers: &HeaderMap) -> Option<Identity> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    state.identity.identify(bearer_token(header))
}

fn outcome<T>(result: &Result<T, ReportError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) if e.is_validation() => "invalid",
        Err(ReportError::Unauthorized) => "unauthorized",
        Err(ReportError::Timeout(_)) => "timeout",
        Err(_) => "error",
    }
}

fn log_failure(operation: &str, report_type: &str, err: &ReportError) {
    if err.is_validation() || matches!(err, ReportError::Unauthorized) {
        debug!(operation, report_type, error = %err, "Rejected report request");
    } else {
        warn!(operation, report_type, error = %err, "Report request failed");
    }
}

// =============================================================================
// Health & Metrics
// =============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Prometheus metrics endpoint
pub async fn metrics() -> impl IntoResponse {
    match metrics::gather_metrics() {
        Ok(text) => (StatusCode::OK, [("content-type", "text/plain")], text),
        Err(e) => {
            warn!(error = %e, "Failed to gather metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e,
            )
        }
    }
}

// =============================================================================
// Reports
// =============================================================================

/// `GET /api/reports/{reportType}`: dimensions and metrics of a report
pub async fn describe_report(
    State(state): State<Arc<AppState>>,
    Path(report_type): Path<String>,
    headers: HeaderMap,
    params: Result<Query<DescribeParams>, QueryRejection>,
) -> Result<Json<ReportDescription>, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let identity = caller(&state, &headers);

    let report = ReportType::parse(&report_type);
    let parsed = report.as_ref().ok().copied();
    let result = report.and_then(|report| {
        authorize(identity.as_ref(), report)?;
        Ok(state.engine.describe(report, params.project_id.is_some()))
    });
    metrics::record_request("describe", parsed, outcome(&result));
    match result {
        Ok(description) => Ok(Json(description)),
        Err(e) => {
            log_failure("describe", &report_type, &e);
            Err(e.into())
        }
    }
}

/// `POST /api/reports/{reportType}`: grouped aggregate rows
pub async fn aggregate_report(
    State(state): State<Arc<AppState>>,
    Path(report_type): Path<String>,
    headers: HeaderMap,
    body: Result<Json<AggregateRequest>, JsonRejection>,
) -> Result<Json<AggregateResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let identity = caller(&state, &headers);

    let report = ReportType::parse(&report_type);
    let parsed = report.as_ref().ok().copied();
    let result = async {
        let report = report?;
        authorize(identity.as_ref(), report)?;
        let rows = state.engine.aggregate(report, &request).await?;
        metrics::record_rows(report, rows.len());
        Ok(rows)
    }
    .await;

    metrics::record_request("aggregate", parsed, outcome(&result));
    match result {
        Ok(results) => Ok(Json(AggregateResponse { results })),
        Err(e) => {
            log_failure("aggregate", &report_type, &e);
            Err(e.into())
        }
    }
}

/// `POST /api/reports/drill-down`: records behind one aggregate cell
pub async fn drill_down(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<DrillDownRequest>, JsonRejection>,
) -> Result<Json<DrillDownResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let identity = caller(&state, &headers);
    let report_type = request
        .context
        .report_type
        .clone()
        .unwrap_or_else(|| metrics::UNKNOWN_REPORT_TYPE.to_string());

    let report = request.context.report();
    let parsed = report.as_ref().ok().copied();
    let result = async {
        let report = report?;
        authorize(identity.as_ref(), report)?;
        state.resolver.resolve(&request).await
    }
    .await;

    metrics::record_request("drill_down", parsed, outcome(&result));
    match result {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            log_failure("drill_down", &report_type, &e);
            Err(e.into())
        }
    }
}
