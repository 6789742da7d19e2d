//! HTTP boundary
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics
//! - `GET /api/reports/{reportType}?projectId=` - Dimensions and metrics of a report
//! - `POST /api/reports/{reportType}` - Aggregate rows
//! - `POST /api/reports/drill-down` - Records behind one aggregate cell
//!
//! Errors are returned as `{"error": "..."}` with the status of the
//! underlying [`crate::error::ReportError`].

pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::IdentityProvider;
use crate::report::{DrillDownResolver, ReportEngine};

/// Shared handler state
pub struct AppState {
    /// Aggregation engine
    pub engine: ReportEngine,
    /// Drill-down resolver over the same store
    pub resolver: DrillDownResolver,
    /// Caller lookup
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    /// State whose resolver shares the engine's store and limits
    pub fn new(engine: ReportEngine, identity: Arc<dyn IdentityProvider>) -> Self {
        let resolver = engine.resolver();
        Self {
            engine,
            resolver,
            identity,
        }
    }
}

/// Build CORS layer from configuration
fn build_cors_layer(cors_origins: &[String]) -> CorsLayer {
    if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        // static segment wins over `{report_type}`
        .route("/api/reports/drill-down", post(handlers::drill_down))
        .route(
            "/api/reports/{report_type}",
            get(handlers::describe_report).post(handlers::aggregate_report),
        )
        .with_state(state)
        .layer(build_cors_layer(cors_origins))
}
