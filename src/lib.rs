//! Report engine - grouped aggregates and consistent drill-downs over test management data
//!
//! This library provides:
//! - Declarative dimension and metric registries per report type
//! - An aggregation engine grouping rows by any combination of dimensions
//! - A drill-down resolver whose record set always matches the aggregate cell
//! - A consistency checker walking every dimension combination
//! - An axum HTTP boundary with role-gated cross-project reports

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Caller identity and role gating
pub mod auth;

/// Data store interface, query model and the in-memory store
pub mod store;

/// Dimension and metric registries, aggregation and drill-down
pub mod report;

/// HTTP routes and handlers
pub mod api;

// Re-export main types
pub use error::{Error, ReportError, Result, StoreError};
pub use report::{
    AggregateRequest, DrillDownRequest, DrillDownResolver, DrillDownResponse, EngineConfig,
    ReportEngine, ReportType, Row,
};
pub use store::{InMemoryStore, ReportStore};
pub use types::Dataset;
