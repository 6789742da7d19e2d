//! Error types for the report engine

use std::time::Duration;
use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Report request or execution error
    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    /// Data store error outside of a report request
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised while serving an aggregate or drill-down request
///
/// Validation variants map to `400`, `Unauthorized` to `401`, `Timeout` to a
/// retryable `503`. A store failure is an internal error.
#[derive(Error, Debug)]
pub enum ReportError {
    /// Report type id is not known
    #[error("Unsupported report type: {0}")]
    UnsupportedReportType(String),

    /// Dimension id is not declared for the report type
    #[error("Unsupported dimension: {dimension} for report type {report_type}")]
    UnsupportedDimension {
        /// Offending dimension id
        dimension: String,
        /// Report type the dimension was requested for
        report_type: String,
    },

    /// Metric id is not declared for the report type
    #[error("Unsupported metric: {metric} for report type {report_type}")]
    UnsupportedMetric {
        /// Offending metric id
        metric: String,
        /// Report type the metric was requested for
        report_type: String,
    },

    /// No metric was requested
    #[error("At least one metric must be specified")]
    NoMetrics,

    /// A required request field is absent
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A request field is present but malformed
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Why the value was rejected
        message: String,
    },

    /// Metric has no record-level drill-down
    #[error("Metric {0} does not support drill-down")]
    DrillDownUnsupported(String),

    /// Caller is not allowed to run this report
    #[error("unauthorized")]
    Unauthorized,

    /// A data store call exceeded its deadline
    #[error("Data store call timed out after {0:?}")]
    Timeout(Duration),

    /// The data store failed
    #[error("Data store error: {0}")]
    Store(#[from] StoreError),
}

impl ReportError {
    /// Shorthand for an invalid field value
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ReportError::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// HTTP status code this error is surfaced with
    pub fn status_code(&self) -> u16 {
        match self {
            ReportError::UnsupportedReportType(_)
            | ReportError::UnsupportedDimension { .. }
            | ReportError::UnsupportedMetric { .. }
            | ReportError::NoMetrics
            | ReportError::MissingField(_)
            | ReportError::InvalidValue { .. }
            | ReportError::DrillDownUnsupported(_) => 400,
            ReportError::Unauthorized => 401,
            ReportError::Timeout(_) => 503,
            ReportError::Store(_) => 500,
        }
    }

    /// Whether the caller may retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReportError::Timeout(_))
    }

    /// Whether this is a caller-side validation failure
    pub fn is_validation(&self) -> bool {
        self.status_code() == 400
    }
}

/// Data access errors
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Field path cannot be resolved from the entity
    #[error("Field {field} is not reachable from {entity}")]
    UnreachableField {
        /// Base entity name
        entity: String,
        /// Field path description
        field: String,
    },

    /// Backend is unavailable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Query could not be executed
    #[error("Query failed: {0}")]
    QueryFailed(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ReportError::NoMetrics.status_code(), 400);
        assert_eq!(ReportError::Unauthorized.status_code(), 401);
        assert_eq!(
            ReportError::Timeout(Duration::from_millis(5)).status_code(),
            503
        );
        assert_eq!(
            ReportError::Store(StoreError::Unavailable("down".into())).status_code(),
            500
        );
    }

    #[test]
    fn test_messages() {
        let err = ReportError::UnsupportedDimension {
            dimension: "bogus".into(),
            report_type: "test-execution".into(),
        };
        assert!(err.to_string().contains("Unsupported dimension"));
        assert!(err.to_string().contains("bogus"));
        assert_eq!(
            ReportError::NoMetrics.to_string(),
            "At least one metric must be specified"
        );
        assert_eq!(ReportError::Unauthorized.to_string(), "unauthorized");
    }

    #[test]
    fn test_only_timeouts_are_retryable() {
        assert!(ReportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ReportError::NoMetrics.is_retryable());
        assert!(!ReportError::Store(StoreError::QueryFailed("x".into())).is_retryable());
    }
}
