//! Report aggregation and drill-down
//!
//! ```text
//!   AggregateRequest ──▶ ReportEngine ──┐
//!                          │            │  predicate::build (shared)
//!                          ▼            ▼
//!                 dimension / metric registries ──▶ ReportStore
//!                          ▲            ▲
//!   DrillDownRequest ──▶ DrillDownResolver
//! ```
//!
//! Both the engine and the resolver get their filters from
//! [`predicate::build`], so a drill-down into any count cell selects exactly
//! the records the engine counted for that cell.

pub mod conformance;
pub mod dimension;
pub mod drill_down;
pub mod engine;
pub mod group_key;
pub mod metric;
pub mod predicate;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::store::Entity;
use crate::types::Id;

pub use dimension::{DimensionId, DimensionSpec, ValueShape};
pub use drill_down::{DrillDownContext, DrillDownRequest, DrillDownResolver, DrillDownResponse};
pub use engine::{EngineConfig, ReportDescription, ReportEngine, Row};
pub use group_key::GroupKey;
pub use metric::{MetricId, MetricKind, MetricSpec};

const CROSS_PROJECT_PREFIX: &str = "cross-project-";

// ============================================================================
// Report Types
// ============================================================================

/// Report families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    /// Execution results
    TestExecution,
    /// Repository case statistics
    RepositoryStats,
    /// Exploratory sessions
    SessionAnalysis,
    /// Issues
    IssueTracking,
}

impl ReportKind {
    /// All report families
    pub const ALL: [ReportKind; 4] = [
        ReportKind::TestExecution,
        ReportKind::RepositoryStats,
        ReportKind::SessionAnalysis,
        ReportKind::IssueTracking,
    ];

    /// Stable id
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::TestExecution => "test-execution",
            ReportKind::RepositoryStats => "repository-stats",
            ReportKind::SessionAnalysis => "session-analysis",
            ReportKind::IssueTracking => "issue-tracking",
        }
    }

    /// Entity the report's dimensions naturally live on
    pub fn entity(&self) -> Entity {
        match self {
            ReportKind::TestExecution => Entity::Execution,
            ReportKind::RepositoryStats => Entity::Case,
            ReportKind::SessionAnalysis => Entity::Session,
            ReportKind::IssueTracking => Entity::Issue,
        }
    }

    fn parse(id: &str) -> Option<Self> {
        ReportKind::ALL.into_iter().find(|k| k.as_str() == id)
    }
}

/// Whether a report is scoped to one project or spans projects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportMode {
    /// Single project, `projectId` required
    Project,
    /// Any number of projects, admin only
    CrossProject,
}

/// A report id such as `test-execution` or `cross-project-issue-tracking`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReportType {
    /// Report family
    pub kind: ReportKind,
    /// Scoping mode
    pub mode: ReportMode,
}

impl ReportType {
    /// Project-scoped report
    pub fn project(kind: ReportKind) -> Self {
        Self {
            kind,
            mode: ReportMode::Project,
        }
    }

    /// Cross-project report
    pub fn cross_project(kind: ReportKind) -> Self {
        Self {
            kind,
            mode: ReportMode::CrossProject,
        }
    }

    /// Parse a report id; unknown ids are a validation error
    pub fn parse(id: &str) -> Result<Self, ReportError> {
        let (mode, base) = match id.strip_prefix(CROSS_PROJECT_PREFIX) {
            Some(rest) => (ReportMode::CrossProject, rest),
            None => (ReportMode::Project, id),
        };
        ReportKind::parse(base)
            .map(|kind| Self { kind, mode })
            .ok_or_else(|| ReportError::UnsupportedReportType(id.to_string()))
    }

    /// Every report type, project variants first
    pub fn all() -> impl Iterator<Item = ReportType> {
        ReportKind::ALL
            .into_iter()
            .map(ReportType::project)
            .chain(ReportKind::ALL.into_iter().map(ReportType::cross_project))
    }

    /// Entity the report's dimensions naturally live on
    pub fn entity(&self) -> Entity {
        self.kind.entity()
    }

    /// Whether the report spans projects
    pub fn is_cross_project(&self) -> bool {
        self.mode == ReportMode::CrossProject
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_cross_project() {
            f.write_str(CROSS_PROJECT_PREFIX)?;
        }
        f.write_str(self.kind.as_str())
    }
}

impl FromStr for ReportType {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportType::parse(s)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Aggregate request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRequest {
    /// Project for project-scoped reports
    #[serde(default)]
    pub project_id: Option<Id>,
    /// Project restriction for cross-project reports
    #[serde(default)]
    pub project_ids: Option<Vec<Id>>,
    /// Dimension ids, in output order
    #[serde(default)]
    pub dimensions: Vec<String>,
    /// Metric ids
    #[serde(default)]
    pub metrics: Vec<String>,
    /// Inclusive lower date bound
    #[serde(default)]
    pub start_date: Option<String>,
    /// Inclusive upper date bound
    #[serde(default)]
    pub end_date: Option<String>,
}

/// Resolved project and date scope shared by aggregation and drill-down
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    /// Projects the report is restricted to; `None` means all
    pub projects: Option<Vec<Id>>,
    /// Inclusive lower bound
    pub start: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub end: Option<DateTime<Utc>>,
}

impl Scope {
    /// Resolve the scope of a request against its report mode
    pub fn resolve(
        report: ReportType,
        project_id: Option<Id>,
        project_ids: Option<&[Id]>,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Self, ReportError> {
        let projects = match report.mode {
            ReportMode::Project => {
                let id = project_id.ok_or_else(|| ReportError::MissingField("projectId".into()))?;
                Some(vec![id])
            }
            ReportMode::CrossProject => match (project_ids, project_id) {
                (Some(ids), _) if !ids.is_empty() => Some(ids.to_vec()),
                (_, Some(id)) => Some(vec![id]),
                _ => None,
            },
        };

        let start = start_date.map(|s| parse_bound("startDate", s)).transpose()?;
        let end = end_date
            .map(|s| parse_bound("endDate", s).and_then(exclusive_end))
            .transpose()?;

        if let (Some(start), Some(end)) = (start, end) {
            if end <= start {
                return Err(ReportError::invalid(
                    "endDate",
                    "endDate must not be before startDate",
                ));
            }
        }

        Ok(Self {
            projects,
            start,
            end,
        })
    }
}

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC)
pub(crate) fn parse_bound(field: &str, value: &str) -> Result<DateTime<Utc>, ReportError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ReportError::invalid(field, format!("not a date: {}", value)))
}

/// Turn an inclusive end bound into an exclusive one
///
/// A bound at midnight covers that whole UTC day.
fn exclusive_end(end: DateTime<Utc>) -> Result<DateTime<Utc>, ReportError> {
    let step = if crate::store::truncate_to_day(end) == end {
        Duration::days(1)
    } else {
        Duration::milliseconds(1)
    };
    end.checked_add_signed(step)
        .ok_or_else(|| ReportError::invalid("endDate", "date out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_report_type_parse_and_display() {
        let rt = ReportType::parse("cross-project-test-execution").unwrap();
        assert_eq!(rt.kind, ReportKind::TestExecution);
        assert!(rt.is_cross_project());
        assert_eq!(rt.to_string(), "cross-project-test-execution");

        let rt: ReportType = "issue-tracking".parse().unwrap();
        assert_eq!(rt.mode, ReportMode::Project);

        let err = ReportType::parse("cross-project-bogus").unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(ReportType::all().count(), 8);
    }

    #[test]
    fn test_scope_requires_project_for_project_reports() {
        let report = ReportType::project(ReportKind::TestExecution);
        let err = Scope::resolve(report, None, None, None, None).unwrap_err();
        assert!(matches!(err, ReportError::MissingField(ref f) if f == "projectId"));

        let cross = ReportType::cross_project(ReportKind::TestExecution);
        let scope = Scope::resolve(cross, None, Some(&[1, 2]), None, None).unwrap();
        assert_eq!(scope.projects, Some(vec![1, 2]));
        let scope = Scope::resolve(cross, None, None, None, None).unwrap();
        assert_eq!(scope.projects, None);
    }

    #[test]
    fn test_end_date_at_midnight_covers_the_day() {
        let report = ReportType::project(ReportKind::IssueTracking);
        let scope =
            Scope::resolve(report, Some(1), None, Some("2024-03-01"), Some("2024-03-05")).unwrap();
        assert_eq!(scope.start, Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        assert_eq!(scope.end, Some(Utc.with_ymd_and_hms(2024, 3, 6, 0, 0, 0).unwrap()));

        let scope = Scope::resolve(
            report,
            Some(1),
            None,
            None,
            Some("2024-03-05T12:00:00Z"),
        )
        .unwrap();
        assert_eq!(
            scope.end,
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap() + Duration::milliseconds(1))
        );
    }

    #[test]
    fn test_invalid_dates() {
        let report = ReportType::project(ReportKind::IssueTracking);
        assert!(Scope::resolve(report, Some(1), None, Some("yesterday"), None).is_err());
        assert!(
            Scope::resolve(report, Some(1), None, Some("2024-03-05"), Some("2024-03-01")).is_err()
        );

        let err = Scope::resolve(report, Some(1), None, None, Some("+262142-12-31")).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("out of range"));
    }
}
