//! Metric registry
//!
//! Whether a metric can be drilled into, whether its drill-down total must
//! equal the cell value, and whether it sums across groups are properties of
//! each [`MetricSpec`]. Nothing downstream infers them from the metric id.

use std::fmt;

use serde::Serialize;

use super::dimension::DimensionId;
use super::{ReportKind, ReportType};
use crate::error::ReportError;
use crate::store::{Attr, Entity, FieldPath, Hop};

/// Metrics across all report types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricId {
    /// Number of execution results
    TestResults,
    /// Share of successful results, in percent
    PassRate,
    /// Mean elapsed seconds per result
    AverageElapsed,
    /// Total elapsed seconds
    TotalElapsed,
    /// Distinct runs with results
    TestRunCount,
    /// Distinct cases (executed cases, or repository cases)
    TestCaseCount,
    /// Cases with a non-manual source
    AutomatedCount,
    /// Share of automated cases, in percent
    AutomationRate,
    /// Total steps
    TotalSteps,
    /// Mean steps per case
    AverageSteps,
    /// Number of sessions
    SessionCount,
    /// Total session seconds
    TotalDuration,
    /// Mean session seconds
    AverageDuration,
    /// Number of session findings
    SessionResultCount,
    /// Number of issues
    IssueCount,
    /// Issues linked to an external tracker
    ExternalIssueCount,
}

impl MetricId {
    /// Every metric id
    pub const ALL: [MetricId; 16] = [
        MetricId::TestResults,
        MetricId::PassRate,
        MetricId::AverageElapsed,
        MetricId::TotalElapsed,
        MetricId::TestRunCount,
        MetricId::TestCaseCount,
        MetricId::AutomatedCount,
        MetricId::AutomationRate,
        MetricId::TotalSteps,
        MetricId::AverageSteps,
        MetricId::SessionCount,
        MetricId::TotalDuration,
        MetricId::AverageDuration,
        MetricId::SessionResultCount,
        MetricId::IssueCount,
        MetricId::ExternalIssueCount,
    ];

    /// Wire id
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricId::TestResults => "testResults",
            MetricId::PassRate => "passRate",
            MetricId::AverageElapsed => "averageElapsed",
            MetricId::TotalElapsed => "totalElapsed",
            MetricId::TestRunCount => "testRunCount",
            MetricId::TestCaseCount => "testCaseCount",
            MetricId::AutomatedCount => "automatedCount",
            MetricId::AutomationRate => "automationRate",
            MetricId::TotalSteps => "totalSteps",
            MetricId::AverageSteps => "averageSteps",
            MetricId::SessionCount => "sessionCount",
            MetricId::TotalDuration => "totalDuration",
            MetricId::AverageDuration => "averageDuration",
            MetricId::SessionResultCount => "sessionResultCount",
            MetricId::IssueCount => "issueCount",
            MetricId::ExternalIssueCount => "externalIssueCount",
        }
    }

    /// Parse a wire id
    pub fn parse(id: &str) -> Option<Self> {
        MetricId::ALL.into_iter().find(|m| m.as_str() == id)
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a metric value is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    /// Row count
    Count,
    /// `numerator / denominator * 100`, rounded to two decimals
    Rate,
    /// Sum of a numeric field
    Sum,
    /// Mean of a numeric field
    Average,
}

/// Which records a metric counts over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricSource {
    /// Rows of one entity
    Direct(Entity),
    /// Distinct parents referenced by rows of a child entity
    ///
    /// Grouping happens on the child (so child dimensions such as `status`
    /// apply); the value is the number of distinct `key` values, and the
    /// drill-down returns the parent records with those ids.
    DistinctParent {
        /// Entity grouped and filtered
        child: Entity,
        /// Parent id as seen from the child; null when the parent row is missing
        key: FieldPath,
        /// Entity returned by drill-down
        parent: Entity,
    },
}

/// Record filters a metric applies, shared with its drill-down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    /// Execution status is not the untested placeholder
    Tested,
    /// Execution status counts as a success
    Successful,
    /// Case source is not manual
    Automated,
    /// Issue has an external tracker key
    Linked,
}

/// Metric definition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSpec {
    /// Metric id
    pub id: MetricId,
    /// Display label
    pub label: &'static str,
    /// Computation kind
    pub kind: MetricKind,
    /// Records counted
    pub source: MetricSource,
    /// Filters applied to every record of the metric
    pub exclusion: &'static [Filter],
    /// Extra filter selecting the numerator of a rate
    pub numerator: Option<Filter>,
    /// Field summed or averaged
    pub value: Option<FieldPath>,
    /// Dimension a rate drill-down breaks its total down by
    pub breakdown: Option<DimensionId>,
    /// Dimensions this metric has no meaning for
    pub inapplicable_with: &'static [DimensionId],
    /// Drill-down returns the contributing records
    pub supports_drill_down: bool,
    /// Drill-down total equals the cell value
    pub count_validatable: bool,
    /// Sum over any single-dimension grouping equals the ungrouped value
    pub additive: bool,
}

impl MetricSpec {
    const fn count(id: MetricId, label: &'static str, entity: Entity) -> Self {
        Self {
            id,
            label,
            kind: MetricKind::Count,
            source: MetricSource::Direct(entity),
            exclusion: &[],
            numerator: None,
            value: None,
            breakdown: None,
            inapplicable_with: &[],
            supports_drill_down: true,
            count_validatable: true,
            additive: true,
        }
    }

    const fn distinct(
        id: MetricId,
        label: &'static str,
        child: Entity,
        key: FieldPath,
        parent: Entity,
    ) -> Self {
        Self {
            source: MetricSource::DistinctParent { child, key, parent },
            // one parent can contribute to several groups
            additive: false,
            ..Self::count(id, label, child)
        }
    }

    const fn rate(
        id: MetricId,
        label: &'static str,
        entity: Entity,
        numerator: Filter,
        breakdown: DimensionId,
    ) -> Self {
        Self {
            kind: MetricKind::Rate,
            numerator: Some(numerator),
            breakdown: Some(breakdown),
            count_validatable: false,
            additive: false,
            ..Self::count(id, label, entity)
        }
    }

    const fn sum(id: MetricId, label: &'static str, entity: Entity, value: FieldPath) -> Self {
        Self {
            kind: MetricKind::Sum,
            value: Some(value),
            count_validatable: false,
            ..Self::count(id, label, entity)
        }
    }

    const fn average(id: MetricId, label: &'static str, entity: Entity, value: FieldPath) -> Self {
        Self {
            kind: MetricKind::Average,
            value: Some(value),
            supports_drill_down: false,
            count_validatable: false,
            additive: false,
            ..Self::count(id, label, entity)
        }
    }

    const fn excluding(mut self, exclusion: &'static [Filter]) -> Self {
        self.exclusion = exclusion;
        self
    }

    const fn inapplicable(mut self, dims: &'static [DimensionId]) -> Self {
        self.inapplicable_with = dims;
        self
    }

    /// Entity the metric's group queries are rooted at
    pub fn grouping_entity(&self) -> Entity {
        match self.source {
            MetricSource::Direct(entity) => entity,
            MetricSource::DistinctParent { child, .. } => child,
        }
    }

    /// Entity a drill-down returns records of
    pub fn base_entity(&self) -> Entity {
        match self.source {
            MetricSource::Direct(entity) => entity,
            MetricSource::DistinctParent { parent, .. } => parent,
        }
    }

    /// Timestamp field date bounds and the date dimension use
    pub fn canonical_timestamp(&self) -> Option<FieldPath> {
        DimensionId::Date.spec().path(self.grouping_entity())
    }

    /// Whether the metric is meaningful for the requested dimensions
    pub fn applies_to(&self, dims: &[DimensionId]) -> bool {
        !dims.iter().any(|d| self.inapplicable_with.contains(d))
    }

    /// Descriptor returned by the report metadata endpoint
    pub fn descriptor(&self) -> MetricDescriptor {
        MetricDescriptor {
            id: self.id.as_str(),
            label: self.label,
            kind: self.kind,
            supports_drill_down: self.supports_drill_down,
            count_validatable: self.count_validatable,
        }
    }
}

/// Metric as listed by the metadata endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDescriptor {
    /// Wire id
    pub id: &'static str,
    /// Display label
    pub label: &'static str,
    /// Computation kind
    pub kind: MetricKind,
    /// Drill-down is available
    pub supports_drill_down: bool,
    /// Drill-down total equals the cell value
    pub count_validatable: bool,
}

const TESTED: &[Filter] = &[Filter::Tested];
// Resolved through the parent row, so a dangling link counts as null
const RUN_ID: FieldPath = FieldPath::via(&[Hop::RunCase, Hop::Run], Attr::Id);
const CASE_ID: FieldPath = FieldPath::via(&[Hop::RunCase, Hop::Case], Attr::Id);
const ELAPSED: FieldPath = FieldPath::attr(Attr::ElapsedSecs);
const STEPS: FieldPath = FieldPath::attr(Attr::StepCount);

/// Metrics declared for a report family, in display order
pub fn metrics_for(kind: ReportKind) -> &'static [MetricId] {
    use MetricId as M;
    match kind {
        ReportKind::TestExecution => &[
            M::TestResults,
            M::PassRate,
            M::AverageElapsed,
            M::TotalElapsed,
            M::TestRunCount,
            M::TestCaseCount,
        ],
        ReportKind::RepositoryStats => &[
            M::TestCaseCount,
            M::AutomatedCount,
            M::AutomationRate,
            M::TotalSteps,
            M::AverageSteps,
        ],
        ReportKind::SessionAnalysis => &[
            M::SessionCount,
            M::TotalDuration,
            M::AverageDuration,
            M::SessionResultCount,
        ],
        ReportKind::IssueTracking => &[M::IssueCount, M::ExternalIssueCount],
    }
}

/// Spec of `id` within a report family
pub fn spec_for(kind: ReportKind, id: MetricId) -> Option<MetricSpec> {
    use MetricId as M;
    let spec = match (kind, id) {
        (ReportKind::TestExecution, M::TestResults) => {
            MetricSpec::count(id, "Test Results", Entity::Execution).excluding(TESTED)
        }
        (ReportKind::TestExecution, M::PassRate) => MetricSpec::rate(
            id,
            "Pass Rate (%)",
            Entity::Execution,
            Filter::Successful,
            DimensionId::Status,
        )
        .excluding(TESTED),
        (ReportKind::TestExecution, M::AverageElapsed) => {
            MetricSpec::average(id, "Average Elapsed (s)", Entity::Execution, ELAPSED)
                .excluding(TESTED)
        }
        (ReportKind::TestExecution, M::TotalElapsed) => {
            MetricSpec::sum(id, "Total Elapsed (s)", Entity::Execution, ELAPSED).excluding(TESTED)
        }
        (ReportKind::TestExecution, M::TestRunCount) => {
            MetricSpec::distinct(id, "Test Runs", Entity::Execution, RUN_ID, Entity::Run)
                .excluding(TESTED)
        }
        (ReportKind::TestExecution, M::TestCaseCount) => {
            MetricSpec::distinct(id, "Test Cases", Entity::Execution, CASE_ID, Entity::Case)
                .excluding(TESTED)
                .inapplicable(&[DimensionId::Status])
        }

        (ReportKind::RepositoryStats, M::TestCaseCount) => {
            MetricSpec::count(id, "Test Cases", Entity::Case)
        }
        (ReportKind::RepositoryStats, M::AutomatedCount) => {
            MetricSpec::count(id, "Automated Cases", Entity::Case).excluding(&[Filter::Automated])
        }
        (ReportKind::RepositoryStats, M::AutomationRate) => MetricSpec::rate(
            id,
            "Automation Rate (%)",
            Entity::Case,
            Filter::Automated,
            DimensionId::Source,
        ),
        (ReportKind::RepositoryStats, M::TotalSteps) => {
            MetricSpec::sum(id, "Total Steps", Entity::Case, STEPS)
        }
        (ReportKind::RepositoryStats, M::AverageSteps) => {
            MetricSpec::average(id, "Average Steps", Entity::Case, STEPS)
        }

        (ReportKind::SessionAnalysis, M::SessionCount) => {
            MetricSpec::count(id, "Sessions", Entity::Session)
        }
        (ReportKind::SessionAnalysis, M::TotalDuration) => {
            MetricSpec::sum(id, "Total Duration (s)", Entity::Session, ELAPSED)
        }
        (ReportKind::SessionAnalysis, M::AverageDuration) => {
            MetricSpec::average(id, "Average Duration (s)", Entity::Session, ELAPSED)
        }
        (ReportKind::SessionAnalysis, M::SessionResultCount) => {
            MetricSpec::count(id, "Session Results", Entity::SessionResult)
        }

        (ReportKind::IssueTracking, M::IssueCount) => {
            MetricSpec::count(id, "Issues", Entity::Issue)
        }
        (ReportKind::IssueTracking, M::ExternalIssueCount) => {
            MetricSpec::count(id, "External Issues", Entity::Issue).excluding(&[Filter::Linked])
        }

        _ => return None,
    };
    Some(spec)
}

/// Resolve a metric id for a report type
pub fn resolve_metric(report: ReportType, id: &str) -> Result<MetricSpec, ReportError> {
    MetricId::parse(id)
        .and_then(|m| spec_for(report.kind, m))
        .ok_or_else(|| ReportError::UnsupportedMetric {
            metric: id.to_string(),
            report_type: report.to_string(),
        })
}

/// Metric descriptors for the metadata endpoint
pub fn describe(report: ReportType) -> Vec<MetricDescriptor> {
    metrics_for(report.kind)
        .iter()
        .filter_map(|m| spec_for(report.kind, *m))
        .map(|spec| spec.descriptor())
        .collect()
}

/// Round a percentage to the two decimals it is displayed with
pub fn round_rate(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `numerator / denominator` as a rounded percentage; zero when empty
pub fn rate(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        round_rate(numerator as f64 / denominator as f64 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::dimension::dimensions_for;

    #[test]
    fn test_every_declared_metric_has_a_spec() {
        for kind in ReportKind::ALL {
            for metric in metrics_for(kind) {
                let spec = spec_for(kind, *metric).expect("declared metric without spec");
                assert_eq!(spec.id, *metric);
                assert!(spec.canonical_timestamp().is_some());
            }
        }
    }

    #[test]
    fn test_metric_dimensions_are_reachable() {
        // every applicable dimension must resolve from the metric's grouping entity
        for kind in ReportKind::ALL {
            for metric in metrics_for(kind) {
                let spec = spec_for(kind, *metric).unwrap();
                for dim in dimensions_for(kind) {
                    if spec.applies_to(&[*dim]) {
                        assert!(
                            dim.spec().path(spec.grouping_entity()).is_some(),
                            "{} / {} unreachable",
                            metric,
                            dim
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_flags_follow_kind() {
        let report = ReportType::project(ReportKind::TestExecution);
        let pass = resolve_metric(report, "passRate").unwrap();
        assert!(pass.supports_drill_down);
        assert!(!pass.count_validatable);
        assert_eq!(pass.breakdown, Some(DimensionId::Status));

        let avg = resolve_metric(report, "averageElapsed").unwrap();
        assert!(!avg.supports_drill_down);

        let runs = resolve_metric(report, "testRunCount").unwrap();
        assert!(runs.count_validatable);
        assert!(!runs.additive);
        assert_eq!(runs.grouping_entity(), Entity::Execution);
        assert_eq!(runs.base_entity(), Entity::Run);

        let cases = resolve_metric(report, "testCaseCount").unwrap();
        assert!(!cases.applies_to(&[DimensionId::Date, DimensionId::Status]));
    }

    #[test]
    fn test_same_id_differs_per_report() {
        let exec = spec_for(ReportKind::TestExecution, MetricId::TestCaseCount).unwrap();
        let repo = spec_for(ReportKind::RepositoryStats, MetricId::TestCaseCount).unwrap();
        assert_eq!(exec.base_entity(), Entity::Case);
        assert_eq!(exec.grouping_entity(), Entity::Execution);
        assert_eq!(repo.grouping_entity(), Entity::Case);
        assert!(repo.additive);
    }

    #[test]
    fn test_unsupported_metric() {
        let report = ReportType::project(ReportKind::IssueTracking);
        let err = resolve_metric(report, "passRate").unwrap_err();
        assert!(err.to_string().contains("Unsupported metric"));
    }

    #[test]
    fn test_rate_rounding() {
        assert_eq!(rate(0, 0), 0.0);
        assert_eq!(rate(1, 3), 33.33);
        assert_eq!(rate(2, 3), 66.67);
        assert_eq!(rate(12, 12), 100.0);
    }
}
