//! Consistency checker
//!
//! Walks every report type over every single dimension and every pair of
//! dimensions. For each combination it aggregates once and drills into each
//! cell, then checks:
//!
//! - count metrics: drill-down `total` equals the cell value (null buckets
//!   included)
//! - rate metrics: the breakdown sums to `total` and re-derives the rate
//! - additive count metrics: single-dimension groups sum to the grand total
//! - date keys are midnight UTC and rows are chronological
//! - swapping a dimension pair yields the same rows
//!
//! An optional date window is applied to every aggregate and carried into
//! every drill-down. The test suite runs this against generated data, and the
//! server's `check-consistency` command runs it against a configured dataset.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::dimension::dimensions_for;
use super::drill_down::{context_for_row, DrillDownRequest, DrillDownResolver};
use super::engine::{ReportEngine, Row};
use super::metric::{metrics_for, spec_for, MetricKind, MetricSpec};
use super::{AggregateRequest, DimensionId, ReportType};
use crate::error::ReportError;
use crate::store::truncate_to_day;
use crate::types::Id;

/// Property a violation breaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    /// Drill-down total differs from the cell value
    CountMismatch,
    /// Rate breakdown does not reconcile
    Breakdown,
    /// Groups do not sum to the grand total
    Associativity,
    /// Date key not at midnight, or rows out of order
    DateTruncation,
    /// Swapping dimensions changed the rows
    OrderInvariance,
}

/// One failed check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Property broken
    pub kind: ViolationKind,
    /// Report id
    pub report_type: String,
    /// Metric id
    pub metric: String,
    /// Dimension combination
    pub dimensions: Vec<String>,
    /// What was expected and what was found
    pub detail: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} {} [{}]: {}",
            self.kind,
            self.report_type,
            self.metric,
            self.dimensions.join(", "),
            self.detail
        )
    }
}

/// Outcome of a checker run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConformanceReport {
    /// Checks performed
    pub checked: usize,
    /// Failed checks
    pub violations: Vec<Violation>,
}

impl ConformanceReport {
    /// No check failed
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }

    fn merge(&mut self, other: ConformanceReport) {
        self.checked += other.checked;
        self.violations.extend(other.violations);
    }
}

/// Runs the consistency checks through the public engine and resolver
pub struct ConformanceChecker {
    engine: ReportEngine,
    resolver: DrillDownResolver,
    start_date: Option<String>,
    end_date: Option<String>,
}

struct Combination<'a> {
    report: ReportType,
    scope: &'a AggregateRequest,
    dims: &'a [DimensionId],
    metrics: &'a [MetricSpec],
}

impl Combination<'_> {
    fn violation(&self, kind: ViolationKind, metric: &str, detail: String) -> Violation {
        Violation {
            kind,
            report_type: self.report.to_string(),
            metric: metric.to_string(),
            dimensions: self.dims.iter().map(|d| d.as_str().to_string()).collect(),
            detail,
        }
    }

    fn request(&self, dims: &[DimensionId]) -> AggregateRequest {
        AggregateRequest {
            dimensions: dims.iter().map(|d| d.as_str().to_string()).collect(),
            metrics: self.metrics.iter().map(|m| m.id.as_str().to_string()).collect(),
            ..self.scope.clone()
        }
    }
}

fn checked_metrics(report: ReportType) -> Vec<MetricSpec> {
    metrics_for(report.kind)
        .iter()
        .filter_map(|m| spec_for(report.kind, *m))
        .filter(|m| m.count_validatable || (m.kind == MetricKind::Rate && m.breakdown.is_some()))
        .collect()
}

/// Rows as comparable JSON, ignoring row order and key order
fn normalized(rows: &[Row]) -> Vec<String> {
    let mut out: Vec<String> = rows
        .iter()
        .map(|row| {
            let map: BTreeMap<String, serde_json::Value> = serde_json::to_value(row)
                .ok()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            serde_json::to_string(&map).unwrap_or_default()
        })
        .collect();
    out.sort();
    out
}

impl ConformanceChecker {
    /// Create a checker over an engine
    pub fn new(engine: ReportEngine) -> Self {
        let resolver = engine.resolver();
        Self {
            engine,
            resolver,
            start_date: None,
            end_date: None,
        }
    }

    /// Restrict every aggregate and drill-down to an inclusive date window
    pub fn with_date_range(mut self, start: Option<String>, end: Option<String>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    /// Check every report type: project reports once per project, cross-project
    /// reports across all projects
    pub async fn check_all(&self, projects: &[Id]) -> Result<ConformanceReport, ReportError> {
        let mut report = ConformanceReport::default();
        for rt in ReportType::all() {
            if rt.is_cross_project() {
                report.merge(self.check_report(rt, None).await?);
            } else {
                for project in projects {
                    report.merge(self.check_report(rt, Some(*project)).await?);
                }
            }
        }
        info!(
            checked = report.checked,
            violations = report.violations.len(),
            "Consistency check complete"
        );
        Ok(report)
    }

    /// Check one report type over all single dimensions and dimension pairs
    pub async fn check_report(
        &self,
        report: ReportType,
        project: Option<Id>,
    ) -> Result<ConformanceReport, ReportError> {
        let metrics = checked_metrics(report);
        let dims = dimensions_for(report.kind);
        let mut out = ConformanceReport::default();
        let scope = AggregateRequest {
            project_id: project,
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            ..AggregateRequest::default()
        };

        let grand = Combination {
            report,
            scope: &scope,
            dims: &[],
            metrics: &metrics,
        };
        let totals = self.engine.aggregate(report, &grand.request(&[])).await?;
        self.check_cells(&grand, &totals, &mut out).await?;

        for (i, a) in dims.iter().enumerate() {
            let single = [*a];
            let combo = Combination {
                report,
                scope: &scope,
                dims: &single,
                metrics: &metrics,
            };
            let rows = self.engine.aggregate(report, &combo.request(&single)).await?;
            self.check_cells(&combo, &rows, &mut out).await?;
            Self::check_dates(&combo, &rows, &mut out);
            Self::check_associativity(&combo, &rows, totals.first(), &mut out);

            for b in &dims[i + 1..] {
                let pair = [*a, *b];
                let combo = Combination {
                    report,
                    scope: &scope,
                    dims: &pair,
                    metrics: &metrics,
                };
                let rows = self.engine.aggregate(report, &combo.request(&pair)).await?;
                self.check_cells(&combo, &rows, &mut out).await?;
                Self::check_dates(&combo, &rows, &mut out);

                let swapped = self
                    .engine
                    .aggregate(report, &combo.request(&[*b, *a]))
                    .await?;
                out.checked += 1;
                if normalized(&rows) != normalized(&swapped) {
                    out.violations.push(combo.violation(
                        ViolationKind::OrderInvariance,
                        "*",
                        format!("{} rows vs {} rows after swap", rows.len(), swapped.len()),
                    ));
                }
            }
        }

        debug!(
            report_type = %report,
            checked = out.checked,
            violations = out.violations.len(),
            "Report checked"
        );
        Ok(out)
    }

    async fn check_cells(
        &self,
        combo: &Combination<'_>,
        rows: &[Row],
        out: &mut ConformanceReport,
    ) -> Result<(), ReportError> {
        for row in rows {
            for spec in combo.metrics {
                let value = match row.metric(spec.id) {
                    Some(v) => v,
                    None => continue,
                };
                let request = DrillDownRequest {
                    context: context_for_row(combo.report, combo.scope, spec.id, row),
                    offset: 0,
                    limit: Some(1),
                };
                let resp = self.resolver.resolve(&request).await?;
                out.checked += 1;

                if spec.count_validatable {
                    if resp.total as f64 != value {
                        let v = combo.violation(
                            ViolationKind::CountMismatch,
                            spec.id.as_str(),
                            format!("aggregate {} vs drill-down {}", value, resp.total),
                        );
                        warn!(violation = %v, "Consistency violation");
                        out.violations.push(v);
                    }
                    continue;
                }

                // rate cells
                match resp.aggregates {
                    Some(agg) => {
                        let sum: u64 = agg.breakdown.iter().map(|e| e.count).sum();
                        if sum != resp.total || agg.rate != value {
                            out.violations.push(combo.violation(
                                ViolationKind::Breakdown,
                                spec.id.as_str(),
                                format!(
                                    "breakdown {} / total {}, rate {} vs {}",
                                    sum, resp.total, agg.rate, value
                                ),
                            ));
                        }
                    }
                    None if value != 0.0 => out.violations.push(combo.violation(
                        ViolationKind::Breakdown,
                        spec.id.as_str(),
                        format!("rate {} without breakdown", value),
                    )),
                    None => {}
                }
            }
        }
        Ok(())
    }

    fn check_dates(combo: &Combination<'_>, rows: &[Row], out: &mut ConformanceReport) {
        if !combo.dims.contains(&DimensionId::Date) {
            return;
        }
        out.checked += 1;
        let days: Vec<_> = rows
            .iter()
            .filter_map(|r| r.key(DimensionId::Date).and_then(|k| k.day()))
            .collect();
        let truncated = days.iter().all(|d| truncate_to_day(*d) == *d);
        let ordered = days.windows(2).all(|w| w[0] <= w[1]);
        if days.len() != rows.len() || !truncated || !ordered {
            out.violations.push(combo.violation(
                ViolationKind::DateTruncation,
                "*",
                format!("truncated={} ordered={}", truncated, ordered),
            ));
        }
    }

    fn check_associativity(
        combo: &Combination<'_>,
        rows: &[Row],
        total: Option<&Row>,
        out: &mut ConformanceReport,
    ) {
        for spec in combo.metrics.iter().filter(|m| m.additive && m.count_validatable) {
            if !spec.applies_to(combo.dims) {
                continue;
            }
            let sum: f64 = rows.iter().filter_map(|r| r.metric(spec.id)).sum();
            let expected = total.and_then(|t| t.metric(spec.id)).unwrap_or(0.0);
            out.checked += 1;
            if sum != expected {
                out.violations.push(combo.violation(
                    ViolationKind::Associativity,
                    spec.id.as_str(),
                    format!("groups sum to {} but total is {}", sum, expected),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{EngineConfig, ReportKind};
    use crate::store::seed::demo_dataset;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_demo_dataset_is_consistent() {
        let store = Arc::new(InMemoryStore::new(demo_dataset()));
        let checker = ConformanceChecker::new(ReportEngine::new(store, EngineConfig::default()));
        let report = checker
            .check_report(ReportType::project(ReportKind::RepositoryStats), Some(1))
            .await
            .unwrap();
        assert!(report.checked > 0);
        assert!(report.is_consistent(), "{:?}", report.violations);
    }

    #[tokio::test]
    async fn test_date_window_reaches_drill_downs() {
        let store = Arc::new(InMemoryStore::new(demo_dataset()));
        let checker = ConformanceChecker::new(ReportEngine::new(store, EngineConfig::default()))
            .with_date_range(Some("2024-03-03".into()), Some("2024-03-07".into()));

        // testRunCount is distinct-parent; session results are dated through their session
        for (report, project) in [
            (ReportType::project(ReportKind::TestExecution), Some(1)),
            (ReportType::cross_project(ReportKind::SessionAnalysis), None),
        ] {
            let result = checker.check_report(report, project).await.unwrap();
            assert!(result.checked > 0);
            assert!(result.is_consistent(), "{}: {:?}", report, result.violations);
        }
    }

    #[test]
    fn test_checked_metrics_skip_averages_and_sums() {
        let metrics = checked_metrics(ReportType::project(ReportKind::TestExecution));
        let ids: Vec<_> = metrics.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["testResults", "passRate", "testRunCount", "testCaseCount"]);
    }
}
