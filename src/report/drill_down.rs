//! Drill-down resolver
//!
//! Rebuilds the filter behind one aggregate cell and returns the records it
//! selects. The filter comes from the same [`predicate::build`] call the
//! engine made, with the cell's keys added, so for count metrics `total`
//! equals the cell value.
//!
//! Distinct-parent metrics (`testRunCount`, execution `testCaseCount`) first
//! collect the parent ids the cell's executions reference, then page through
//! those parents.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, warn};

use super::dimension::{self, DimensionId, ValueShape};
use super::engine::{EngineConfig, QueryRunner, ReportEngine};
use super::group_key::GroupKey;
use super::metric::{self, MetricKind, MetricSource, MetricSpec};
use super::{predicate, AggregateRequest, ReportMode, ReportType, Scope};
use crate::error::ReportError;
use crate::metrics;
use crate::store::{
    Aggregate, Attr, FieldPath, GroupQuery, PageRequest, Predicate, Record, ReportStore, Value,
};
use crate::types::Id;

/// The aggregate cell being drilled into
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillDownContext {
    /// Metric of the cell
    #[serde(default)]
    pub metric_id: Option<String>,
    /// Report the cell came from
    #[serde(default)]
    pub report_type: Option<String>,
    /// Scoping mode; overrides the `cross-project-` prefix when present
    #[serde(default)]
    pub mode: Option<ReportMode>,
    /// Project of a project-scoped report
    #[serde(default)]
    pub project_id: Option<Id>,
    /// Project restriction of a cross-project report
    #[serde(default)]
    pub project_ids: Option<Vec<Id>>,
    /// Dimension id to the key the row carried
    #[serde(default)]
    pub dimensions: BTreeMap<String, Json>,
    /// Inclusive lower date bound of the report
    #[serde(default)]
    pub start_date: Option<String>,
    /// Inclusive upper date bound of the report
    #[serde(default)]
    pub end_date: Option<String>,
    /// Value the caller was shown, used only for consistency logging
    #[serde(default)]
    pub metric_value: Option<f64>,
}

impl DrillDownContext {
    /// Report type of the cell, with `mode` taking precedence over the id prefix
    pub fn report(&self) -> Result<ReportType, ReportError> {
        let id = self
            .report_type
            .as_deref()
            .ok_or_else(|| ReportError::MissingField("context.reportType".into()))?;
        let mut report = ReportType::parse(id)?;
        if let Some(mode) = self.mode {
            report.mode = mode;
        }
        Ok(report)
    }
}

/// Drill-down request body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillDownRequest {
    /// Cell context
    pub context: DrillDownContext,
    /// Records to skip
    #[serde(default)]
    pub offset: usize,
    /// Page size; the configured default when absent
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One category of a rate breakdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownEntry {
    /// Category key
    pub key: GroupKey,
    /// Records in the category
    pub count: u64,
}

/// Secondary aggregates of a rate cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillDownAggregates {
    /// Dimension the total is broken down by
    pub dimension: &'static str,
    /// Per-category counts; they sum to `total`
    pub breakdown: Vec<BreakdownEntry>,
    /// Records in the rate's numerator
    pub numerator: u64,
    /// Rate re-derived from `numerator / total`
    pub rate: f64,
}

/// Drill-down result page
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillDownResponse {
    /// Hydrated records, canonical timestamp descending
    pub data: Vec<Record>,
    /// Records matching the cell
    pub total: u64,
    /// More records after this page
    pub has_more: bool,
    /// Rate breakdown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregates: Option<DrillDownAggregates>,
}

impl DrillDownResponse {
    fn empty() -> Self {
        Self {
            data: Vec::new(),
            total: 0,
            has_more: false,
            aggregates: None,
        }
    }
}

/// Resolved drill-down target
struct Target {
    report: ReportType,
    metric: MetricSpec,
    filter: Predicate,
}

/// Serves drill-down requests
#[derive(Clone)]
pub struct DrillDownResolver {
    runner: QueryRunner,
    config: EngineConfig,
}

impl ReportEngine {
    /// Resolver sharing this engine's store and limits
    pub fn resolver(&self) -> DrillDownResolver {
        DrillDownResolver {
            runner: self.runner.clone(),
            config: self.config.clone(),
        }
    }
}

impl DrillDownResolver {
    /// Create a resolver over a store
    pub fn new(store: Arc<dyn ReportStore>, config: EngineConfig) -> Self {
        Self {
            runner: QueryRunner::new(store, config.query_timeout),
            config,
        }
    }

    fn target(&self, context: &DrillDownContext) -> Result<Target, ReportError> {
        let report = context.report()?;
        let metric_id = context
            .metric_id
            .as_deref()
            .ok_or_else(|| ReportError::MissingField("context.metricId".into()))?;

        let metric = metric::resolve_metric(report, metric_id)?;
        if !metric.supports_drill_down {
            return Err(ReportError::DrillDownUnsupported(metric_id.to_string()));
        }

        let mut cell = Vec::with_capacity(context.dimensions.len());
        for (id, value) in &context.dimensions {
            let spec = dimension::resolve_dimension(report, id)?;
            if !metric.applies_to(&[spec.id]) {
                return Err(ReportError::invalid(
                    format!("dimensions.{}", id),
                    format!("metric {} does not apply to dimension {}", metric_id, id),
                ));
            }
            cell.push((spec.id, GroupKey::from_json(spec, value)?));
        }

        let scope = Scope::resolve(
            report,
            context.project_id,
            context.project_ids.as_deref(),
            context.start_date.as_deref(),
            context.end_date.as_deref(),
        )?;
        let filter = predicate::build(&metric, &scope, &cell)?;

        Ok(Target {
            report,
            metric,
            filter,
        })
    }

    /// Resolve one drill-down page
    pub async fn resolve(&self, request: &DrillDownRequest) -> Result<DrillDownResponse, ReportError> {
        let target = self.target(&request.context)?;
        let limit = match request.limit {
            Some(0) => return Err(ReportError::invalid("limit", "must be positive")),
            Some(limit) => limit.min(self.config.max_page_size),
            None => self.config.default_page_size,
        };
        let offset = request.offset;
        let metric = &target.metric;
        let entity = metric.grouping_entity();

        debug!(
            report_type = %target.report,
            metric = %metric.id,
            offset,
            limit,
            "Resolving drill-down"
        );

        let (total, data) = match metric.source {
            MetricSource::Direct(_) => {
                let order_by = metric
                    .canonical_timestamp()
                    .unwrap_or(FieldPath::attr(Attr::CreatedAt));
                let page = PageRequest {
                    entity,
                    filter: target.filter.clone(),
                    order_by,
                    offset,
                    limit,
                };
                tokio::try_join!(
                    self.runner.count(entity, &target.filter),
                    self.runner.fetch_page(&page)
                )?
            }
            MetricSource::DistinctParent { child, key, parent } => {
                let ids = self.runner.distinct(child, &target.filter, &key).await?;
                if ids.is_empty() {
                    return Ok(DrillDownResponse::empty());
                }
                let total = ids.len() as u64;
                let page = PageRequest {
                    entity: parent,
                    filter: Predicate::In(FieldPath::attr(Attr::Id), ids),
                    order_by: FieldPath::attr(Attr::CreatedAt),
                    offset,
                    limit,
                };
                (total, self.runner.fetch_page(&page).await?)
            }
        };

        let aggregates = match (metric.kind, metric.breakdown) {
            (MetricKind::Rate, Some(dim)) if total > 0 => {
                Some(self.breakdown(metric, dim, &target.filter, total).await?)
            }
            _ => None,
        };

        self.check_consistency(&target, &request.context, total, aggregates.as_ref());

        let has_more = (offset as u64).saturating_add(data.len() as u64) < total;
        Ok(DrillDownResponse {
            data,
            total,
            has_more,
            aggregates,
        })
    }

    async fn breakdown(
        &self,
        metric: &MetricSpec,
        dim: DimensionId,
        filter: &Predicate,
        total: u64,
    ) -> Result<DrillDownAggregates, ReportError> {
        let entity = metric.grouping_entity();
        let spec = dim.spec();
        let expr = spec
            .group_expr(entity)
            .ok_or_else(|| ReportError::UnsupportedDimension {
                dimension: dim.as_str().to_string(),
                report_type: entity.name().to_string(),
            })?;
        let query = GroupQuery {
            entity,
            filter: filter.clone(),
            keys: vec![expr],
            aggregate: Aggregate::Count,
        };
        let numerator_filter = predicate::numerator(metric, filter)
            .ok_or_else(|| ReportError::invalid("metricId", "rate has no numerator"))?;

        let (groups, numerator) = tokio::try_join!(
            self.runner.group_by(&query),
            self.runner.count(entity, &numerator_filter)
        )?;

        let labels = match spec.shape {
            ValueShape::Entity(source) => {
                let ids: Vec<Id> = groups
                    .iter()
                    .filter_map(|g| g.keys.first().and_then(|k| k.as_ref()).and_then(Value::as_id))
                    .collect();
                self.runner.labels(source, &ids).await?
            }
            _ => Default::default(),
        };

        let breakdown = groups
            .iter()
            .map(|g| BreakdownEntry {
                key: GroupKey::from_value(
                    spec,
                    "createdAt",
                    g.keys.first().and_then(|k| k.as_ref()),
                    &labels,
                ),
                count: g.value as u64,
            })
            .collect();

        Ok(DrillDownAggregates {
            dimension: dim.as_str(),
            breakdown,
            numerator,
            rate: metric::rate(numerator, total),
        })
    }

    fn check_consistency(
        &self,
        target: &Target,
        context: &DrillDownContext,
        total: u64,
        aggregates: Option<&DrillDownAggregates>,
    ) {
        let shown = match context.metric_value {
            Some(v) => v,
            None => return,
        };
        let resolved = match (target.metric.count_validatable, aggregates) {
            (true, _) => total as f64,
            (false, Some(agg)) => agg.rate,
            (false, None) => return,
        };
        if (resolved - shown).abs() > 0.005 {
            warn!(
                report_type = %target.report,
                metric = %target.metric.id,
                shown,
                resolved,
                "Drill-down does not reproduce the aggregate value"
            );
            metrics::record_drill_down_mismatch(
                &target.report.to_string(),
                target.metric.id.as_str(),
            );
        }
    }
}

/// Context for one cell of an aggregate row, as a client would send it back
///
/// Project and date scope are copied from the request that produced the row.
pub fn context_for_row(
    report: ReportType,
    request: &AggregateRequest,
    metric: super::MetricId,
    row: &super::Row,
) -> DrillDownContext {
    DrillDownContext {
        metric_id: Some(metric.as_str().to_string()),
        report_type: Some(report.to_string()),
        mode: Some(report.mode),
        project_id: request.project_id,
        project_ids: request.project_ids.clone(),
        dimensions: row
            .keys
            .iter()
            .map(|(dim, key)| {
                (
                    dim.as_str().to_string(),
                    serde_json::to_value(key).unwrap_or(Json::Null),
                )
            })
            .collect(),
        start_date: request.start_date.clone(),
        end_date: request.end_date.clone(),
        metric_value: row.metric(metric),
    }
}
