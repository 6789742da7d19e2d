//! Aggregation engine
//!
//! Turns an aggregate request into one group query per metric (two for a
//! rate), runs them concurrently against the store, and merges the groups
//! by key.
//!
//! ```text
//! validate ─▶ plan ─▶ ┌ group_by(testResults) ┐
//!                     ├ group_by(passRate/num) ┤─▶ merge by key ─▶ label ─▶ sort
//!                     └ group_by(passRate/den) ┘
//! ```
//!
//! Sub-queries are bounded by `max_concurrent_queries` and every store call
//! carries `query_timeout`. A timeout fails the whole request.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::dimension::{self, DimensionDescriptor, DimensionId, DimensionSpec, ValueShape};
use super::group_key::{date_field, GroupKey};
use super::metric::{self, MetricDescriptor, MetricId, MetricKind, MetricSource, MetricSpec};
use super::{predicate, AggregateRequest, ReportType, Scope};
use crate::error::{ReportError, StoreError};
use crate::metrics;
use crate::store::{
    Aggregate, Entity, FieldPath, GroupQuery, GroupRow, LabelSource, PageRequest, Predicate,
    Record, ReportStore, Value,
};
use crate::types::Id;

// ============================================================================
// Configuration
// ============================================================================

/// Engine limits
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum concurrent store calls per request (default: 8)
    pub max_concurrent_queries: usize,

    /// Deadline for each store call (default: 30 seconds)
    pub query_timeout: Duration,

    /// Drill-down page size when the caller sends none (default: 50)
    pub default_page_size: usize,

    /// Largest drill-down page served (default: 500)
    pub max_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_queries: 8,
            query_timeout: Duration::from_secs(30),
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl EngineConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concurrency bound
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrent_queries = limit.max(1);
        self
    }

    /// Set the store call deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set drill-down page sizes
    pub fn with_page_sizes(mut self, default: usize, max: usize) -> Self {
        self.max_page_size = max.max(1);
        self.default_page_size = default.clamp(1, self.max_page_size);
        self
    }
}

// ============================================================================
// Query Runner
// ============================================================================

/// Store handle that puts a deadline and a latency sample on every call
#[derive(Clone)]
pub struct QueryRunner {
    store: Arc<dyn ReportStore>,
    timeout: Duration,
}

impl QueryRunner {
    /// Wrap a store with a per-call deadline
    pub fn new(store: Arc<dyn ReportStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn guard<T, F>(&self, operation: &'static str, call: F) -> Result<T, ReportError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => {
                metrics::record_store_call(operation, started.elapsed().as_secs_f64());
                result.map_err(|e| {
                    warn!(operation, store = self.store.store_id(), error = %e, "Store call failed");
                    ReportError::Store(e)
                })
            }
            Err(_) => {
                metrics::record_store_timeout(operation);
                warn!(
                    operation,
                    store = self.store.store_id(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Store call timed out"
                );
                Err(ReportError::Timeout(self.timeout))
            }
        }
    }

    /// Grouped aggregate
    pub async fn group_by(&self, query: &GroupQuery) -> Result<Vec<GroupRow>, ReportError> {
        self.guard("group_by", self.store.group_by(query)).await
    }

    /// Row count
    pub async fn count(&self, entity: Entity, filter: &Predicate) -> Result<u64, ReportError> {
        self.guard("count", self.store.count(entity, filter)).await
    }

    /// Distinct values
    pub async fn distinct(
        &self,
        entity: Entity,
        filter: &Predicate,
        field: &FieldPath,
    ) -> Result<Vec<Value>, ReportError> {
        self.guard("distinct", self.store.distinct(entity, filter, field))
            .await
    }

    /// Hydrated page
    pub async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Record>, ReportError> {
        self.guard("fetch_page", self.store.fetch_page(request)).await
    }

    /// Display names
    pub async fn labels(
        &self,
        source: LabelSource,
        ids: &[Id],
    ) -> Result<HashMap<Id, String>, ReportError> {
        self.guard("labels", self.store.labels(source, ids)).await
    }
}

// ============================================================================
// Result Rows
// ============================================================================

/// One aggregate row: dimension keys followed by metric values
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Dimension keys, in request order
    pub keys: Vec<(DimensionId, GroupKey)>,
    /// Metric values, in request order
    pub metrics: Vec<(MetricId, f64)>,
}

impl Row {
    /// Key of one dimension
    pub fn key(&self, dim: DimensionId) -> Option<&GroupKey> {
        self.keys.iter().find(|(d, _)| *d == dim).map(|(_, k)| k)
    }

    /// Value of one metric
    pub fn metric(&self, id: MetricId) -> Option<f64> {
        self.metrics.iter().find(|(m, _)| *m == id).map(|(_, v)| *v)
    }
}

const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.keys.len() + self.metrics.len()))?;
        for (dim, key) in &self.keys {
            map.serialize_entry(dim.as_str(), key)?;
        }
        for (metric, value) in &self.metrics {
            // counts and integral sums go out as integers
            if value.fract() == 0.0 && value.abs() < MAX_EXACT_INT {
                map.serialize_entry(metric.as_str(), &(*value as i64))?;
            } else {
                map.serialize_entry(metric.as_str(), value)?;
            }
        }
        map.end()
    }
}

/// Available dimensions and metrics of a report type
#[derive(Debug, Clone, Serialize)]
pub struct ReportDescription {
    /// Dimensions
    pub dimensions: Vec<DimensionDescriptor>,
    /// Metrics
    pub metrics: Vec<MetricDescriptor>,
}

// ============================================================================
// Planning
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Value,
    Numerator,
    Denominator,
}

struct SubQuery {
    slot: usize,
    part: Part,
    query: GroupQuery,
}

#[derive(Debug, Clone, Copy, Default)]
struct Cell {
    value: f64,
    numerator: f64,
    denominator: f64,
}

/// Validated aggregate request
pub(crate) struct Plan {
    pub(crate) dims: Vec<&'static DimensionSpec>,
    pub(crate) metrics: Vec<MetricSpec>,
    pub(crate) scope: Scope,
}

impl Plan {
    pub(crate) fn validate(report: ReportType, request: &AggregateRequest) -> Result<Self, ReportError> {
        let mut dims: Vec<&'static DimensionSpec> = Vec::with_capacity(request.dimensions.len());
        for id in &request.dimensions {
            let spec = dimension::resolve_dimension(report, id)?;
            if dims.iter().any(|d| d.id == spec.id) {
                return Err(ReportError::invalid(
                    "dimensions",
                    format!("duplicate dimension: {}", id),
                ));
            }
            dims.push(spec);
        }

        let mut metrics: Vec<MetricSpec> = Vec::with_capacity(request.metrics.len());
        for id in &request.metrics {
            let spec = metric::resolve_metric(report, id)?;
            if metrics.iter().any(|m| m.id == spec.id) {
                return Err(ReportError::invalid(
                    "metrics",
                    format!("duplicate metric: {}", id),
                ));
            }
            metrics.push(spec);
        }
        if metrics.is_empty() {
            return Err(ReportError::NoMetrics);
        }

        let scope = Scope::resolve(
            report,
            request.project_id,
            request.project_ids.as_deref(),
            request.start_date.as_deref(),
            request.end_date.as_deref(),
        )?;

        Ok(Self {
            dims,
            metrics,
            scope,
        })
    }

    fn dim_ids(&self) -> Vec<DimensionId> {
        self.dims.iter().map(|d| d.id).collect()
    }

    fn sub_queries(&self, applicable: &[MetricSpec]) -> Result<Vec<SubQuery>, ReportError> {
        let mut out = Vec::new();
        for (slot, spec) in applicable.iter().enumerate() {
            let entity = spec.grouping_entity();
            let keys = self
                .dims
                .iter()
                .map(|d| {
                    d.group_expr(entity)
                        .ok_or_else(|| ReportError::UnsupportedDimension {
                            dimension: d.id.as_str().to_string(),
                            report_type: entity.name().to_string(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let filter = predicate::build(spec, &self.scope, &[])?;

            let query = |part, filter, aggregate| SubQuery {
                slot,
                part,
                query: GroupQuery {
                    entity,
                    filter,
                    keys: keys.clone(),
                    aggregate,
                },
            };

            match spec.kind {
                MetricKind::Count => {
                    let aggregate = match spec.source {
                        MetricSource::Direct(_) => Aggregate::Count,
                        MetricSource::DistinctParent { key, .. } => Aggregate::CountDistinct(key),
                    };
                    out.push(query(Part::Value, filter, aggregate));
                }
                MetricKind::Sum | MetricKind::Average => {
                    let field = spec
                        .value
                        .ok_or_else(|| ReportError::invalid("metrics", "metric has no value field"))?;
                    let aggregate = if spec.kind == MetricKind::Sum {
                        Aggregate::Sum(field)
                    } else {
                        Aggregate::Avg(field)
                    };
                    out.push(query(Part::Value, filter, aggregate));
                }
                MetricKind::Rate => {
                    let numerator = predicate::numerator(spec, &filter)
                        .ok_or_else(|| ReportError::invalid("metrics", "rate has no numerator"))?;
                    out.push(query(Part::Numerator, numerator, Aggregate::Count));
                    out.push(query(Part::Denominator, filter, Aggregate::Count));
                }
            }
        }
        Ok(out)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Computes aggregate rows and serves drill-downs
#[derive(Clone)]
pub struct ReportEngine {
    pub(crate) runner: QueryRunner,
    pub(crate) config: EngineConfig,
}

impl ReportEngine {
    /// Create an engine over a store
    pub fn new(store: Arc<dyn ReportStore>, config: EngineConfig) -> Self {
        Self {
            runner: QueryRunner::new(store, config.query_timeout),
            config,
        }
    }

    /// Engine limits
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dimensions and metrics a report type offers
    pub fn describe(&self, report: ReportType, scoped_to_project: bool) -> ReportDescription {
        ReportDescription {
            dimensions: dimension::describe(report, scoped_to_project),
            metrics: metric::describe(report),
        }
    }

    /// Compute grouped rows for a report
    pub async fn aggregate(
        &self,
        report: ReportType,
        request: &AggregateRequest,
    ) -> Result<Vec<Row>, ReportError> {
        let started = Instant::now();
        let plan = Plan::validate(report, request)?;
        let dim_ids = plan.dim_ids();

        let applicable: Vec<MetricSpec> = plan
            .metrics
            .iter()
            .filter(|m| m.applies_to(&dim_ids))
            .copied()
            .collect();
        if applicable.len() < plan.metrics.len() {
            debug!(
                report_type = %report,
                omitted = plan.metrics.len() - applicable.len(),
                "Omitting metrics inapplicable to the requested dimensions"
            );
        }

        let sub_queries = plan.sub_queries(&applicable)?;
        debug!(
            report_type = %report,
            dimensions = ?dim_ids,
            sub_queries = sub_queries.len(),
            "Planned aggregate"
        );

        // `buffered` keeps submission order, so the merged row order is deterministic
        let limit = self.config.max_concurrent_queries.max(1);
        let results: Vec<(usize, Part, Vec<GroupRow>)> = stream::iter(sub_queries)
            .map(|sq| async move {
                let rows = self.runner.group_by(&sq.query).await?;
                Ok::<_, ReportError>((sq.slot, sq.part, rows))
            })
            .buffered(limit)
            .try_collect()
            .await?;

        let mut index: HashMap<Vec<Option<Value>>, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Option<Value>>, Vec<Cell>)> = Vec::new();
        for (slot, part, rows) in results {
            for row in rows {
                let at = match index.get(&row.keys) {
                    Some(&at) => at,
                    None => {
                        groups.push((row.keys.clone(), vec![Cell::default(); applicable.len()]));
                        index.insert(row.keys, groups.len() - 1);
                        groups.len() - 1
                    }
                };
                let cell = &mut groups[at].1[slot];
                match part {
                    Part::Value => cell.value = row.value,
                    Part::Numerator => cell.numerator = row.value,
                    Part::Denominator => cell.denominator = row.value,
                }
            }
        }

        let labels = self.labels_for(&plan.dims, &groups).await?;
        let date_key = DimensionId::Date
            .spec()
            .path(report.entity())
            .map(|p| date_field(&p))
            .unwrap_or("createdAt");

        let mut rows: Vec<Row> = groups
            .into_iter()
            .map(|(keys, cells)| Row {
                keys: plan
                    .dims
                    .iter()
                    .zip(keys.iter())
                    .zip(labels.iter())
                    .map(|((spec, value), names)| {
                        (spec.id, GroupKey::from_value(spec, date_key, value.as_ref(), names))
                    })
                    .collect(),
                metrics: applicable
                    .iter()
                    .zip(cells)
                    .map(|(spec, cell)| (spec.id, finish(spec, cell)))
                    .collect(),
            })
            .collect();

        if let Some(pos) = plan.dims.iter().position(|d| d.shape == ValueShape::Date) {
            rows.sort_by_key(|row| row.keys[pos].1.day());
        }

        info!(
            report_type = %report,
            rows = rows.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Aggregate complete"
        );
        Ok(rows)
    }

    async fn labels_for(
        &self,
        dims: &[&'static DimensionSpec],
        groups: &[(Vec<Option<Value>>, Vec<Cell>)],
    ) -> Result<Vec<HashMap<Id, String>>, ReportError> {
        let mut out = Vec::with_capacity(dims.len());
        for (i, spec) in dims.iter().enumerate() {
            let source = match spec.shape {
                ValueShape::Entity(source) => source,
                _ => {
                    out.push(HashMap::new());
                    continue;
                }
            };
            let mut seen = HashSet::new();
            let ids: Vec<Id> = groups
                .iter()
                .filter_map(|(keys, _)| keys[i].as_ref().and_then(Value::as_id))
                .filter(|id| seen.insert(*id))
                .collect();
            if ids.is_empty() {
                out.push(HashMap::new());
            } else {
                out.push(self.runner.labels(source, &ids).await?);
            }
        }
        Ok(out)
    }
}

fn finish(spec: &MetricSpec, cell: Cell) -> f64 {
    match spec.kind {
        MetricKind::Rate => metric::rate(cell.numerator as u64, cell.denominator as u64),
        MetricKind::Average => metric::round_rate(cell.value),
        MetricKind::Count | MetricKind::Sum => cell.value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportKind;
    use crate::store::seed::demo_dataset;
    use crate::store::InMemoryStore;

    fn engine() -> ReportEngine {
        let store = Arc::new(InMemoryStore::new(demo_dataset()));
        ReportEngine::new(store, EngineConfig::default())
    }

    fn request(project: u64, dims: &[&str], metrics: &[&str]) -> AggregateRequest {
        AggregateRequest {
            project_id: Some(project),
            dimensions: dims.iter().map(|s| s.to_string()).collect(),
            metrics: metrics.iter().map(|s| s.to_string()).collect(),
            ..AggregateRequest::default()
        }
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let engine = engine();
        let report = ReportType::project(ReportKind::TestExecution);

        let err = engine
            .aggregate(report, &request(1, &[], &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::NoMetrics));

        let err = engine
            .aggregate(report, &request(1, &["bogus"], &["testResults"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unsupported dimension"));

        let err = engine
            .aggregate(report, &request(1, &["status", "status"], &["testResults"]))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let mut missing = request(1, &[], &["testResults"]);
        missing.project_id = None;
        let err = engine.aggregate(report, &missing).await.unwrap_err();
        assert!(matches!(err, ReportError::MissingField(_)));
    }

    #[tokio::test]
    async fn test_grand_total_is_one_row() {
        let engine = engine();
        let report = ReportType::project(ReportKind::TestExecution);
        let rows = engine
            .aggregate(report, &request(1, &[], &["testResults", "passRate"]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].keys.is_empty());
        assert!(rows[0].metric(MetricId::TestResults).unwrap() > 0.0);
    }

    #[tokio::test]
    async fn test_missing_project_is_empty() {
        let engine = engine();
        let report = ReportType::project(ReportKind::TestExecution);
        let rows = engine
            .aggregate(report, &request(999, &["status"], &["testResults"]))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_inapplicable_metric_is_omitted_from_all_rows() {
        let engine = engine();
        let report = ReportType::project(ReportKind::TestExecution);
        let rows = engine
            .aggregate(
                report,
                &request(1, &["status"], &["testResults", "testCaseCount"]),
            )
            .await
            .unwrap();
        assert!(!rows.is_empty());
        for row in &rows {
            assert!(row.metric(MetricId::TestResults).is_some());
            assert!(row.metric(MetricId::TestCaseCount).is_none());
        }
    }

    #[tokio::test]
    async fn test_date_rows_are_chronological() {
        let engine = engine();
        let report = ReportType::cross_project(ReportKind::TestExecution);
        let mut req = request(1, &["user", "date"], &["testResults"]);
        req.project_id = None;
        let rows = engine.aggregate(report, &req).await.unwrap();
        let days: Vec<_> = rows
            .iter()
            .map(|r| r.key(DimensionId::Date).and_then(GroupKey::day).unwrap())
            .collect();
        assert!(days.windows(2).all(|w| w[0] <= w[1]));
        let json = serde_json::to_value(&rows[0]).unwrap();
        assert!(json["date"]["executedAt"].is_string());
    }

    #[tokio::test]
    async fn test_row_serializes_flat() {
        let row = Row {
            keys: vec![(
                DimensionId::Status,
                GroupKey::Entity {
                    id: 1,
                    name: "Passed".into(),
                },
            )],
            metrics: vec![(MetricId::TestResults, 12.0), (MetricId::PassRate, 57.14)],
        };
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            serde_json::json!({
                "status": {"id": 1, "name": "Passed"},
                "testResults": 12,
                "passRate": 57.14
            })
        );
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_concurrency(0)
            .with_timeout(Duration::from_millis(250))
            .with_page_sizes(1000, 100);
        assert_eq!(config.max_concurrent_queries, 1);
        assert_eq!(config.query_timeout, Duration::from_millis(250));
        assert_eq!(config.default_page_size, 100);
    }
}
