//! Shared filter construction
//!
//! [`build`] is the only place a metric's record filter is assembled. The
//! engine calls it with an empty cell and groups the result; the drill-down
//! resolver calls it with the cell's keys. Both therefore apply the same
//! soft-delete scoping, project scoping, exclusions and date bounds.

use super::group_key::GroupKey;
use super::metric::{Filter, MetricSpec};
use super::Scope;
use super::DimensionId;
use crate::error::ReportError;
use crate::store::{Attr, Entity, FieldPath, Hop, Predicate, Value};

const NOT_DELETED: Value = Value::Bool(false);

/// Soft-delete scoping for records of `entity`
///
/// Executions are also dropped when their run is deleted, and session
/// findings when their session is.
pub fn live(entity: Entity) -> Predicate {
    let own = Predicate::Eq(FieldPath::attr(Attr::IsDeleted), NOT_DELETED);
    match entity {
        Entity::Execution => Predicate::and([
            own,
            Predicate::Eq(
                FieldPath::via(&[Hop::RunCase, Hop::Run], Attr::IsDeleted),
                NOT_DELETED,
            ),
        ]),
        Entity::SessionResult => Predicate::and([
            own,
            Predicate::Eq(FieldPath::via(&[Hop::Session], Attr::IsDeleted), NOT_DELETED),
        ]),
        Entity::RunCase => Predicate::all(),
        Entity::Run | Entity::Case | Entity::Session | Entity::Issue => own,
    }
}

/// Predicate for one metric filter
pub fn filter(f: Filter) -> Predicate {
    match f {
        Filter::Tested => Predicate::not(Predicate::Eq(
            FieldPath::via(&[Hop::Status], Attr::IsUntested),
            Value::Bool(true),
        )),
        Filter::Successful => Predicate::Eq(
            FieldPath::via(&[Hop::Status], Attr::IsSuccess),
            Value::Bool(true),
        ),
        Filter::Automated => Predicate::not(Predicate::Eq(
            FieldPath::attr(Attr::Source),
            Value::Text(crate::types::CaseSource::Manual.as_str().to_string()),
        )),
        Filter::Linked => Predicate::not(Predicate::IsNull(FieldPath::attr(Attr::ExternalKey))),
    }
}

fn projects(entity: Entity, scope: &Scope) -> Result<Option<Predicate>, ReportError> {
    let ids = match &scope.projects {
        Some(ids) => ids,
        None => return Ok(None),
    };
    let field = path(DimensionId::Project, entity)?;
    Ok(Some(match ids.as_slice() {
        [single] => Predicate::Eq(field, Value::Id(*single)),
        many => Predicate::In(field, many.iter().map(|id| Value::Id(*id)).collect()),
    }))
}

fn path(dim: DimensionId, entity: Entity) -> Result<FieldPath, ReportError> {
    dim.spec()
        .path(entity)
        .ok_or_else(|| ReportError::UnsupportedDimension {
            dimension: dim.as_str().to_string(),
            report_type: entity.name().to_string(),
        })
}

/// Filter selecting the records a metric counts, restricted to one cell
///
/// The predicate is rooted at the metric's grouping entity. An empty `cell`
/// gives the filter of the whole report.
pub fn build(
    metric: &MetricSpec,
    scope: &Scope,
    cell: &[(DimensionId, GroupKey)],
) -> Result<Predicate, ReportError> {
    let entity = metric.grouping_entity();
    let mut parts = vec![live(entity)];

    if let Some(p) = projects(entity, scope)? {
        parts.push(p);
    }

    for (dim, key) in cell {
        parts.push(key.predicate(path(*dim, entity)?));
    }

    parts.extend(metric.exclusion.iter().map(|f| filter(*f)));

    if scope.start.is_some() || scope.end.is_some() {
        let field = metric
            .canonical_timestamp()
            .ok_or_else(|| ReportError::invalid("startDate", "report has no timestamp"))?;
        parts.push(Predicate::Range {
            field,
            start: scope.start,
            end: scope.end,
        });
    }

    Ok(Predicate::and(parts))
}

/// Numerator filter of a rate metric, conjoined with its base filter
pub fn numerator(metric: &MetricSpec, base: &Predicate) -> Option<Predicate> {
    metric
        .numerator
        .map(|f| Predicate::and([base.clone(), filter(f)]))
}
