//! Data access layer for the report engine
//!
//! The engine never walks entities itself. It describes what it wants as a
//! [`GroupQuery`], a [`Predicate`] to count, or a [`PageRequest`] to hydrate,
//! and a [`ReportStore`] executes it. Every column reference is a
//! [`FieldPath`]: a chain of foreign-key hops from the base entity followed by
//! one attribute, which is how the registries express join paths.
//!
//! ```text
//! ExecutionRecord ──runCase──▶ RunCaseEntry ──run──▶ Run ──▶ project_id
//!                                        └────case──▶ RepositoryCase ──▶ folder_id
//! SessionResult ──session──▶ Session ──▶ project_id
//! ```

pub mod memory;
pub mod record;
pub mod seed;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::Id;

pub use memory::InMemoryStore;
pub use record::{NamedRef, Record};

// ============================================================================
// Query Model
// ============================================================================

/// Entity types a query can be rooted at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Entity {
    /// Execution records (test results)
    Execution,
    /// Run/case links
    RunCase,
    /// Test runs
    Run,
    /// Repository cases
    Case,
    /// Exploratory sessions
    Session,
    /// Session findings
    SessionResult,
    /// Issues
    Issue,
}

impl Entity {
    /// Stable name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Entity::Execution => "execution",
            Entity::RunCase => "runCase",
            Entity::Run => "run",
            Entity::Case => "case",
            Entity::Session => "session",
            Entity::SessionResult => "sessionResult",
            Entity::Issue => "issue",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A foreign-key hop from one entity to the entity it references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hop {
    /// Execution → RunCaseEntry
    RunCase,
    /// RunCaseEntry → Run
    Run,
    /// RunCaseEntry → RepositoryCase
    Case,
    /// SessionResult → Session
    Session,
    /// Execution / SessionResult → Status
    Status,
}

impl Hop {
    fn name(&self) -> &'static str {
        match self {
            Hop::RunCase => "runCase",
            Hop::Run => "run",
            Hop::Case => "case",
            Hop::Session => "session",
            Hop::Status => "status",
        }
    }
}

/// A column on the entity at the end of a hop chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    /// Primary key
    Id,
    /// Owning project
    ProjectId,
    /// Outcome status
    StatusId,
    /// Executor of an execution record
    ExecutorId,
    /// Author
    CreatorId,
    /// Execution timestamp
    ExecutedAt,
    /// Creation timestamp
    CreatedAt,
    /// Elapsed seconds
    ElapsedSecs,
    /// Configuration reference
    ConfigurationId,
    /// Milestone reference
    MilestoneId,
    /// Folder reference
    FolderId,
    /// Template reference
    TemplateId,
    /// Workflow state reference
    StateId,
    /// Run reference
    RunId,
    /// Repository case reference
    CaseId,
    /// Automation source of a case
    Source,
    /// Step count of a case
    StepCount,
    /// Issue type text
    IssueType,
    /// Integration reference
    IntegrationId,
    /// External tracker key
    ExternalKey,
    /// Soft delete flag
    IsDeleted,
    /// Status counts as success
    IsSuccess,
    /// Status is the untested placeholder
    IsUntested,
}

/// Join path from a base entity to one attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldPath {
    /// Foreign-key hops, applied left to right
    pub hops: &'static [Hop],
    /// Attribute read on the final entity
    pub attr: Attr,
}

impl FieldPath {
    /// Attribute on the base entity itself
    pub const fn attr(attr: Attr) -> Self {
        Self { hops: &[], attr }
    }

    /// Attribute reached through hops
    pub const fn via(hops: &'static [Hop], attr: Attr) -> Self {
        Self { hops, attr }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hop in self.hops {
            write!(f, "{}.", hop.name())?;
        }
        write!(f, "{:?}", self.attr)
    }
}

/// A scalar value read from a field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    /// Foreign or primary key
    Id(Id),
    /// Boolean flag
    Bool(bool),
    /// Integer quantity
    Int(i64),
    /// Text
    Text(String),
    /// Timestamp
    Time(DateTime<Utc>),
}

impl Value {
    /// Numeric view used by sum/average aggregates
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Id(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Key view
    pub fn as_id(&self) -> Option<Id> {
        match self {
            Value::Id(v) => Some(*v),
            _ => None,
        }
    }

    /// Timestamp view
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }
}

/// Truncate a timestamp to midnight UTC
///
/// Both grouping (`Bucket::Day`) and day-bucket drill-down predicates go
/// through this function.
pub fn truncate_to_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::days(1)).unwrap_or(ts)
}

/// Half-open `[start, start + 1 day)` range for a day bucket
///
/// `None` for the last representable day, which has no exclusive end.
pub fn day_range(day: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = truncate_to_day(day);
    start
        .checked_add_signed(Duration::days(1))
        .map(|end| (start, end))
}

/// Boolean filter over a base entity
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Field equals the value
    Eq(FieldPath, Value),
    /// Field is one of the values
    In(FieldPath, Vec<Value>),
    /// Field is absent (null foreign key, or dangling hop)
    IsNull(FieldPath),
    /// Timestamp field within `[start, end)`; open ends are unbounded
    Range {
        /// Timestamp field
        field: FieldPath,
        /// Inclusive lower bound
        start: Option<DateTime<Utc>>,
        /// Exclusive upper bound
        end: Option<DateTime<Utc>>,
    },
    /// Negation
    Not(Box<Predicate>),
    /// Conjunction; empty is always true
    And(Vec<Predicate>),
}

impl Predicate {
    /// The always-true predicate
    pub fn all() -> Self {
        Predicate::And(Vec::new())
    }

    /// Conjunction that flattens nested `And`s
    pub fn and(parts: impl IntoIterator<Item = Predicate>) -> Self {
        let mut flat = Vec::new();
        for part in parts {
            match part {
                Predicate::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        Predicate::And(flat)
    }

    /// Negate a predicate
    pub fn not(inner: Predicate) -> Self {
        Predicate::Not(Box::new(inner))
    }
}

/// How a group key is derived from its field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// Raw value
    Value,
    /// Timestamp truncated to midnight UTC
    Day,
}

/// One group-by expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupExpr {
    /// Field to group on
    pub field: FieldPath,
    /// Bucketing applied to the value
    pub bucket: Bucket,
}

/// Aggregate computed per group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Number of matching rows
    Count,
    /// Number of distinct non-null values of a field
    CountDistinct(FieldPath),
    /// Sum of a numeric field (nulls skipped)
    Sum(FieldPath),
    /// Average of a numeric field (nulls skipped, empty is 0)
    Avg(FieldPath),
}

/// Grouped aggregate query
#[derive(Debug, Clone)]
pub struct GroupQuery {
    /// Base entity
    pub entity: Entity,
    /// Row filter
    pub filter: Predicate,
    /// Group-by expressions; empty yields at most one row
    pub keys: Vec<GroupExpr>,
    /// Aggregate to compute
    pub aggregate: Aggregate,
}

/// One group produced by a [`GroupQuery`]
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    /// Key values in the order of `GroupQuery::keys`; `None` is the null bucket
    pub keys: Vec<Option<Value>>,
    /// Aggregate value
    pub value: f64,
    /// Number of rows in the group
    pub rows: u64,
}

/// Paginated hydrated fetch
#[derive(Debug, Clone)]
pub struct PageRequest {
    /// Base entity
    pub entity: Entity,
    /// Row filter
    pub filter: Predicate,
    /// Timestamp field ordering the page (descending, id descending on ties)
    pub order_by: FieldPath,
    /// Rows to skip
    pub offset: usize,
    /// Maximum rows to return
    pub limit: usize,
}

/// Lookup tables that carry display names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelSource {
    /// Projects
    Project,
    /// Users
    User,
    /// Statuses
    Status,
    /// Configurations
    Configuration,
    /// Milestones
    Milestone,
    /// Repository folders
    Folder,
    /// Templates
    Template,
    /// Workflow states
    WorkflowState,
    /// Issue tracker integrations
    Integration,
    /// Runs
    Run,
    /// Repository cases
    Case,
}

// ============================================================================
// Store Trait
// ============================================================================

/// Query interface over the persisted entities
///
/// Implementations must be read-only with respect to the data they serve and
/// safe to call concurrently.
#[async_trait]
pub trait ReportStore: Send + Sync + 'static {
    /// Unique identifier for this backend
    fn store_id(&self) -> &str;

    /// Execute a grouped aggregate
    async fn group_by(&self, query: &GroupQuery) -> Result<Vec<GroupRow>, StoreError>;

    /// Count rows matching a filter
    async fn count(&self, entity: Entity, filter: &Predicate) -> Result<u64, StoreError>;

    /// Distinct non-null values of a field over matching rows
    async fn distinct(
        &self,
        entity: Entity,
        filter: &Predicate,
        field: &FieldPath,
    ) -> Result<Vec<Value>, StoreError>;

    /// Fetch one page of hydrated records
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Record>, StoreError>;

    /// Display names for a set of ids
    async fn labels(
        &self,
        source: LabelSource,
        ids: &[Id],
    ) -> Result<HashMap<Id, String>, StoreError>;
}
