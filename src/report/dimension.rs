//! Dimension registry
//!
//! A dimension is a grouping axis. Its join path depends on the entity the
//! query is rooted at: `configuration` is a column on a session but lives on
//! the run for an execution, and on the session for a session finding.

use std::fmt;

use serde::Serialize;

use super::{ReportKind, ReportType};
use crate::error::ReportError;
use crate::store::{Attr, Bucket, Entity, FieldPath, GroupExpr, Hop, LabelSource};

/// Label of the null bucket
pub const NULL_BUCKET_LABEL: &str = "None";

/// Grouping dimensions across all report types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DimensionId {
    /// Owning project
    Project,
    /// Executor of an execution
    User,
    /// Execution status
    Status,
    /// Day of the canonical timestamp
    Date,
    /// Configuration
    Configuration,
    /// Milestone
    Milestone,
    /// Test run
    TestRun,
    /// Repository case
    TestCase,
    /// Repository folder
    Folder,
    /// Author
    Creator,
    /// Template
    Template,
    /// Workflow state
    State,
    /// Automation source
    Source,
    /// Issue type
    IssueType,
    /// Issue tracker integration
    Integration,
}

impl DimensionId {
    /// Every dimension id
    pub const ALL: [DimensionId; 15] = [
        DimensionId::Project,
        DimensionId::User,
        DimensionId::Status,
        DimensionId::Date,
        DimensionId::Configuration,
        DimensionId::Milestone,
        DimensionId::TestRun,
        DimensionId::TestCase,
        DimensionId::Folder,
        DimensionId::Creator,
        DimensionId::Template,
        DimensionId::State,
        DimensionId::Source,
        DimensionId::IssueType,
        DimensionId::Integration,
    ];

    /// Wire id
    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionId::Project => "project",
            DimensionId::User => "user",
            DimensionId::Status => "status",
            DimensionId::Date => "date",
            DimensionId::Configuration => "configuration",
            DimensionId::Milestone => "milestone",
            DimensionId::TestRun => "testRun",
            DimensionId::TestCase => "testCase",
            DimensionId::Folder => "folder",
            DimensionId::Creator => "creator",
            DimensionId::Template => "template",
            DimensionId::State => "state",
            DimensionId::Source => "source",
            DimensionId::IssueType => "issueType",
            DimensionId::Integration => "integration",
        }
    }

    /// Parse a wire id
    pub fn parse(id: &str) -> Option<Self> {
        DimensionId::ALL.into_iter().find(|d| d.as_str() == id)
    }

    /// Static spec for this dimension
    pub fn spec(&self) -> &'static DimensionSpec {
        // SPECS is laid out in declaration order
        &SPECS[*self as usize]
    }
}

impl fmt::Display for DimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape a group key takes when echoed back in a result row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    /// `{id, name}` with a numeric id and a looked-up name
    Entity(LabelSource),
    /// `{id, name}` with a string id
    Text,
    /// `{executedAt|createdAt: ISO}` truncated to midnight UTC
    Date,
}

/// Dimension definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionSpec {
    /// Dimension id
    pub id: DimensionId,
    /// Display label
    pub label: &'static str,
    /// Result value shape
    pub shape: ValueShape,
    /// Whether the underlying key may be absent
    pub nullable: bool,
}

static SPECS: [DimensionSpec; 15] = [
    dim(DimensionId::Project, "Project", ValueShape::Entity(LabelSource::Project), false),
    dim(DimensionId::User, "User", ValueShape::Entity(LabelSource::User), false),
    dim(DimensionId::Status, "Status", ValueShape::Entity(LabelSource::Status), false),
    dim(DimensionId::Date, "Date", ValueShape::Date, false),
    dim(
        DimensionId::Configuration,
        "Configuration",
        ValueShape::Entity(LabelSource::Configuration),
        true,
    ),
    dim(DimensionId::Milestone, "Milestone", ValueShape::Entity(LabelSource::Milestone), true),
    dim(DimensionId::TestRun, "Test Run", ValueShape::Entity(LabelSource::Run), false),
    dim(DimensionId::TestCase, "Test Case", ValueShape::Entity(LabelSource::Case), false),
    dim(DimensionId::Folder, "Folder", ValueShape::Entity(LabelSource::Folder), true),
    dim(DimensionId::Creator, "Creator", ValueShape::Entity(LabelSource::User), false),
    dim(DimensionId::Template, "Template", ValueShape::Entity(LabelSource::Template), true),
    dim(DimensionId::State, "State", ValueShape::Entity(LabelSource::WorkflowState), true),
    dim(DimensionId::Source, "Source", ValueShape::Text, false),
    dim(DimensionId::IssueType, "Issue Type", ValueShape::Text, true),
    dim(
        DimensionId::Integration,
        "Integration",
        ValueShape::Entity(LabelSource::Integration),
        true,
    ),
];

const fn dim(id: DimensionId, label: &'static str, shape: ValueShape, nullable: bool) -> DimensionSpec {
    DimensionSpec {
        id,
        label,
        shape,
        nullable,
    }
}

const RUN: &[Hop] = &[Hop::RunCase, Hop::Run];
const CASE: &[Hop] = &[Hop::RunCase, Hop::Case];
const RUN_CASE: &[Hop] = &[Hop::RunCase];
const SESSION: &[Hop] = &[Hop::Session];

impl DimensionSpec {
    /// Join path from `entity` to this dimension's key, if reachable
    pub fn path(&self, entity: Entity) -> Option<FieldPath> {
        use DimensionId as D;
        let path = match (entity, self.id) {
            (Entity::Execution, D::Project) => FieldPath::via(RUN, Attr::ProjectId),
            (Entity::Execution, D::User) => FieldPath::attr(Attr::ExecutorId),
            (Entity::Execution, D::Status) => FieldPath::attr(Attr::StatusId),
            (Entity::Execution, D::Date) => FieldPath::attr(Attr::ExecutedAt),
            (Entity::Execution, D::Configuration) => FieldPath::via(RUN, Attr::ConfigurationId),
            (Entity::Execution, D::Milestone) => FieldPath::via(RUN, Attr::MilestoneId),
            (Entity::Execution, D::TestRun) => FieldPath::via(RUN_CASE, Attr::RunId),
            (Entity::Execution, D::TestCase) => FieldPath::via(RUN_CASE, Attr::CaseId),
            (Entity::Execution, D::Folder) => FieldPath::via(CASE, Attr::FolderId),

            (Entity::Case, D::Project) => FieldPath::attr(Attr::ProjectId),
            (Entity::Case, D::Folder) => FieldPath::attr(Attr::FolderId),
            (Entity::Case, D::Creator) => FieldPath::attr(Attr::CreatorId),
            (Entity::Case, D::Template) => FieldPath::attr(Attr::TemplateId),
            (Entity::Case, D::State) => FieldPath::attr(Attr::StateId),
            (Entity::Case, D::Source) => FieldPath::attr(Attr::Source),
            (Entity::Case, D::Date) => FieldPath::attr(Attr::CreatedAt),

            (Entity::Session, D::Project) => FieldPath::attr(Attr::ProjectId),
            (Entity::Session, D::Creator) => FieldPath::attr(Attr::CreatorId),
            (Entity::Session, D::State) => FieldPath::attr(Attr::StateId),
            (Entity::Session, D::Template) => FieldPath::attr(Attr::TemplateId),
            (Entity::Session, D::Milestone) => FieldPath::attr(Attr::MilestoneId),
            (Entity::Session, D::Configuration) => FieldPath::attr(Attr::ConfigurationId),
            (Entity::Session, D::Date) => FieldPath::attr(Attr::CreatedAt),

            // findings group by the dimensions of their session
            (Entity::SessionResult, D::Project) => FieldPath::via(SESSION, Attr::ProjectId),
            (Entity::SessionResult, D::Creator) => FieldPath::via(SESSION, Attr::CreatorId),
            (Entity::SessionResult, D::State) => FieldPath::via(SESSION, Attr::StateId),
            (Entity::SessionResult, D::Template) => FieldPath::via(SESSION, Attr::TemplateId),
            (Entity::SessionResult, D::Milestone) => FieldPath::via(SESSION, Attr::MilestoneId),
            (Entity::SessionResult, D::Configuration) => {
                FieldPath::via(SESSION, Attr::ConfigurationId)
            }
            (Entity::SessionResult, D::Date) => FieldPath::via(SESSION, Attr::CreatedAt),

            (Entity::Issue, D::Project) => FieldPath::attr(Attr::ProjectId),
            (Entity::Issue, D::Creator) => FieldPath::attr(Attr::CreatorId),
            (Entity::Issue, D::IssueType) => FieldPath::attr(Attr::IssueType),
            (Entity::Issue, D::Integration) => FieldPath::attr(Attr::IntegrationId),
            (Entity::Issue, D::Date) => FieldPath::attr(Attr::CreatedAt),

            _ => return None,
        };
        Some(path)
    }

    /// Group-by expression rooted at `entity`
    pub fn group_expr(&self, entity: Entity) -> Option<GroupExpr> {
        let bucket = match self.shape {
            ValueShape::Date => Bucket::Day,
            _ => Bucket::Value,
        };
        self.path(entity).map(|field| GroupExpr { field, bucket })
    }

    /// Descriptor returned by the report metadata endpoint
    pub fn descriptor(&self) -> DimensionDescriptor {
        DimensionDescriptor {
            id: self.id.as_str(),
            label: self.label,
            nullable: self.nullable,
        }
    }
}

/// Dimension as listed by the metadata endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionDescriptor {
    /// Wire id
    pub id: &'static str,
    /// Display label
    pub label: &'static str,
    /// Whether a `None` bucket can appear
    pub nullable: bool,
}

/// Dimensions declared for a report family, in display order
pub fn dimensions_for(kind: ReportKind) -> &'static [DimensionId] {
    use DimensionId as D;
    match kind {
        ReportKind::TestExecution => &[
            D::Project,
            D::User,
            D::Status,
            D::Date,
            D::Configuration,
            D::Milestone,
            D::TestRun,
            D::TestCase,
            D::Folder,
        ],
        ReportKind::RepositoryStats => &[
            D::Project,
            D::Folder,
            D::Creator,
            D::Template,
            D::State,
            D::Source,
            D::Date,
        ],
        ReportKind::SessionAnalysis => &[
            D::Project,
            D::Creator,
            D::State,
            D::Template,
            D::Milestone,
            D::Configuration,
            D::Date,
        ],
        ReportKind::IssueTracking => &[
            D::Project,
            D::Creator,
            D::IssueType,
            D::Integration,
            D::Date,
        ],
    }
}

/// Resolve a dimension id for a report type
pub fn resolve_dimension(
    report: ReportType,
    id: &str,
) -> Result<&'static DimensionSpec, ReportError> {
    DimensionId::parse(id)
        .filter(|d| dimensions_for(report.kind).contains(d))
        .map(|d| d.spec())
        .ok_or_else(|| ReportError::UnsupportedDimension {
            dimension: id.to_string(),
            report_type: report.to_string(),
        })
}

/// Dimension descriptors for the metadata endpoint
///
/// When the caller is already scoped to one project the `project` dimension
/// is dropped.
pub fn describe(report: ReportType, scoped_to_project: bool) -> Vec<DimensionDescriptor> {
    dimensions_for(report.kind)
        .iter()
        .filter(|d| !(scoped_to_project && **d == DimensionId::Project))
        .map(|d| d.spec().descriptor())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_specs_are_indexed_by_id() {
        for id in DimensionId::ALL {
            assert_eq!(id.spec().id, id);
            assert_eq!(DimensionId::parse(id.as_str()), Some(id));
        }
    }

    #[test]
    fn test_every_declared_dimension_reaches_the_report_entity() {
        for kind in ReportKind::ALL {
            for dim in dimensions_for(kind) {
                assert!(
                    dim.spec().path(kind.entity()).is_some(),
                    "{} unreachable for {}",
                    dim,
                    kind.as_str()
                );
            }
        }
        // session findings reach every session dimension through their session
        for dim in dimensions_for(ReportKind::SessionAnalysis) {
            assert!(dim.spec().path(Entity::SessionResult).is_some());
        }
    }

    #[test]
    fn test_execution_project_follows_the_run() {
        let path = DimensionId::Project.spec().path(Entity::Execution).unwrap();
        assert_eq!(path.to_string(), "runCase.run.ProjectId");
    }

    #[test]
    fn test_unsupported_dimension() {
        let report = ReportType::project(ReportKind::TestExecution);
        let err = resolve_dimension(report, "bogus").unwrap_err();
        assert!(err.to_string().contains("Unsupported dimension"));
        // declared elsewhere, not for this report
        assert!(resolve_dimension(report, "issueType").is_err());
        assert!(resolve_dimension(report, "status").is_ok());
    }

    #[test]
    fn test_describe_drops_project_when_scoped() {
        let report = ReportType::project(ReportKind::IssueTracking);
        let ids: Vec<_> = describe(report, true).into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["creator", "issueType", "integration", "date"]);
        assert_eq!(describe(report, false).len(), 5);
    }
}
