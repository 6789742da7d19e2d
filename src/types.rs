//! Core domain types for test-management reporting
//!
//! These are the persisted entities the report engine reads. They are owned
//! by the surrounding application; the engine only ever queries them through
//! [`crate::store::ReportStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier shared by every persisted entity
pub type Id = u64;

/// A project that owns runs, cases, sessions and issues
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Project identifier
    pub id: Id,
    /// Display name
    pub name: String,
}

/// An application user (tester, creator, executor)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// User identifier
    pub id: Id,
    /// Display name
    pub name: String,
}

/// Outcome status of an execution or session finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    /// Status identifier
    pub id: Id,
    /// Display name ("Passed", "Failed", ...)
    pub name: String,
    /// Counts as a success for pass-rate purposes
    #[serde(default)]
    pub is_success: bool,
    /// Placeholder status for cases that were never executed
    #[serde(default)]
    pub is_untested: bool,
}

/// Generic named lookup row (configuration, folder, template, state, integration)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedEntity {
    /// Identifier
    pub id: Id,
    /// Display name
    pub name: String,
}

/// Project milestone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    /// Milestone identifier
    pub id: Id,
    /// Display name
    pub name: String,
    /// Owning project
    pub project_id: Id,
    /// Milestone has been completed
    #[serde(default)]
    pub is_completed: bool,
    /// Milestone has started
    #[serde(default)]
    pub is_started: bool,
}

/// A test run: a named collection of cases under a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Run identifier
    pub id: Id,
    /// Display name
    pub name: String,
    /// Owning project (executions are scoped by this, never by the case's project)
    pub project_id: Id,
    /// Workflow state
    #[serde(default)]
    pub state_id: Option<Id>,
    /// Configuration the run executes against
    #[serde(default)]
    pub configuration_id: Option<Id>,
    /// Milestone the run belongs to
    #[serde(default)]
    pub milestone_id: Option<Id>,
    /// User that created the run
    pub creator_id: Id,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Run has been closed
    #[serde(default)]
    pub is_completed: bool,
    /// Soft delete flag
    #[serde(default)]
    pub is_deleted: bool,
}

/// Link between a run and a repository case
///
/// Carries its own id, distinct from the case id. The run may live in a
/// different project than the case it links to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCaseEntry {
    /// Entry identifier
    pub id: Id,
    /// Owning run
    pub run_id: Id,
    /// Linked repository case
    pub case_id: Id,
    /// Position within the run
    #[serde(default)]
    pub order: u32,
}

/// Where a repository case comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseSource {
    /// Written and executed by hand
    Manual,
    /// Imported from JUnit results
    Junit,
    /// Created through the API by an automation harness
    Api,
}

impl CaseSource {
    /// Stable key used in group keys and drill-down contexts
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseSource::Manual => "MANUAL",
            CaseSource::Junit => "JUNIT",
            CaseSource::Api => "API",
        }
    }

    /// Parse the stable key back
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "MANUAL" => Some(CaseSource::Manual),
            "JUNIT" => Some(CaseSource::Junit),
            "API" => Some(CaseSource::Api),
            _ => None,
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            CaseSource::Manual => "Manual",
            CaseSource::Junit => "JUnit",
            CaseSource::Api => "API",
        }
    }

    /// Cases from any non-manual source count as automated
    pub fn is_automated(&self) -> bool {
        !matches!(self, CaseSource::Manual)
    }
}

/// A test case definition in the repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryCase {
    /// Case identifier
    pub id: Id,
    /// Display name
    pub name: String,
    /// Owning project
    pub project_id: Id,
    /// Repository folder
    #[serde(default)]
    pub folder_id: Option<Id>,
    /// Author
    pub creator_id: Id,
    /// Case template
    #[serde(default)]
    pub template_id: Option<Id>,
    /// Workflow state
    #[serde(default)]
    pub state_id: Option<Id>,
    /// Automation source
    pub source: CaseSource,
    /// Number of steps
    #[serde(default)]
    pub step_count: u32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Soft delete flag
    #[serde(default)]
    pub is_deleted: bool,
}

/// One outcome of running a case in a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Record identifier
    pub id: Id,
    /// Run/case link this result belongs to
    pub run_case_id: Id,
    /// Outcome status
    pub status_id: Id,
    /// User that executed the case
    pub executor_id: Id,
    /// Execution timestamp
    pub executed_at: DateTime<Utc>,
    /// Elapsed time in seconds
    #[serde(default)]
    pub elapsed_secs: Option<u64>,
    /// Attempt number within the run case
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    /// Soft delete flag
    #[serde(default)]
    pub is_deleted: bool,
}

fn default_attempt() -> u32 {
    1
}

/// Exploratory testing session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier
    pub id: Id,
    /// Display name
    pub name: String,
    /// Owning project
    pub project_id: Id,
    /// Author
    pub creator_id: Id,
    /// Workflow state
    #[serde(default)]
    pub state_id: Option<Id>,
    /// Session template
    #[serde(default)]
    pub template_id: Option<Id>,
    /// Milestone
    #[serde(default)]
    pub milestone_id: Option<Id>,
    /// Configuration
    #[serde(default)]
    pub configuration_id: Option<Id>,
    /// Time spent in seconds
    #[serde(default)]
    pub elapsed_secs: Option<u64>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Soft delete flag
    #[serde(default)]
    pub is_deleted: bool,
}

/// Timestamped finding recorded during a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    /// Finding identifier
    pub id: Id,
    /// Owning session
    pub session_id: Id,
    /// Outcome status
    #[serde(default)]
    pub status_id: Option<Id>,
    /// Author
    pub creator_id: Id,
    /// Time spent in seconds
    #[serde(default)]
    pub elapsed_secs: Option<u64>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Soft delete flag
    #[serde(default)]
    pub is_deleted: bool,
}

/// Defect record, optionally synced with an external tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Issue identifier
    pub id: Id,
    /// Title
    pub title: String,
    /// Owning project
    pub project_id: Id,
    /// Reporter
    pub creator_id: Id,
    /// Tracker issue type ("Bug", "Task", ...)
    #[serde(default)]
    pub issue_type: Option<String>,
    /// External tracker integration
    #[serde(default)]
    pub integration_id: Option<Id>,
    /// Key in the external tracker
    #[serde(default)]
    pub external_key: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Soft delete flag
    #[serde(default)]
    pub is_deleted: bool,
}

/// Complete snapshot of the entities the report engine reads
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    /// Projects
    pub projects: Vec<Project>,
    /// Users
    pub users: Vec<User>,
    /// Statuses
    pub statuses: Vec<Status>,
    /// Configurations
    pub configurations: Vec<NamedEntity>,
    /// Milestones
    pub milestones: Vec<Milestone>,
    /// Repository folders
    pub folders: Vec<NamedEntity>,
    /// Templates
    pub templates: Vec<NamedEntity>,
    /// Workflow states
    pub workflow_states: Vec<NamedEntity>,
    /// Issue tracker integrations
    pub integrations: Vec<NamedEntity>,
    /// Runs
    pub runs: Vec<Run>,
    /// Run/case links
    pub run_cases: Vec<RunCaseEntry>,
    /// Repository cases
    pub cases: Vec<RepositoryCase>,
    /// Execution records
    pub executions: Vec<ExecutionRecord>,
    /// Sessions
    pub sessions: Vec<Session>,
    /// Session findings
    pub session_results: Vec<SessionResult>,
    /// Issues
    pub issues: Vec<Issue>,
}

impl Dataset {
    /// Load a dataset from a JSON document
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_source_roundtrip_key() {
        for source in [CaseSource::Manual, CaseSource::Junit, CaseSource::Api] {
            assert_eq!(CaseSource::parse(source.as_str()), Some(source));
        }
        assert_eq!(CaseSource::parse("junit"), Some(CaseSource::Junit));
        assert!(CaseSource::parse("robot").is_none());
        assert!(!CaseSource::Manual.is_automated());
        assert!(CaseSource::Api.is_automated());
    }

    #[test]
    fn test_dataset_from_json_defaults() {
        let json = r#"{
            "projects": [{"id": 1, "name": "Alpha"}],
            "executions": [{
                "id": 7, "run_case_id": 3, "status_id": 1, "executor_id": 2,
                "executed_at": "2024-03-01T10:15:00Z"
            }]
        }"#;
        let dataset = Dataset::from_json(json).unwrap();
        assert_eq!(dataset.projects.len(), 1);
        assert_eq!(dataset.executions[0].attempt, 1);
        assert!(!dataset.executions[0].is_deleted);
        assert!(dataset.runs.is_empty());
    }

    #[test]
    fn test_dataset_from_invalid_json() {
        assert!(Dataset::from_json("{not json").is_err());
    }
}
