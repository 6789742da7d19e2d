//! Hydrated drill-down records
//!
//! Each record carries the entity plus the minimal nested relations a list
//! view needs (names of the referenced user, status, run, ...).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{CaseSource, Id};

/// Id + display name of a referenced entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedRef {
    /// Referenced id
    pub id: Id,
    /// Display name (empty when the reference dangles)
    pub name: String,
}

/// A drill-down record, tagged by entity type
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "entity", rename_all = "camelCase")]
pub enum Record {
    /// Execution record
    Execution(ExecutionView),
    /// Test run
    Run(RunView),
    /// Repository case
    Case(CaseView),
    /// Exploratory session
    Session(SessionView),
    /// Session finding
    SessionResult(SessionResultView),
    /// Issue
    Issue(IssueView),
}

impl Record {
    /// Primary key of the underlying entity
    pub fn id(&self) -> Id {
        match self {
            Record::Execution(v) => v.id,
            Record::Run(v) => v.id,
            Record::Case(v) => v.id,
            Record::Session(v) => v.id,
            Record::SessionResult(v) => v.id,
            Record::Issue(v) => v.id,
        }
    }
}

/// Execution record with its run, case, status and executor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionView {
    pub id: Id,
    pub executed_at: DateTime<Utc>,
    pub elapsed_secs: Option<u64>,
    pub attempt: u32,
    pub status: NamedRef,
    pub executor: NamedRef,
    pub run_case_id: Id,
    pub run: Option<NamedRef>,
    pub case: Option<NamedRef>,
    pub configuration: Option<NamedRef>,
    pub milestone: Option<NamedRef>,
}

/// Test run with its configuration and milestone
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    pub id: Id,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub is_completed: bool,
    pub project: NamedRef,
    pub creator: NamedRef,
    pub configuration: Option<NamedRef>,
    pub milestone: Option<NamedRef>,
    pub state: Option<NamedRef>,
}

/// Repository case with folder and author
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseView {
    pub id: Id,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub source: CaseSource,
    pub step_count: u32,
    pub project: NamedRef,
    pub creator: NamedRef,
    pub folder: Option<NamedRef>,
    pub template: Option<NamedRef>,
    pub state: Option<NamedRef>,
}

/// Session with author and scoping references
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: Id,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub elapsed_secs: Option<u64>,
    pub project: NamedRef,
    pub creator: NamedRef,
    pub state: Option<NamedRef>,
    pub template: Option<NamedRef>,
    pub milestone: Option<NamedRef>,
    pub configuration: Option<NamedRef>,
}

/// Session finding with its session and status
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResultView {
    pub id: Id,
    pub created_at: DateTime<Utc>,
    pub elapsed_secs: Option<u64>,
    pub session: Option<NamedRef>,
    pub status: Option<NamedRef>,
    pub creator: NamedRef,
}

/// Issue with its tracker link
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueView {
    pub id: Id,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub issue_type: Option<String>,
    pub external_key: Option<String>,
    pub project: NamedRef,
    pub creator: NamedRef,
    pub integration: Option<NamedRef>,
}
