//! In-memory report store
//!
//! Serves a [`Dataset`] snapshot. Field paths are resolved by following
//! foreign keys through per-table id indexes; a dangling or absent key
//! resolves to null, which is what the null buckets group on.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::record::{
    CaseView, ExecutionView, IssueView, NamedRef, Record, RunView, SessionResultView,
    SessionView,
};
use super::{
    truncate_to_day, Aggregate, Attr, Bucket, Entity, FieldPath, GroupQuery, GroupRow, Hop,
    LabelSource, PageRequest, Predicate, ReportStore, Value,
};
use crate::error::StoreError;
use crate::types::{
    Dataset, ExecutionRecord, Id, Issue, RepositoryCase, Run, RunCaseEntry, Session,
    SessionResult, Status,
};

// ============================================================================
// Indexed Tables
// ============================================================================

/// Dataset plus id → position indexes
struct Tables {
    data: Dataset,
    projects: HashMap<Id, usize>,
    users: HashMap<Id, usize>,
    statuses: HashMap<Id, usize>,
    configurations: HashMap<Id, usize>,
    milestones: HashMap<Id, usize>,
    folders: HashMap<Id, usize>,
    templates: HashMap<Id, usize>,
    workflow_states: HashMap<Id, usize>,
    integrations: HashMap<Id, usize>,
    runs: HashMap<Id, usize>,
    run_cases: HashMap<Id, usize>,
    cases: HashMap<Id, usize>,
    sessions: HashMap<Id, usize>,
}

fn index_by<T>(items: &[T], id: impl Fn(&T) -> Id) -> HashMap<Id, usize> {
    items.iter().enumerate().map(|(i, item)| (id(item), i)).collect()
}

/// A row of some entity, borrowed from the tables
#[derive(Clone, Copy)]
enum Node<'a> {
    Execution(&'a ExecutionRecord),
    RunCase(&'a RunCaseEntry),
    Run(&'a Run),
    Case(&'a RepositoryCase),
    Session(&'a Session),
    SessionResult(&'a SessionResult),
    Issue(&'a Issue),
    Status(&'a Status),
}

impl Node<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Node::Execution(_) => "execution",
            Node::RunCase(_) => "runCase",
            Node::Run(_) => "run",
            Node::Case(_) => "case",
            Node::Session(_) => "session",
            Node::SessionResult(_) => "sessionResult",
            Node::Issue(_) => "issue",
            Node::Status(_) => "status",
        }
    }

    fn id(&self) -> Id {
        match self {
            Node::Execution(r) => r.id,
            Node::RunCase(r) => r.id,
            Node::Run(r) => r.id,
            Node::Case(r) => r.id,
            Node::Session(r) => r.id,
            Node::SessionResult(r) => r.id,
            Node::Issue(r) => r.id,
            Node::Status(r) => r.id,
        }
    }
}

fn id_value(id: Option<Id>) -> Option<Value> {
    id.map(Value::Id)
}

fn secs_value(secs: Option<u64>) -> Option<Value> {
    secs.map(|s| Value::Int(s as i64))
}

fn unreachable_attr(node: &Node<'_>, attr: Attr) -> StoreError {
    StoreError::UnreachableField {
        entity: node.kind().to_string(),
        field: format!("{:?}", attr),
    }
}

impl Tables {
    fn new(data: Dataset) -> Self {
        Self {
            projects: index_by(&data.projects, |p| p.id),
            users: index_by(&data.users, |u| u.id),
            statuses: index_by(&data.statuses, |s| s.id),
            configurations: index_by(&data.configurations, |c| c.id),
            milestones: index_by(&data.milestones, |m| m.id),
            folders: index_by(&data.folders, |f| f.id),
            templates: index_by(&data.templates, |t| t.id),
            workflow_states: index_by(&data.workflow_states, |s| s.id),
            integrations: index_by(&data.integrations, |i| i.id),
            runs: index_by(&data.runs, |r| r.id),
            run_cases: index_by(&data.run_cases, |r| r.id),
            cases: index_by(&data.cases, |c| c.id),
            sessions: index_by(&data.sessions, |s| s.id),
            data,
        }
    }

    fn roots(&self, entity: Entity) -> Box<dyn Iterator<Item = Node<'_>> + '_> {
        let d = &self.data;
        match entity {
            Entity::Execution => Box::new(d.executions.iter().map(Node::Execution)),
            Entity::RunCase => Box::new(d.run_cases.iter().map(Node::RunCase)),
            Entity::Run => Box::new(d.runs.iter().map(Node::Run)),
            Entity::Case => Box::new(d.cases.iter().map(Node::Case)),
            Entity::Session => Box::new(d.sessions.iter().map(Node::Session)),
            Entity::SessionResult => Box::new(d.session_results.iter().map(Node::SessionResult)),
            Entity::Issue => Box::new(d.issues.iter().map(Node::Issue)),
        }
    }

    fn hop<'a>(&'a self, node: Node<'a>, hop: Hop) -> Result<Option<Node<'a>>, StoreError> {
        let d = &self.data;
        let next = match (node, hop) {
            (Node::Execution(e), Hop::RunCase) => self
                .run_cases
                .get(&e.run_case_id)
                .map(|&i| Node::RunCase(&d.run_cases[i])),
            (Node::Execution(e), Hop::Status) => self
                .statuses
                .get(&e.status_id)
                .map(|&i| Node::Status(&d.statuses[i])),
            (Node::RunCase(rc), Hop::Run) => {
                self.runs.get(&rc.run_id).map(|&i| Node::Run(&d.runs[i]))
            }
            (Node::RunCase(rc), Hop::Case) => {
                self.cases.get(&rc.case_id).map(|&i| Node::Case(&d.cases[i]))
            }
            (Node::SessionResult(r), Hop::Session) => self
                .sessions
                .get(&r.session_id)
                .map(|&i| Node::Session(&d.sessions[i])),
            (Node::SessionResult(r), Hop::Status) => r
                .status_id
                .and_then(|id| self.statuses.get(&id))
                .map(|&i| Node::Status(&d.statuses[i])),
            (node, hop) => {
                return Err(StoreError::UnreachableField {
                    entity: node.kind().to_string(),
                    field: format!("{:?}", hop),
                })
            }
        };
        Ok(next)
    }

    fn attr(node: Node<'_>, attr: Attr) -> Result<Option<Value>, StoreError> {
        let value = match node {
            Node::Execution(e) => match attr {
                Attr::Id => Some(Value::Id(e.id)),
                Attr::StatusId => Some(Value::Id(e.status_id)),
                Attr::ExecutorId => Some(Value::Id(e.executor_id)),
                Attr::ExecutedAt => Some(Value::Time(e.executed_at)),
                Attr::ElapsedSecs => secs_value(e.elapsed_secs),
                Attr::IsDeleted => Some(Value::Bool(e.is_deleted)),
                _ => return Err(unreachable_attr(&node, attr)),
            },
            Node::RunCase(rc) => match attr {
                Attr::Id => Some(Value::Id(rc.id)),
                Attr::RunId => Some(Value::Id(rc.run_id)),
                Attr::CaseId => Some(Value::Id(rc.case_id)),
                _ => return Err(unreachable_attr(&node, attr)),
            },
            Node::Run(r) => match attr {
                Attr::Id => Some(Value::Id(r.id)),
                Attr::ProjectId => Some(Value::Id(r.project_id)),
                Attr::StateId => id_value(r.state_id),
                Attr::ConfigurationId => id_value(r.configuration_id),
                Attr::MilestoneId => id_value(r.milestone_id),
                Attr::CreatorId => Some(Value::Id(r.creator_id)),
                Attr::CreatedAt => Some(Value::Time(r.created_at)),
                Attr::IsDeleted => Some(Value::Bool(r.is_deleted)),
                _ => return Err(unreachable_attr(&node, attr)),
            },
            Node::Case(c) => match attr {
                Attr::Id => Some(Value::Id(c.id)),
                Attr::ProjectId => Some(Value::Id(c.project_id)),
                Attr::FolderId => id_value(c.folder_id),
                Attr::CreatorId => Some(Value::Id(c.creator_id)),
                Attr::TemplateId => id_value(c.template_id),
                Attr::StateId => id_value(c.state_id),
                Attr::Source => Some(Value::Text(c.source.as_str().to_string())),
                Attr::StepCount => Some(Value::Int(c.step_count as i64)),
                Attr::CreatedAt => Some(Value::Time(c.created_at)),
                Attr::IsDeleted => Some(Value::Bool(c.is_deleted)),
                _ => return Err(unreachable_attr(&node, attr)),
            },
            Node::Session(s) => match attr {
                Attr::Id => Some(Value::Id(s.id)),
                Attr::ProjectId => Some(Value::Id(s.project_id)),
                Attr::CreatorId => Some(Value::Id(s.creator_id)),
                Attr::StateId => id_value(s.state_id),
                Attr::TemplateId => id_value(s.template_id),
                Attr::MilestoneId => id_value(s.milestone_id),
                Attr::ConfigurationId => id_value(s.configuration_id),
                Attr::ElapsedSecs => secs_value(s.elapsed_secs),
                Attr::CreatedAt => Some(Value::Time(s.created_at)),
                Attr::IsDeleted => Some(Value::Bool(s.is_deleted)),
                _ => return Err(unreachable_attr(&node, attr)),
            },
            Node::SessionResult(r) => match attr {
                Attr::Id => Some(Value::Id(r.id)),
                Attr::StatusId => id_value(r.status_id),
                Attr::CreatorId => Some(Value::Id(r.creator_id)),
                Attr::ElapsedSecs => secs_value(r.elapsed_secs),
                Attr::CreatedAt => Some(Value::Time(r.created_at)),
                Attr::IsDeleted => Some(Value::Bool(r.is_deleted)),
                _ => return Err(unreachable_attr(&node, attr)),
            },
            Node::Issue(i) => match attr {
                Attr::Id => Some(Value::Id(i.id)),
                Attr::ProjectId => Some(Value::Id(i.project_id)),
                Attr::CreatorId => Some(Value::Id(i.creator_id)),
                Attr::IssueType => i.issue_type.clone().map(Value::Text),
                Attr::IntegrationId => id_value(i.integration_id),
                Attr::ExternalKey => i.external_key.clone().map(Value::Text),
                Attr::CreatedAt => Some(Value::Time(i.created_at)),
                Attr::IsDeleted => Some(Value::Bool(i.is_deleted)),
                _ => return Err(unreachable_attr(&node, attr)),
            },
            Node::Status(s) => match attr {
                Attr::Id => Some(Value::Id(s.id)),
                Attr::IsSuccess => Some(Value::Bool(s.is_success)),
                Attr::IsUntested => Some(Value::Bool(s.is_untested)),
                _ => return Err(unreachable_attr(&node, attr)),
            },
        };
        Ok(value)
    }

    fn resolve(&self, root: Node<'_>, path: &FieldPath) -> Result<Option<Value>, StoreError> {
        let mut node = root;
        for hop in path.hops {
            match self.hop(node, *hop)? {
                Some(next) => node = next,
                None => return Ok(None),
            }
        }
        Self::attr(node, path.attr)
    }

    fn eval(&self, root: Node<'_>, predicate: &Predicate) -> Result<bool, StoreError> {
        Ok(match predicate {
            Predicate::Eq(field, value) => self.resolve(root, field)?.as_ref() == Some(value),
            Predicate::In(field, values) => self
                .resolve(root, field)?
                .map_or(false, |v| values.contains(&v)),
            Predicate::IsNull(field) => self.resolve(root, field)?.is_none(),
            Predicate::Range { field, start, end } => {
                match self.resolve(root, field)?.and_then(|v| v.as_time()) {
                    Some(ts) => {
                        start.map_or(true, |s| ts >= s) && end.map_or(true, |e| ts < e)
                    }
                    None => false,
                }
            }
            Predicate::Not(inner) => !self.eval(root, inner)?,
            Predicate::And(parts) => {
                for part in parts {
                    if !self.eval(root, part)? {
                        return Ok(false);
                    }
                }
                true
            }
        })
    }

    fn matching(&self, entity: Entity, filter: &Predicate) -> Result<Vec<Node<'_>>, StoreError> {
        let mut out = Vec::new();
        for node in self.roots(entity) {
            if self.eval(node, filter)? {
                out.push(node);
            }
        }
        Ok(out)
    }

    fn label(&self, source: LabelSource, id: Id) -> Option<&str> {
        let d = &self.data;
        match source {
            LabelSource::Project => self.projects.get(&id).map(|&i| d.projects[i].name.as_str()),
            LabelSource::User => self.users.get(&id).map(|&i| d.users[i].name.as_str()),
            LabelSource::Status => self.statuses.get(&id).map(|&i| d.statuses[i].name.as_str()),
            LabelSource::Configuration => self
                .configurations
                .get(&id)
                .map(|&i| d.configurations[i].name.as_str()),
            LabelSource::Milestone => self
                .milestones
                .get(&id)
                .map(|&i| d.milestones[i].name.as_str()),
            LabelSource::Folder => self.folders.get(&id).map(|&i| d.folders[i].name.as_str()),
            LabelSource::Template => self
                .templates
                .get(&id)
                .map(|&i| d.templates[i].name.as_str()),
            LabelSource::WorkflowState => self
                .workflow_states
                .get(&id)
                .map(|&i| d.workflow_states[i].name.as_str()),
            LabelSource::Integration => self
                .integrations
                .get(&id)
                .map(|&i| d.integrations[i].name.as_str()),
            LabelSource::Run => self.runs.get(&id).map(|&i| d.runs[i].name.as_str()),
            LabelSource::Case => self.cases.get(&id).map(|&i| d.cases[i].name.as_str()),
        }
    }

    fn named(&self, source: LabelSource, id: Id) -> NamedRef {
        NamedRef {
            id,
            name: self.label(source, id).unwrap_or_default().to_string(),
        }
    }

    fn named_opt(&self, source: LabelSource, id: Option<Id>) -> Option<NamedRef> {
        id.map(|id| self.named(source, id))
    }

    fn hydrate(&self, node: Node<'_>) -> Option<Record> {
        let record = match node {
            Node::Execution(e) => {
                let run_case = self
                    .run_cases
                    .get(&e.run_case_id)
                    .map(|&i| &self.data.run_cases[i]);
                let run = run_case
                    .and_then(|rc| self.runs.get(&rc.run_id))
                    .map(|&i| &self.data.runs[i]);
                Record::Execution(ExecutionView {
                    id: e.id,
                    executed_at: e.executed_at,
                    elapsed_secs: e.elapsed_secs,
                    attempt: e.attempt,
                    status: self.named(LabelSource::Status, e.status_id),
                    executor: self.named(LabelSource::User, e.executor_id),
                    run_case_id: e.run_case_id,
                    run: run.map(|r| self.named(LabelSource::Run, r.id)),
                    case: run_case.map(|rc| self.named(LabelSource::Case, rc.case_id)),
                    configuration: run.and_then(|r| {
                        self.named_opt(LabelSource::Configuration, r.configuration_id)
                    }),
                    milestone: run
                        .and_then(|r| self.named_opt(LabelSource::Milestone, r.milestone_id)),
                })
            }
            Node::Run(r) => Record::Run(RunView {
                id: r.id,
                name: r.name.clone(),
                created_at: r.created_at,
                is_completed: r.is_completed,
                project: self.named(LabelSource::Project, r.project_id),
                creator: self.named(LabelSource::User, r.creator_id),
                configuration: self.named_opt(LabelSource::Configuration, r.configuration_id),
                milestone: self.named_opt(LabelSource::Milestone, r.milestone_id),
                state: self.named_opt(LabelSource::WorkflowState, r.state_id),
            }),
            Node::Case(c) => Record::Case(CaseView {
                id: c.id,
                name: c.name.clone(),
                created_at: c.created_at,
                source: c.source,
                step_count: c.step_count,
                project: self.named(LabelSource::Project, c.project_id),
                creator: self.named(LabelSource::User, c.creator_id),
                folder: self.named_opt(LabelSource::Folder, c.folder_id),
                template: self.named_opt(LabelSource::Template, c.template_id),
                state: self.named_opt(LabelSource::WorkflowState, c.state_id),
            }),
            Node::Session(s) => Record::Session(SessionView {
                id: s.id,
                name: s.name.clone(),
                created_at: s.created_at,
                elapsed_secs: s.elapsed_secs,
                project: self.named(LabelSource::Project, s.project_id),
                creator: self.named(LabelSource::User, s.creator_id),
                state: self.named_opt(LabelSource::WorkflowState, s.state_id),
                template: self.named_opt(LabelSource::Template, s.template_id),
                milestone: self.named_opt(LabelSource::Milestone, s.milestone_id),
                configuration: self.named_opt(LabelSource::Configuration, s.configuration_id),
            }),
            Node::SessionResult(r) => Record::SessionResult(SessionResultView {
                id: r.id,
                created_at: r.created_at,
                elapsed_secs: r.elapsed_secs,
                session: self.sessions.get(&r.session_id).map(|&i| NamedRef {
                    id: r.session_id,
                    name: self.data.sessions[i].name.clone(),
                }),
                status: self.named_opt(LabelSource::Status, r.status_id),
                creator: self.named(LabelSource::User, r.creator_id),
            }),
            Node::Issue(i) => Record::Issue(IssueView {
                id: i.id,
                title: i.title.clone(),
                created_at: i.created_at,
                issue_type: i.issue_type.clone(),
                external_key: i.external_key.clone(),
                project: self.named(LabelSource::Project, i.project_id),
                creator: self.named(LabelSource::User, i.creator_id),
                integration: self.named_opt(LabelSource::Integration, i.integration_id),
            }),
            Node::RunCase(_) | Node::Status(_) => return None,
        };
        Some(record)
    }
}

// ============================================================================
// Group State
// ============================================================================

#[derive(Default)]
struct GroupState {
    rows: u64,
    sum: f64,
    values: u64,
    distinct: HashSet<Value>,
}

impl GroupState {
    fn add(&mut self, value: Option<Value>, aggregate: &Aggregate) {
        self.rows += 1;
        match aggregate {
            Aggregate::Count => {}
            Aggregate::CountDistinct(_) => {
                if let Some(v) = value {
                    self.distinct.insert(v);
                }
            }
            Aggregate::Sum(_) | Aggregate::Avg(_) => {
                if let Some(x) = value.and_then(|v| v.as_f64()) {
                    self.sum += x;
                    self.values += 1;
                }
            }
        }
    }

    fn finish(&self, aggregate: &Aggregate) -> f64 {
        match aggregate {
            Aggregate::Count => self.rows as f64,
            Aggregate::CountDistinct(_) => self.distinct.len() as f64,
            Aggregate::Sum(_) => self.sum,
            Aggregate::Avg(_) => {
                if self.values == 0 {
                    0.0
                } else {
                    self.sum / self.values as f64
                }
            }
        }
    }
}

fn aggregate_field(aggregate: &Aggregate) -> Option<&FieldPath> {
    match aggregate {
        Aggregate::Count => None,
        Aggregate::CountDistinct(f) | Aggregate::Sum(f) | Aggregate::Avg(f) => Some(f),
    }
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Report store over an in-memory dataset snapshot
pub struct InMemoryStore {
    tables: RwLock<Tables>,
    latency: Option<Duration>,
    queries: AtomicU64,
}

impl InMemoryStore {
    /// Create a store serving the given dataset
    pub fn new(dataset: Dataset) -> Self {
        Self {
            tables: RwLock::new(Tables::new(dataset)),
            latency: None,
            queries: AtomicU64::new(0),
        }
    }

    /// Load a dataset from a JSON file
    pub fn from_json_file(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::new(Dataset::from_json(&contents)?))
    }

    /// Delay every call by `latency` (simulates a slow backend)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Mutate the dataset in place and rebuild indexes
    pub fn update<F: FnOnce(&mut Dataset)>(&self, f: F) {
        let mut tables = self.tables.write();
        let mut data = std::mem::take(&mut tables.data);
        f(&mut data);
        *tables = Tables::new(data);
    }

    /// Number of store calls served
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Ids of every project in the dataset
    pub fn project_ids(&self) -> Vec<Id> {
        self.tables.read().data.projects.iter().map(|p| p.id).collect()
    }

    async fn begin(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ReportStore for InMemoryStore {
    fn store_id(&self) -> &str {
        "in-memory"
    }

    async fn group_by(&self, query: &GroupQuery) -> Result<Vec<GroupRow>, StoreError> {
        self.begin().await;
        let tables = self.tables.read();

        let mut index: HashMap<Vec<Option<Value>>, usize> = HashMap::new();
        let mut groups: Vec<(Vec<Option<Value>>, GroupState)> = Vec::new();
        let field = aggregate_field(&query.aggregate);

        for node in tables.matching(query.entity, &query.filter)? {
            let mut key = Vec::with_capacity(query.keys.len());
            for expr in &query.keys {
                let value = tables.resolve(node, &expr.field)?;
                key.push(match expr.bucket {
                    Bucket::Value => value,
                    Bucket::Day => value
                        .and_then(|v| v.as_time())
                        .map(|ts| Value::Time(truncate_to_day(ts))),
                });
            }

            let slot = match index.get(&key) {
                Some(&slot) => slot,
                None => {
                    groups.push((key.clone(), GroupState::default()));
                    index.insert(key, groups.len() - 1);
                    groups.len() - 1
                }
            };

            let value = match field {
                Some(f) => tables.resolve(node, f)?,
                None => None,
            };
            groups[slot].1.add(value, &query.aggregate);
        }

        debug!(
            entity = %query.entity,
            groups = groups.len(),
            "in-memory group_by complete"
        );

        Ok(groups
            .into_iter()
            .map(|(keys, state)| GroupRow {
                keys,
                value: state.finish(&query.aggregate),
                rows: state.rows,
            })
            .collect())
    }

    async fn count(&self, entity: Entity, filter: &Predicate) -> Result<u64, StoreError> {
        self.begin().await;
        let tables = self.tables.read();
        Ok(tables.matching(entity, filter)?.len() as u64)
    }

    async fn distinct(
        &self,
        entity: Entity,
        filter: &Predicate,
        field: &FieldPath,
    ) -> Result<Vec<Value>, StoreError> {
        self.begin().await;
        let tables = self.tables.read();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for node in tables.matching(entity, filter)? {
            if let Some(value) = tables.resolve(node, field)? {
                if seen.insert(value.clone()) {
                    out.push(value);
                }
            }
        }
        Ok(out)
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Record>, StoreError> {
        self.begin().await;
        let tables = self.tables.read();

        let mut rows: Vec<(Option<DateTime<Utc>>, Id, Node<'_>)> = Vec::new();
        for node in tables.matching(request.entity, &request.filter)? {
            let ts = tables
                .resolve(node, &request.order_by)?
                .and_then(|v| v.as_time());
            rows.push((ts, node.id(), node));
        }
        rows.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));

        Ok(rows
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .filter_map(|(_, _, node)| tables.hydrate(node))
            .collect())
    }

    async fn labels(
        &self,
        source: LabelSource,
        ids: &[Id],
    ) -> Result<HashMap<Id, String>, StoreError> {
        self.begin().await;
        let tables = self.tables.read();
        Ok(ids
            .iter()
            .filter_map(|&id| tables.label(source, id).map(|name| (id, name.to_string())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaseSource, NamedEntity, Project, User};
    use crate::store::GroupExpr;
    use chrono::TimeZone;

    fn ts(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn dataset() -> Dataset {
        let mut d = Dataset::default();
        d.projects = vec![
            Project { id: 1, name: "Alpha".into() },
            Project { id: 2, name: "Beta".into() },
        ];
        d.users = vec![User { id: 10, name: "ada".into() }];
        d.statuses = vec![
            Status { id: 1, name: "Passed".into(), is_success: true, is_untested: false },
            Status { id: 2, name: "Failed".into(), is_success: false, is_untested: false },
        ];
        d.configurations = vec![NamedEntity { id: 5, name: "Chrome".into() }];
        d.runs = vec![
            Run {
                id: 100,
                name: "Smoke".into(),
                project_id: 1,
                state_id: None,
                configuration_id: Some(5),
                milestone_id: None,
                creator_id: 10,
                created_at: ts(1, 8),
                is_completed: false,
                is_deleted: false,
            },
            Run {
                id: 101,
                name: "Nightly".into(),
                project_id: 2,
                state_id: None,
                configuration_id: None,
                milestone_id: None,
                creator_id: 10,
                created_at: ts(1, 9),
                is_completed: false,
                is_deleted: false,
            },
        ];
        d.cases = vec![RepositoryCase {
            id: 50,
            name: "Login".into(),
            project_id: 2,
            folder_id: None,
            creator_id: 10,
            template_id: None,
            state_id: None,
            source: CaseSource::Manual,
            step_count: 3,
            created_at: ts(1, 7),
            is_deleted: false,
        }];
        d.run_cases = vec![
            RunCaseEntry { id: 1000, run_id: 100, case_id: 50, order: 0 },
            RunCaseEntry { id: 1001, run_id: 101, case_id: 50, order: 0 },
        ];
        d.executions = vec![
            ExecutionRecord {
                id: 1,
                run_case_id: 1000,
                status_id: 1,
                executor_id: 10,
                executed_at: ts(2, 10),
                elapsed_secs: Some(30),
                attempt: 1,
                is_deleted: false,
            },
            ExecutionRecord {
                id: 2,
                run_case_id: 1000,
                status_id: 2,
                executor_id: 10,
                executed_at: ts(2, 23),
                elapsed_secs: None,
                attempt: 2,
                is_deleted: false,
            },
            ExecutionRecord {
                id: 3,
                run_case_id: 1001,
                status_id: 1,
                executor_id: 10,
                executed_at: ts(3, 1),
                elapsed_secs: Some(10),
                attempt: 1,
                is_deleted: false,
            },
        ];
        d
    }

    const RUN_PROJECT: FieldPath = FieldPath::via(&[Hop::RunCase, Hop::Run], Attr::ProjectId);
    const CASE_PROJECT: FieldPath = FieldPath::via(&[Hop::RunCase, Hop::Case], Attr::ProjectId);
    const CONFIG: FieldPath = FieldPath::via(&[Hop::RunCase, Hop::Run], Attr::ConfigurationId);

    #[tokio::test]
    async fn test_project_follows_run_not_case() {
        let store = InMemoryStore::new(dataset());
        let by_run = store
            .count(Entity::Execution, &Predicate::Eq(RUN_PROJECT, Value::Id(1)))
            .await
            .unwrap();
        let by_case = store
            .count(Entity::Execution, &Predicate::Eq(CASE_PROJECT, Value::Id(1)))
            .await
            .unwrap();
        assert_eq!(by_run, 2);
        assert_eq!(by_case, 0);
    }

    #[tokio::test]
    async fn test_group_by_null_bucket_and_day() {
        let store = InMemoryStore::new(dataset());
        let rows = store
            .group_by(&GroupQuery {
                entity: Entity::Execution,
                filter: Predicate::all(),
                keys: vec![GroupExpr {
                    field: CONFIG,
                    bucket: Bucket::Value,
                }],
                aggregate: Aggregate::Count,
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].keys, vec![Some(Value::Id(5))]);
        assert_eq!(rows[0].value, 2.0);
        assert_eq!(rows[1].keys, vec![None]);
        assert_eq!(rows[1].value, 1.0);

        let rows = store
            .group_by(&GroupQuery {
                entity: Entity::Execution,
                filter: Predicate::all(),
                keys: vec![GroupExpr {
                    field: FieldPath::attr(Attr::ExecutedAt),
                    bucket: Bucket::Day,
                }],
                aggregate: Aggregate::Avg(FieldPath::attr(Attr::ElapsedSecs)),
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].keys, vec![Some(Value::Time(ts(2, 0)))]);
        // null elapsed is skipped by the average
        assert_eq!(rows[0].value, 30.0);
        assert_eq!(rows[0].rows, 2);
    }

    #[tokio::test]
    async fn test_count_distinct_and_distinct_agree() {
        let store = InMemoryStore::new(dataset());
        let run_id = FieldPath::via(&[Hop::RunCase], Attr::RunId);
        let rows = store
            .group_by(&GroupQuery {
                entity: Entity::Execution,
                filter: Predicate::all(),
                keys: vec![],
                aggregate: Aggregate::CountDistinct(run_id),
            })
            .await
            .unwrap();
        let distinct = store
            .distinct(Entity::Execution, &Predicate::all(), &run_id)
            .await
            .unwrap();
        assert_eq!(rows[0].value, 2.0);
        assert_eq!(distinct, vec![Value::Id(100), Value::Id(101)]);
    }

    #[tokio::test]
    async fn test_fetch_page_orders_desc_and_hydrates() {
        let store = InMemoryStore::new(dataset());
        let page = store
            .fetch_page(&PageRequest {
                entity: Entity::Execution,
                filter: Predicate::all(),
                order_by: FieldPath::attr(Attr::ExecutedAt),
                offset: 0,
                limit: 2,
            })
            .await
            .unwrap();
        assert_eq!(page.iter().map(Record::id).collect::<Vec<_>>(), vec![3, 2]);
        match &page[1] {
            Record::Execution(view) => {
                assert_eq!(view.status.name, "Failed");
                assert_eq!(view.configuration.as_ref().unwrap().name, "Chrome");
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_field_is_an_error() {
        let store = InMemoryStore::new(dataset());
        let bogus = FieldPath::via(&[Hop::Session], Attr::ProjectId);
        let err = store
            .count(Entity::Execution, &Predicate::IsNull(bogus))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnreachableField { .. }));
    }

    #[tokio::test]
    async fn test_update_reindexes() {
        let store = InMemoryStore::new(dataset());
        store.update(|d| d.executions.retain(|e| e.id != 3));
        let total = store
            .count(Entity::Execution, &Predicate::all())
            .await
            .unwrap();
        assert_eq!(total, 2);
        assert!(store.query_count() >= 1);
    }
}
