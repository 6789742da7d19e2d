//! Deterministic demo dataset
//!
//! Used by the server when no fixture is configured, by the consistency
//! checker and by the benches. The same `(seed, scale)` always yields the
//! same dataset. It covers every null bucket, soft deletes, untested
//! placeholders and runs that link cases from another project.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::types::{
    CaseSource, Dataset, ExecutionRecord, Id, Issue, Milestone, NamedEntity, Project,
    RepositoryCase, Run, RunCaseEntry, Session, SessionResult, Status, User,
};

/// Size knobs for the generated dataset
#[derive(Debug, Clone, Copy)]
pub struct SeedOptions {
    /// RNG seed
    pub seed: u64,
    /// Number of projects
    pub projects: usize,
    /// Runs per project
    pub runs_per_project: usize,
    /// Repository cases per project
    pub cases_per_project: usize,
    /// Days the timestamps are spread over
    pub days: i64,
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            seed: 42,
            projects: 3,
            runs_per_project: 4,
            cases_per_project: 12,
            days: 10,
        }
    }
}

impl SeedOptions {
    /// Scale the default options by `factor` (benches)
    pub fn scaled(factor: usize) -> Self {
        let factor = factor.max(1);
        let base = Self::default();
        Self {
            runs_per_project: base.runs_per_project * factor,
            cases_per_project: base.cases_per_project * factor,
            ..base
        }
    }
}

/// Pick an optional id from `1..=n`, absent `none_percent` of the time
fn maybe(rng: &mut StdRng, n: u64, none_percent: u32) -> Option<Id> {
    if chance(rng, none_percent) {
        None
    } else {
        Some(rng.random_range(1..=n))
    }
}

fn chance(rng: &mut StdRng, percent: u32) -> bool {
    rng.random_ratio(percent, 100)
}

fn named(names: &[&str]) -> Vec<NamedEntity> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| NamedEntity {
            id: i as Id + 1,
            name: (*name).to_string(),
        })
        .collect()
}

const USERS: u64 = 5;
const CONFIGURATIONS: u64 = 3;
const FOLDERS: u64 = 4;
const TEMPLATES: u64 = 2;
const STATES: u64 = 3;
const INTEGRATIONS: u64 = 1;

/// Status ids used by the generator
pub mod status {
    use crate::types::Id;

    /// Passed (success)
    pub const PASSED: Id = 1;
    /// Failed
    pub const FAILED: Id = 2;
    /// Blocked
    pub const BLOCKED: Id = 3;
    /// Retest
    pub const RETEST: Id = 4;
    /// Untested placeholder
    pub const UNTESTED: Id = 5;
}

/// Lookup statuses shared by every generated dataset
pub fn statuses() -> Vec<Status> {
    let status = |id, name: &str, is_success, is_untested| Status {
        id,
        name: name.to_string(),
        is_success,
        is_untested,
    };
    vec![
        status(status::PASSED, "Passed", true, false),
        status(status::FAILED, "Failed", false, false),
        status(status::BLOCKED, "Blocked", false, false),
        status(status::RETEST, "Retest", false, false),
        status(status::UNTESTED, "Untested", false, true),
    ]
}

/// Generate the default demo dataset
pub fn demo_dataset() -> Dataset {
    generate(SeedOptions::default())
}

/// Generate a dataset for the given options
pub fn generate(options: SeedOptions) -> Dataset {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let epoch: DateTime<Utc> = Utc
        .with_ymd_and_hms(2024, 3, 1, 0, 0, 0)
        .single()
        .unwrap_or_default();
    let days = options.days.max(1);
    let at = |rng: &mut StdRng| {
        epoch
            + Duration::days(rng.random_range(0..days))
            + Duration::minutes(rng.random_range(0..24 * 60))
    };

    let mut d = Dataset {
        users: (1..=USERS)
            .map(|id| User {
                id,
                name: format!("user-{}", id),
            })
            .collect(),
        statuses: statuses(),
        configurations: named(&["Chrome", "Firefox", "Safari"]),
        folders: named(&["Auth", "Billing", "Search", "Settings"]),
        templates: named(&["Default", "BDD"]),
        workflow_states: named(&["Draft", "Active", "Done"]),
        integrations: named(&["Jira"]),
        ..Dataset::default()
    };

    let mut next_run_case: Id = 1;
    let mut next_execution: Id = 1;
    let mut next_result: Id = 1;

    for p in 0..options.projects {
        let project_id = p as Id + 1;
        d.projects.push(Project {
            id: project_id,
            name: format!("Project {}", project_id),
        });

        for m in 0..2 {
            d.milestones.push(Milestone {
                id: project_id * 10 + m,
                name: format!("P{} M{}", project_id, m + 1),
                project_id,
                is_completed: m == 0,
                is_started: true,
            });
        }

        let first_case = d.cases.len() as Id + 1;
        for _ in 0..options.cases_per_project {
            let id = d.cases.len() as Id + 1;
            let source = match rng.random_range(0..3) {
                0 => CaseSource::Junit,
                1 => CaseSource::Api,
                _ => CaseSource::Manual,
            };
            d.cases.push(RepositoryCase {
                id,
                name: format!("Case {}", id),
                project_id,
                folder_id: maybe(&mut rng, FOLDERS, 15),
                creator_id: rng.random_range(1..=USERS),
                template_id: maybe(&mut rng, TEMPLATES, 20),
                state_id: maybe(&mut rng, STATES, 20),
                source,
                step_count: rng.random_range(0..8) as u32,
                created_at: at(&mut rng),
                is_deleted: chance(&mut rng, 5),
            });
        }
        let last_case = d.cases.len() as Id;

        for _ in 0..options.runs_per_project {
            let run_id = d.runs.len() as Id + 1;
            d.runs.push(Run {
                id: run_id,
                name: format!("Run {}", run_id),
                project_id,
                state_id: maybe(&mut rng, STATES, 20),
                configuration_id: maybe(&mut rng, CONFIGURATIONS, 25),
                milestone_id: if chance(&mut rng, 30) {
                    None
                } else {
                    Some(project_id * 10 + rng.random_range(0..2))
                },
                creator_id: rng.random_range(1..=USERS),
                created_at: at(&mut rng),
                is_completed: chance(&mut rng, 50),
                is_deleted: chance(&mut rng, 8),
            });

            let linked = 3 + rng.random_range(0..4);
            for order in 0..linked {
                // occasionally link a case owned by another project
                let case_id = if first_case > 1 && chance(&mut rng, 10) {
                    rng.random_range(1..first_case)
                } else if last_case >= first_case {
                    rng.random_range(first_case..=last_case)
                } else {
                    continue;
                };
                let run_case_id = next_run_case;
                next_run_case += 1;
                d.run_cases.push(RunCaseEntry {
                    id: run_case_id,
                    run_id,
                    case_id,
                    order: order as u32,
                });

                let attempts = 1 + rng.random_range(0..3);
                for attempt in 0..attempts {
                    let status_id = match rng.random_range(0..10) {
                        0..=4 => status::PASSED,
                        5 | 6 => status::FAILED,
                        7 => status::BLOCKED,
                        8 => status::RETEST,
                        _ => status::UNTESTED,
                    };
                    d.executions.push(ExecutionRecord {
                        id: next_execution,
                        run_case_id,
                        status_id,
                        executor_id: rng.random_range(1..=USERS),
                        executed_at: at(&mut rng),
                        elapsed_secs: if chance(&mut rng, 15) {
                            None
                        } else {
                            Some(5 + rng.random_range(0..600))
                        },
                        attempt: attempt as u32 + 1,
                        is_deleted: chance(&mut rng, 4),
                    });
                    next_execution += 1;
                }
            }
        }

        for _ in 0..3 {
            let session_id = d.sessions.len() as Id + 1;
            d.sessions.push(Session {
                id: session_id,
                name: format!("Session {}", session_id),
                project_id,
                creator_id: rng.random_range(1..=USERS),
                state_id: maybe(&mut rng, STATES, 25),
                template_id: maybe(&mut rng, TEMPLATES, 25),
                milestone_id: if chance(&mut rng, 40) {
                    None
                } else {
                    Some(project_id * 10 + rng.random_range(0..2))
                },
                configuration_id: maybe(&mut rng, CONFIGURATIONS, 30),
                elapsed_secs: if chance(&mut rng, 20) {
                    None
                } else {
                    Some(300 + rng.random_range(0..3600))
                },
                created_at: at(&mut rng),
                is_deleted: chance(&mut rng, 10),
            });

            for _ in 0..rng.random_range(0..5) {
                d.session_results.push(SessionResult {
                    id: next_result,
                    session_id,
                    status_id: if chance(&mut rng, 20) {
                        None
                    } else {
                        Some(rng.random_range(1..=4))
                    },
                    creator_id: rng.random_range(1..=USERS),
                    elapsed_secs: Some(rng.random_range(0..900)),
                    created_at: at(&mut rng),
                    is_deleted: chance(&mut rng, 5),
                });
                next_result += 1;
            }
        }

        for _ in 0..5 {
            let id = d.issues.len() as Id + 1;
            let integration_id = maybe(&mut rng, INTEGRATIONS, 40);
            d.issues.push(Issue {
                id,
                title: format!("Issue {}", id),
                project_id,
                creator_id: rng.random_range(1..=USERS),
                issue_type: match rng.random_range(0..4) {
                    0 => None,
                    1 => Some("Task".to_string()),
                    _ => Some("Bug".to_string()),
                },
                external_key: integration_id.map(|_| format!("QA-{}", 100 + id)),
                integration_id,
                created_at: at(&mut rng),
                is_deleted: chance(&mut rng, 5),
            });
        }
    }

    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_is_deterministic() {
        let a = demo_dataset();
        let b = demo_dataset();
        assert_eq!(a.executions.len(), b.executions.len());
        assert_eq!(
            a.executions.iter().map(|e| e.executed_at).collect::<Vec<_>>(),
            b.executions.iter().map(|e| e.executed_at).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_seed_changes_dataset() {
        let timestamps = |seed| {
            generate(SeedOptions {
                seed,
                ..SeedOptions::default()
            })
            .executions
            .iter()
            .map(|e| e.executed_at)
            .collect::<Vec<_>>()
        };
        assert_eq!(timestamps(7), timestamps(7));
        assert_ne!(timestamps(7), timestamps(8));
    }

    #[test]
    fn test_demo_covers_edge_cases() {
        let d = demo_dataset();
        assert_eq!(d.projects.len(), 3);
        assert!(d.runs.iter().any(|r| r.configuration_id.is_none()));
        assert!(d.cases.iter().any(|c| c.folder_id.is_none()));
        assert!(d.executions.iter().any(|e| e.status_id == status::UNTESTED));
        assert!(d.executions.iter().any(|e| e.is_deleted));
        assert!(d.issues.iter().any(|i| i.external_key.is_some()));
    }

    #[test]
    fn test_scaled_grows() {
        let small = generate(SeedOptions::default());
        let large = generate(SeedOptions::scaled(4));
        assert!(large.executions.len() > small.executions.len());
    }
}
