//! Aggregate / drill-down consistency over generated datasets
//!
//! Runs the full consistency checker (every report type, every single
//! dimension and every dimension pair) and a few targeted checks for the
//! null bucket and cross-project case links.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use report_engine::{
    report::{
        conformance::ConformanceChecker, drill_down::context_for_row, AggregateRequest,
        DimensionId, DrillDownRequest, GroupKey, MetricId, ReportKind,
    },
    store::seed::{demo_dataset, generate, SeedOptions},
    EngineConfig, InMemoryStore, ReportEngine, ReportType,
};
use serde_json::json;

fn engine_over(store: InMemoryStore) -> ReportEngine {
    ReportEngine::new(Arc::new(store), EngineConfig::default())
}

#[tokio::test]
async fn test_demo_dataset_passes_every_check() {
    let store = InMemoryStore::new(demo_dataset());
    let projects = store.project_ids();
    let checker = ConformanceChecker::new(engine_over(store));

    let report = checker.check_all(&projects).await.unwrap();
    assert!(report.checked > 100, "only {} checks ran", report.checked);
    for violation in &report.violations {
        eprintln!("{}", violation);
    }
    assert!(report.is_consistent());
}

#[tokio::test]
async fn test_other_seeds_pass_every_check() {
    for seed in [7, 1234] {
        let store = InMemoryStore::new(generate(SeedOptions {
            seed,
            ..SeedOptions::default()
        }));
        let projects = store.project_ids();
        let report = ConformanceChecker::new(engine_over(store))
            .check_all(&projects)
            .await
            .unwrap();
        assert!(report.is_consistent(), "seed {}: {:?}", seed, report.violations);
    }
}

#[tokio::test]
async fn test_date_window_passes_every_check() {
    let store = InMemoryStore::new(demo_dataset());
    let projects = store.project_ids();
    let report = ConformanceChecker::new(engine_over(store))
        .with_date_range(Some("2024-03-03".into()), Some("2024-03-07T12:00:00Z".into()))
        .check_all(&projects)
        .await
        .unwrap();
    assert!(report.checked > 100, "only {} checks ran", report.checked);
    assert!(report.is_consistent(), "{:?}", report.violations);
}

#[tokio::test]
async fn test_date_bounded_session_results_drill_down() {
    let engine = engine_over(InMemoryStore::new(demo_dataset()));
    let report = ReportType::cross_project(ReportKind::SessionAnalysis);
    let request = AggregateRequest {
        dimensions: vec!["date".into()],
        metrics: vec!["sessionResultCount".into()],
        start_date: Some("2024-03-03".into()),
        end_date: Some("2024-03-07".into()),
        ..AggregateRequest::default()
    };
    let rows = engine.aggregate(report, &request).await.unwrap();

    let first: DateTime<Utc> = "2024-03-03T00:00:00Z".parse().unwrap();
    let last: DateTime<Utc> = "2024-03-07T00:00:00Z".parse().unwrap();
    for row in &rows {
        let day = row.key(DimensionId::Date).and_then(GroupKey::day).unwrap();
        assert!(day >= first && day <= last, "{} outside the window", day);

        let context = context_for_row(report, &request, MetricId::SessionResultCount, row);
        let page = engine
            .resolver()
            .resolve(&DrillDownRequest {
                context,
                ..DrillDownRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(Some(page.total as f64), row.metric(MetricId::SessionResultCount));
    }
}

#[tokio::test]
async fn test_null_bucket_drills_into_null_rows() {
    let engine = engine_over(InMemoryStore::new(demo_dataset()));
    let report = ReportType::cross_project(ReportKind::RepositoryStats);
    let rows = engine
        .aggregate(
            report,
            &AggregateRequest {
                dimensions: vec!["folder".into()],
                metrics: vec!["testCaseCount".into()],
                ..AggregateRequest::default()
            },
        )
        .await
        .unwrap();

    let none = rows
        .iter()
        .find(|r| r.key(DimensionId::Folder) == Some(&GroupKey::None))
        .expect("demo dataset has cases without a folder");
    let value = none.metric(MetricId::TestCaseCount).unwrap();
    assert!(value > 0.0);

    let request: DrillDownRequest = serde_json::from_value(json!({
        "context": {
            "reportType": "cross-project-repository-stats",
            "metricId": "testCaseCount",
            "dimensions": {"folder": {"id": null, "name": "None"}}
        }
    }))
    .unwrap();
    let page = engine.resolver().resolve(&request).await.unwrap();
    assert_eq!(page.total as f64, value);
}

#[tokio::test]
async fn test_grand_total_matches_sum_over_projects() {
    let store = InMemoryStore::new(demo_dataset());
    let projects = store.project_ids();
    let engine = engine_over(store);

    let request = |project_id: Option<u64>, dimensions: Vec<String>| AggregateRequest {
        project_id,
        dimensions,
        metrics: vec!["testResults".into()],
        ..AggregateRequest::default()
    };

    let cross = engine
        .aggregate(
            ReportType::cross_project(ReportKind::TestExecution),
            &request(None, vec![]),
        )
        .await
        .unwrap();
    let grand = cross[0].metric(MetricId::TestResults).unwrap();

    let mut per_project = 0.0;
    for project in projects {
        let rows = engine
            .aggregate(
                ReportType::project(ReportKind::TestExecution),
                &request(Some(project), vec![]),
            )
            .await
            .unwrap();
        per_project += rows
            .first()
            .and_then(|r| r.metric(MetricId::TestResults))
            .unwrap_or(0.0);
    }
    assert_eq!(grand, per_project);
}
