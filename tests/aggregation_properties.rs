//! Property tests for the aggregation engine
//!
//! Generated datasets with random seeds; the engine must be insensitive to
//! dimension order and additive counts must partition the grand total.

use std::sync::Arc;

use proptest::prelude::*;
use report_engine::{
    report::{dimension::dimensions_for, AggregateRequest, MetricId, ReportKind, Row},
    store::seed::{generate, SeedOptions},
    EngineConfig, InMemoryStore, ReportEngine, ReportType,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn engine(seed: u64) -> ReportEngine {
    let store = InMemoryStore::new(generate(SeedOptions {
        seed,
        projects: 2,
        ..SeedOptions::default()
    }));
    ReportEngine::new(Arc::new(store), EngineConfig::default())
}

fn request(dimensions: &[&str], metrics: &[&str]) -> AggregateRequest {
    AggregateRequest {
        dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
        metrics: metrics.iter().map(|m| m.to_string()).collect(),
        ..AggregateRequest::default()
    }
}

fn normalized(rows: &[Row]) -> Vec<String> {
    let mut out: Vec<String> = rows
        .iter()
        .map(|r| {
            let value = serde_json::to_value(r).unwrap();
            // serde_json maps are ordered, so this is key-order independent
            serde_json::to_string(&value).unwrap()
        })
        .collect();
    out.sort();
    out
}

fn kind_strategy() -> impl Strategy<Value = ReportKind> {
    prop::sample::select(ReportKind::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_dimension_order_does_not_matter(
        seed in 0u64..10_000,
        kind in kind_strategy(),
        a in 0usize..16,
        b in 0usize..16,
    ) {
        let dims = dimensions_for(kind);
        let (a, b) = (dims[a % dims.len()], dims[b % dims.len()]);
        prop_assume!(a != b);

        let report = ReportType::cross_project(kind);
        let metric = report_engine::report::metric::metrics_for(kind)[0].as_str();
        let engine = engine(seed);
        let rt = runtime();

        let forward = rt
            .block_on(engine.aggregate(report, &request(&[a.as_str(), b.as_str()], &[metric])))
            .unwrap();
        let swapped = rt
            .block_on(engine.aggregate(report, &request(&[b.as_str(), a.as_str()], &[metric])))
            .unwrap();
        prop_assert_eq!(normalized(&forward), normalized(&swapped));
    }

    #[test]
    fn prop_single_dimension_counts_sum_to_total(
        seed in 0u64..10_000,
        dim in 0usize..16,
    ) {
        let kind = ReportKind::TestExecution;
        let dims = dimensions_for(kind);
        let dim = dims[dim % dims.len()];
        let report = ReportType::cross_project(kind);
        let engine = engine(seed);
        let rt = runtime();

        let total = rt
            .block_on(engine.aggregate(report, &request(&[], &["testResults"])))
            .unwrap()
            .first()
            .and_then(|r| r.metric(MetricId::TestResults))
            .unwrap_or(0.0);
        let grouped: f64 = rt
            .block_on(engine.aggregate(report, &request(&[dim.as_str()], &["testResults"])))
            .unwrap()
            .iter()
            .filter_map(|r| r.metric(MetricId::TestResults))
            .sum();
        prop_assert_eq!(grouped, total);
    }
}
