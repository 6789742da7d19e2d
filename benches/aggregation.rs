//! Aggregation Benchmarks
//!
//! Aggregate and drill-down latency against the in-memory store for
//! increasing dataset sizes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use report_engine::report::{AggregateRequest, DrillDownRequest, ReportKind};
use report_engine::store::seed::{generate, SeedOptions};
use report_engine::{EngineConfig, InMemoryStore, ReportEngine, ReportType};
use std::hint::black_box;
use std::sync::Arc;

// =============================================================================
// Test Data Generators
// =============================================================================

/// Engine over a generated dataset and its execution count
fn create_engine(scale: usize) -> (ReportEngine, usize) {
    let dataset = generate(SeedOptions::scaled(scale));
    let executions = dataset.executions.len();
    let engine = ReportEngine::new(
        Arc::new(InMemoryStore::new(dataset)),
        EngineConfig::default(),
    );
    (engine, executions)
}

fn request(dimensions: &[&str], metrics: &[&str]) -> AggregateRequest {
    AggregateRequest {
        dimensions: dimensions.iter().map(|d| d.to_string()).collect(),
        metrics: metrics.iter().map(|m| m.to_string()).collect(),
        ..AggregateRequest::default()
    }
}

// =============================================================================
// Aggregate Benchmarks
// =============================================================================

fn bench_aggregate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let report = ReportType::cross_project(ReportKind::TestExecution);

    let mut group = c.benchmark_group("aggregate");
    for scale in [1, 4, 16] {
        let (engine, executions) = create_engine(scale);
        group.throughput(Throughput::Elements(executions as u64));

        let by_status = request(&["status"], &["testResults", "passRate"]);
        group.bench_with_input(BenchmarkId::new("status", scale), &by_status, |b, req| {
            b.iter(|| black_box(rt.block_on(engine.aggregate(report, req)).unwrap()))
        });

        let by_pair = request(
            &["project", "date"],
            &["testResults", "passRate", "averageElapsed", "testCaseCount"],
        );
        group.bench_with_input(BenchmarkId::new("project_date", scale), &by_pair, |b, req| {
            b.iter(|| black_box(rt.block_on(engine.aggregate(report, req)).unwrap()))
        });
    }
    group.finish();
}

// =============================================================================
// Drill-down Benchmarks
// =============================================================================

fn bench_drill_down(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("drill_down");
    for scale in [1, 4, 16] {
        let (engine, executions) = create_engine(scale);
        let resolver = engine.resolver();
        group.throughput(Throughput::Elements(executions as u64));

        let page: DrillDownRequest = serde_json::from_value(serde_json::json!({
            "context": {
                "reportType": "cross-project-test-execution",
                "metricId": "testResults",
                "dimensions": {"status": {"id": 1, "name": "Passed"}}
            },
            "limit": 50
        }))
        .unwrap();
        group.bench_with_input(BenchmarkId::new("count_page", scale), &page, |b, req| {
            b.iter(|| black_box(rt.block_on(resolver.resolve(req)).unwrap()))
        });

        let rate: DrillDownRequest = serde_json::from_value(serde_json::json!({
            "context": {
                "reportType": "cross-project-test-execution",
                "metricId": "passRate"
            }
        }))
        .unwrap();
        group.bench_with_input(BenchmarkId::new("rate_breakdown", scale), &rate, |b, req| {
            b.iter(|| black_box(rt.block_on(resolver.resolve(req)).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_aggregate, bench_drill_down);
criterion_main!(benches);
