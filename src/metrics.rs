//! Prometheus metrics for the report engine
//!
//! Request outcomes per report type, store sub-query latency, store timeouts
//! and drill-down totals that disagree with the value the caller was shown.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};

use crate::report::ReportType;

/// `report_type` label for requests whose report id did not parse
pub const UNKNOWN_REPORT_TYPE: &str = "unknown";

lazy_static! {
    // === Request Counters ===

    /// Aggregate and drill-down requests
    pub static ref REPORT_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "reports_requests_total",
        "Total report requests by operation, report type and outcome",
        &["operation", "report_type", "outcome"]
    ).unwrap();

    /// Rows returned by aggregate requests
    pub static ref AGGREGATE_ROWS_TOTAL: CounterVec = register_counter_vec!(
        "reports_aggregate_rows_total",
        "Total aggregate rows returned by report type",
        &["report_type"]
    ).unwrap();

    // === Latency Histograms ===

    /// Store call duration
    pub static ref STORE_QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "reports_store_query_duration_seconds",
        "Data store call latency in seconds",
        &["operation"],
        vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();

    // === Error Counters ===

    /// Store calls that hit the deadline
    pub static ref STORE_TIMEOUTS_TOTAL: CounterVec = register_counter_vec!(
        "reports_store_timeouts_total",
        "Total data store calls that exceeded the query timeout",
        &["operation"]
    ).unwrap();

    /// Drill-down totals that differ from the aggregate value sent by the caller
    pub static ref DRILL_DOWN_MISMATCHES_TOTAL: CounterVec = register_counter_vec!(
        "reports_drill_down_mismatches_total",
        "Drill-down totals that differ from the supplied metric value",
        &["report_type", "metric"]
    ).unwrap();

    // === System Health ===

    /// Health status (0=unhealthy, 1=healthy)
    pub static ref HEALTH_STATUS: Gauge = register_gauge!(
        "reports_health_status",
        "Service health status (0=unhealthy, 1=healthy)"
    ).unwrap();
}

/// Initialize metrics system
pub fn init() {
    HEALTH_STATUS.set(1.0);
    tracing::info!("Metrics system initialized");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Label value for a report type; only parsed ids become series
fn report_label(report: Option<ReportType>) -> String {
    report.map_or_else(|| UNKNOWN_REPORT_TYPE.to_string(), |r| r.to_string())
}

/// Record the outcome of a report request
#[inline]
pub fn record_request(operation: &str, report: Option<ReportType>, outcome: &str) {
    REPORT_REQUESTS_TOTAL
        .with_label_values(&[operation, &report_label(report), outcome])
        .inc();
}

/// Record rows returned by an aggregate request
#[inline]
pub fn record_rows(report: ReportType, rows: usize) {
    AGGREGATE_ROWS_TOTAL
        .with_label_values(&[&report.to_string()])
        .inc_by(rows as f64);
}

/// Record a store call latency
#[inline]
pub fn record_store_call(operation: &str, duration_secs: f64) {
    STORE_QUERY_DURATION
        .with_label_values(&[operation])
        .observe(duration_secs);
}

/// Record a store timeout
#[inline]
pub fn record_store_timeout(operation: &str) {
    STORE_TIMEOUTS_TOTAL.with_label_values(&[operation]).inc();
}

/// Record a drill-down total that disagreed with the caller's value
#[inline]
pub fn record_drill_down_mismatch(report_type: &str, metric: &str) {
    DRILL_DOWN_MISMATCHES_TOTAL
        .with_label_values(&[report_type, metric])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_recorded_series() {
        let report = ReportType::parse("test-execution").unwrap();
        record_request("aggregate", Some(report), "ok");
        record_store_call("group_by", 0.002);
        let text = gather_metrics().unwrap();
        assert!(text.contains("reports_requests_total"));
        assert!(text.contains("reports_store_query_duration_seconds"));
    }

    #[test]
    fn test_unparsed_report_types_share_one_series() {
        record_request("describe", None, "invalid");
        record_request("describe", None, "invalid");
        let count = REPORT_REQUESTS_TOTAL
            .with_label_values(&["describe", UNKNOWN_REPORT_TYPE, "invalid"])
            .get();
        assert!(count >= 2.0);
        assert_eq!(
            report_label(ReportType::parse("cross-project-issue-tracking").ok()),
            "cross-project-issue-tracking"
        );
    }
}
