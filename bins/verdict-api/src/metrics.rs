// Prometheus metrics for the HTTP bridge

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, Encoder, Histogram, IntCounterVec, TextEncoder,
};

lazy_static! {
    pub static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "verdict_executions_total",
        "Execution requests by outcome",
        &["outcome"]
    )
    .expect("metric can be registered");
    pub static ref TEST_CASES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "verdict_test_cases_total",
        "Evaluated test cases by verdict",
        &["verdict"]
    )
    .expect("metric can be registered");
    pub static ref EXECUTION_DURATION_SECONDS: Histogram = register_histogram!(
        "verdict_execution_duration_seconds",
        "Wall-clock time of whole execution requests",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("metric can be registered");
}

/// Record one finished request. `outcome` is `completed` or an error kind.
pub fn record_execution(outcome: &str, passed: usize, failed: usize, seconds: f64) {
    EXECUTIONS_TOTAL.with_label_values(&[outcome]).inc();
    TEST_CASES_TOTAL.with_label_values(&["passed"]).inc_by(passed as u64);
    TEST_CASES_TOTAL.with_label_values(&["failed"]).inc_by(failed as u64);
    EXECUTION_DURATION_SECONDS.observe(seconds);
}

/// Everything in the default registry, in the text exposition format
pub fn render() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
