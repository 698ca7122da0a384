//! Prometheus metrics instrumentation for jobsched.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `jobsched_jobs_created_total` - Jobs persisted in the `New` state
//! - `jobsched_jobs_finished_total` - Jobs that reached a terminal state
//! - `jobsched_submissions_total` - Submission calls by mode and outcome
//!
//! ## Histograms
//! - `jobsched_job_duration_seconds` - Work execution duration in seconds
#![cfg(feature = "metrics")]

use prometheus::{exponential_buckets, CounterVec, HistogramVec, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for jobsched metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Counter for jobs created.
///
/// Labels:
/// - `owner`: The submitting party
pub static JOBS_CREATED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("jobsched_jobs_created_total", "Total number of jobs created");
    CounterVec::new(opts, &["owner"]).expect("jobsched_jobs_created_total metric creation failed")
});

/// Counter for jobs reaching a terminal state.
///
/// Labels:
/// - `status`: completed or failed
pub static JOBS_FINISHED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "jobsched_jobs_finished_total",
        "Total number of jobs that reached a terminal state",
    );
    CounterVec::new(opts, &["status"])
        .expect("jobsched_jobs_finished_total metric creation failed")
});

/// Counter for submission calls.
///
/// Labels:
/// - `mode`: immediate or bounded_wait
/// - `outcome`: finished, pending or error
pub static SUBMISSIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("jobsched_submissions_total", "Total number of submissions");
    CounterVec::new(opts, &["mode", "outcome"])
        .expect("jobsched_submissions_total metric creation failed")
});

/// Histogram for work execution duration in seconds.
///
/// Labels:
/// - `status`: completed or failed
pub static JOB_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets = exponential_buckets(0.01, 2.0, 14).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "jobsched_job_duration_seconds",
        "Job work duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["status"])
        .expect("jobsched_job_duration_seconds metric creation failed")
});

/// Initialize all metrics by registering them with the global registry.
///
/// This function is idempotent - calling it multiple times is safe.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_CREATED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_FINISHED_TOTAL.clone()),
        Box::new(SUBMISSIONS_TOTAL.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_job_created(owner: &str) {
    JOBS_CREATED_TOTAL.with_label_values(&[owner]).inc();
}

pub fn record_job_finished(status: &str) {
    JOBS_FINISHED_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_submission(mode: &str, outcome: &str) {
    SUBMISSIONS_TOTAL.with_label_values(&[mode, outcome]).inc();
}

pub fn observe_job_duration(status: &str, duration_secs: f64) {
    JOB_DURATION_SECONDS
        .with_label_values(&[status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
