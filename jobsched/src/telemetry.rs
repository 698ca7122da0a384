//! Tracing and telemetry instrumentation for jobsched.
//!
//! Helpers for the spans wrapped around submissions, processing runs and
//! work execution, plus `record_*` functions that log lifecycle milestones
//! and update Prometheus metrics when the `metrics` feature is enabled.
//! Without the feature the metric side is a no-op.
//!
//! # Example
//!
//! ```ignore
//! use jobsched::telemetry::{process_span, record_job_finished};
//!
//! let span = process_span(job_id.to_string());
//! let _enter = span.enter();
//! // ... drive the job
//! record_job_finished(&job.owner, JobStatus::Completed, elapsed);
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info_span, Instrument, Span};

use crate::job::JobStatus;

/// Create a tracing span for a submission call.
///
/// # Arguments
/// * `owner` - The submitting party
/// * `mode` - `immediate` or `bounded_wait`
#[must_use]
pub fn submit_span(owner: impl AsRef<str>, mode: impl AsRef<str>) -> Span {
    info_span!(
        "jobsched.submit",
        owner = %owner.as_ref(),
        mode = %mode.as_ref(),
    )
}

/// Create a tracing span for one processing run of a job.
#[must_use]
pub fn process_span(job_id: impl AsRef<str>) -> Span {
    info_span!("jobsched.process", job_id = %job_id.as_ref())
}

/// Create a tracing span around the execution of the unit of work.
#[must_use]
pub fn work_span(job_id: impl AsRef<str>, owner: impl AsRef<str>) -> Span {
    info_span!(
        "jobsched.work",
        job_id = %job_id.as_ref(),
        owner = %owner.as_ref(),
    )
}

/// Instrument a future with a work span.
pub fn instrument_work<F>(
    job_id: impl AsRef<str>,
    owner: impl AsRef<str>,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(work_span(job_id, owner))
}

/// Record that a job was created.
pub fn record_job_created(job_id: impl AsRef<str>, owner: impl AsRef<str>) {
    tracing::info!(
        job_id = %job_id.as_ref(),
        owner = %owner.as_ref(),
        "job created"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_job_created(owner.as_ref());
}

/// Record that a job reached a terminal status after `elapsed` of work.
pub fn record_job_finished(owner: impl AsRef<str>, status: JobStatus, elapsed: Duration) {
    tracing::info!(
        owner = %owner.as_ref(),
        status = %status,
        duration_ms = elapsed.as_millis() as u64,
        "job finished"
    );

    #[cfg(feature = "metrics")]
    {
        crate::metrics::record_job_finished(status.as_str());
        crate::metrics::observe_job_duration(status.as_str(), elapsed.as_secs_f64());
    }
}

/// Record how a submission call resolved.
///
/// # Arguments
/// * `mode` - `immediate` or `bounded_wait`
/// * `outcome` - `finished`, `pending` or `error`
pub fn record_submission(mode: &str, outcome: &str) {
    tracing::debug!(mode, outcome, "submission resolved");

    #[cfg(feature = "metrics")]
    crate::metrics::record_submission(mode, outcome);
}

/// Start timing the work step of a job.
pub fn record_work_start(job_id: impl AsRef<str>) -> WorkTimingHandle {
    WorkTimingHandle {
        job_id: job_id.as_ref().to_string(),
        start: Instant::now(),
    }
}

/// Handle for tracking how long a job's work has been running.
#[derive(Debug)]
pub struct WorkTimingHandle {
    job_id: String,
    start: Instant,
}

impl WorkTimingHandle {
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
