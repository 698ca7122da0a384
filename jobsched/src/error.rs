use thiserror::Error;

use crate::job::{JobId, JobStatus, Version};
use crate::store::ExpectedVersion;

/// Result type alias for scheduler operations.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

/// Failures reported by a [`JobStore`](crate::store::JobStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("job store unavailable: {0}")]
    Unavailable(String),

    #[error("version conflict on job {job_id}: expected {expected}, found {actual:?}")]
    Conflict {
        job_id: JobId,
        expected: ExpectedVersion,
        actual: Option<Version>,
    },
}

/// Failure reported by an [`EventBus`](crate::events::EventBus).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("publish to {topic} failed: {reason}")]
pub struct PublishError {
    pub topic: String,
    pub reason: String,
}

impl PublishError {
    pub fn new(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the job scheduling service.
///
/// Absence (`NotFound`) and persistence faults (`StoreUnavailable`) are
/// separate outcomes. A duplicate `process` trigger and a bounded wait that
/// runs out of time are not errors at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("version conflict on job {job_id}: expected {expected}, found {actual:?}")]
    Conflict {
        job_id: JobId,
        expected: ExpectedVersion,
        actual: Option<Version>,
    },

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("processing task for job {0} ended abnormally: {1}")]
    TaskAborted(JobId, String),
}

impl SchedulerError {
    /// Short label used for logging and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerError::NotFound(_) => "not_found",
            SchedulerError::StoreUnavailable(_) => "store_unavailable",
            SchedulerError::Conflict { .. } => "conflict",
            SchedulerError::Publish { .. } => "publish_failure",
            SchedulerError::InvalidTransition { .. } => "invalid_transition",
            SchedulerError::TaskAborted(..) => "task_aborted",
        }
    }
}

impl From<StoreError> for SchedulerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Unavailable(reason) => SchedulerError::StoreUnavailable(reason),
            StoreError::Conflict {
                job_id,
                expected,
                actual,
            } => SchedulerError::Conflict {
                job_id,
                expected,
                actual,
            },
        }
    }
}

impl From<PublishError> for SchedulerError {
    fn from(value: PublishError) -> Self {
        SchedulerError::Publish {
            topic: value.topic,
            reason: value.reason,
        }
    }
}
