use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque string parameters carried by a job.
pub type JobParameters = HashMap<String, String>;

/// Unique, immutable job identifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a job.
///
/// `New → Processing → {Completed, Failed}`. `Aborted` is a reserved
/// terminal state for externally triggered cancellation; the transition
/// table admits it but nothing in the scheduler drives a job there.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    New,
    Processing,
    Completed,
    Failed,
    Aborted,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Aborted
        )
    }

    /// Whether the state machine admits a move from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (New, Processing)
                | (New, Aborted)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Aborted)
        )
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a status label does not name a [`JobStatus`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(JobStatus::New),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "aborted" => Ok(JobStatus::Aborted),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A unit of work submitted by an owner.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: JobId,
    pub owner: String,
    pub status: JobStatus,
    #[serde(default)]
    pub parameters: JobParameters,
}

impl Job {
    /// Creates a job in the `New` state with a fresh id.
    pub fn new(owner: impl Into<String>, parameters: JobParameters) -> Self {
        Self {
            job_id: JobId::new(),
            owner: owner.into(),
            status: JobStatus::New,
            parameters,
        }
    }

    /// Returns a copy of this job moved to `status`, or `None` when the
    /// state machine forbids the move.
    pub fn transitioned(&self, status: JobStatus) -> Option<Self> {
        if !self.status.can_transition_to(status) {
            return None;
        }
        Some(Self {
            status,
            ..self.clone()
        })
    }
}

/// Record version assigned by a job store. The first insert yields 1.
pub type Version = u64;

/// A job together with the version the store holds it at.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoredJob {
    pub job: Job,
    pub version: Version,
}
