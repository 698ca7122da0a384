use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::job::{Job, JobId, StoredJob, Version};

/// Condition a write places on the version currently held by the store.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Unconditional upsert.
    Any,
    /// The record must not exist yet.
    Absent,
    /// The record must exist at exactly this version.
    Exactly(Version),
}

impl ExpectedVersion {
    /// Whether a record currently at `current` satisfies the expectation.
    pub fn matches(&self, current: Option<Version>) -> bool {
        match (self, current) {
            (ExpectedVersion::Any, _) => true,
            (ExpectedVersion::Absent, None) => true,
            (ExpectedVersion::Exactly(expected), Some(actual)) => *expected == actual,
            _ => false,
        }
    }
}

impl Display for ExpectedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::Absent => write!(f, "absent"),
            ExpectedVersion::Exactly(v) => write!(f, "v{v}"),
        }
    }
}

/// Keyed persistence for job records.
///
/// `get` returns `Ok(None)` for an unknown id; errors are reserved for
/// faults. `save` is an upsert keyed by job id that only applies when the
/// expected version holds, and returns the version it wrote.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Look up a job and the version it is stored at.
    async fn get(&self, job_id: JobId) -> Result<Option<StoredJob>, StoreError>;

    /// Write a job if the stored version matches `expected`.
    async fn save(&self, job: &Job, expected: ExpectedVersion) -> Result<Version, StoreError>;
}

/// In-process job store backed by a mutex-guarded map.
///
/// The version check and the write happen under one lock, so concurrent
/// conditional writes to the same record serialize and all but one of the
/// racing writers observe a conflict.
#[derive(Clone, Default, Debug)]
pub struct InMemoryJobStore {
    records: Arc<Mutex<HashMap<JobId, StoredJob>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Snapshot of every stored job.
    pub fn jobs(&self) -> Vec<Job> {
        self.records
            .lock()
            .values()
            .map(|stored| stored.job.clone())
            .collect()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, job_id: JobId) -> Result<Option<StoredJob>, StoreError> {
        Ok(self.records.lock().get(&job_id).cloned())
    }

    async fn save(&self, job: &Job, expected: ExpectedVersion) -> Result<Version, StoreError> {
        let mut records = self.records.lock();
        let current = records.get(&job.job_id).map(|stored| stored.version);

        if !expected.matches(current) {
            return Err(StoreError::Conflict {
                job_id: job.job_id,
                expected,
                actual: current,
            });
        }

        let version = current.map_or(1, |v| v + 1);
        records.insert(
            job.job_id,
            StoredJob {
                job: job.clone(),
                version,
            },
        );
        Ok(version)
    }
}
