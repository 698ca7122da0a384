use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use jobsched::{
    ExpectedVersion, InMemoryJobStore, Job, JobId, JobStatus, JobStore, StoreError, StoredJob,
    Version,
};
use parking_lot::Mutex;

/// Job store whose reads and writes can be made to fail on demand.
///
/// Wraps an [`InMemoryJobStore`]; when no fault is armed it behaves exactly
/// like it.
#[derive(Clone, Default)]
pub struct FlakyJobStore {
    inner: InMemoryJobStore,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    fail_writes_of: Arc<Mutex<Option<JobStatus>>>,
    writes: Arc<AtomicUsize>,
}

impl FlakyJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The healthy store underneath, for direct inspection.
    pub fn inner(&self) -> &InMemoryJobStore {
        &self.inner
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail only writes that move a job to `status`.
    pub fn fail_writes_of(&self, status: JobStatus) {
        *self.fail_writes_of.lock() = Some(status);
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for FlakyJobStore {
    async fn get(&self, job_id: JobId) -> Result<Option<StoredJob>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read fault".to_string()));
        }
        self.inner.get(job_id).await
    }

    async fn save(&self, job: &Job, expected: ExpectedVersion) -> Result<Version, StoreError> {
        let targeted = *self.fail_writes_of.lock() == Some(job.status);
        if self.fail_writes.load(Ordering::SeqCst) || targeted {
            return Err(StoreError::Unavailable(format!(
                "injected write fault ({})",
                job.status
            )));
        }
        let version = self.inner.save(job, expected).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(version)
    }
}
