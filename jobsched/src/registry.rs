use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

use crate::error::{SchedulerError, SchedulerResult};
use crate::job::JobId;
use crate::service::ProcessOutcome;

/// What a registered processing task resolves to.
pub type ProcessResult = SchedulerResult<ProcessOutcome>;

struct InFlight {
    task_id: u64,
    outcome: watch::Receiver<Option<ProcessResult>>,
}

#[derive(Default)]
struct RegistryInner {
    tasks: Mutex<HashMap<JobId, Vec<InFlight>>>,
    next_task_id: AtomicU64,
}

/// Registry of background processing tasks, keyed by job id.
///
/// Tasks are owned by the registry, not by whoever spawned them: dropping a
/// [`TaskWatch`] or abandoning a wait never cancels the task. An entry is
/// removed when its task ends, whether it returned or panicked, and only
/// then; the outcome is published after the entry is gone.
#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` for `job_id` and register it.
    pub fn spawn<F>(&self, job_id: JobId, task: F) -> TaskWatch
    where
        F: Future<Output = ProcessResult> + Send + 'static,
    {
        let task_id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        let deregister = Deregister {
            registry: self.clone(),
            job_id,
            task_id,
        };

        // The task body waits until its entry exists, so deregistration can
        // never run ahead of registration.
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let result = {
                let _deregister = deregister;
                let _ = registered_rx.await;
                task.await
            };
            tx.send_replace(Some(result));
        });
        self.inner
            .tasks
            .lock()
            .entry(job_id)
            .or_default()
            .push(InFlight {
                task_id,
                outcome: rx.clone(),
            });
        let _ = registered_tx.send(());

        TaskWatch {
            job_id,
            outcome: rx,
        }
    }

    /// Watch the oldest in-flight task of `job_id`, if any.
    pub fn watch(&self, job_id: JobId) -> Option<TaskWatch> {
        self.inner
            .tasks
            .lock()
            .get(&job_id)
            .and_then(|entries| entries.first())
            .map(|entry| TaskWatch {
                job_id,
                outcome: entry.outcome.clone(),
            })
    }

    /// Number of registered tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.inner.tasks.lock().values().map(Vec::len).sum()
    }

    pub fn is_registered(&self, job_id: JobId) -> bool {
        self.inner.tasks.lock().contains_key(&job_id)
    }

    /// Wait for every registered task, giving up after `grace`.
    ///
    /// Tasks are awaited, never aborted, and stay registered until they end:
    /// a task outliving the grace period still counts in
    /// [`in_flight`](Self::in_flight) and can still be watched. Returns the
    /// number of tasks still running when the grace period ran out.
    pub async fn drain(&self, grace: Duration) -> usize {
        let pending: Vec<(JobId, watch::Receiver<Option<ProcessResult>>)> = {
            let tasks = self.inner.tasks.lock();
            tasks
                .iter()
                .flat_map(|(job_id, entries)| {
                    entries
                        .iter()
                        .map(move |entry| (*job_id, entry.outcome.clone()))
                })
                .collect()
        };

        let deadline = tokio::time::Instant::now() + grace;
        let mut unfinished = 0;
        for (job_id, mut outcome) in pending {
            match tokio::time::timeout_at(deadline, outcome.wait_for(Option::is_some)).await {
                Ok(Ok(_)) => {}
                Ok(Err(_)) => {
                    tracing::warn!(job_id = %job_id, "processing task ended without reporting an outcome");
                }
                Err(_) => {
                    tracing::warn!(job_id = %job_id, "processing task still running after grace period");
                    unfinished += 1;
                }
            }
        }
        unfinished
    }

    fn deregister(&self, job_id: JobId, task_id: u64) {
        let mut tasks = self.inner.tasks.lock();
        if let Some(entries) = tasks.get_mut(&job_id) {
            entries.retain(|entry| entry.task_id != task_id);
            if entries.is_empty() {
                tasks.remove(&job_id);
            }
        }
    }
}

struct Deregister {
    registry: JobRegistry,
    job_id: JobId,
    task_id: u64,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.registry.deregister(self.job_id, self.task_id);
    }
}

/// Observer of one registered processing task.
#[derive(Clone, Debug)]
pub struct TaskWatch {
    job_id: JobId,
    outcome: watch::Receiver<Option<ProcessResult>>,
}

impl TaskWatch {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Wait for the task's result.
    ///
    /// A task that ends without reporting (it panicked outside the work
    /// boundary) yields [`SchedulerError::TaskAborted`].
    pub async fn wait(mut self) -> ProcessResult {
        let reported = match self.outcome.wait_for(Option::is_some).await {
            Ok(current) => (*current).clone(),
            Err(_) => None,
        };
        reported.unwrap_or_else(|| {
            Err(SchedulerError::TaskAborted(
                self.job_id,
                "task ended without reporting an outcome".to_string(),
            ))
        })
    }
}
