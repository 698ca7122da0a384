use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tracing::{debug, error, info, warn, Instrument};

use crate::cancel::CancelSignal;
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::{EventBus, JobEvent};
use crate::job::{Job, JobId, JobParameters, JobStatus, StoredJob};
use crate::registry::{JobRegistry, ProcessResult, TaskWatch};
use crate::store::{ExpectedVersion, JobStore};
use crate::telemetry;
use crate::work::{JobWork, WorkOutput};

/// Result of one `process` invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessOutcome {
    /// This invocation claimed the job and drove it to a terminal status.
    Finished(JobStatus),
    /// The job was not `New` (or another invocation claimed it first);
    /// nothing was done.
    Skipped { status: JobStatus },
    /// No job with that id exists.
    Missing,
}

/// Result of a bounded-wait submission.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Submission {
    /// Processing ended within the wait; the job is in a terminal status.
    Finished(Job),
    /// The wait ended first. Poll `get_job` with the id.
    Pending(JobId),
}

impl Submission {
    pub fn job_id(&self) -> JobId {
        match self {
            Submission::Finished(job) => job.job_id,
            Submission::Pending(job_id) => *job_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Submission::Pending(_))
    }

    fn outcome_label(&self) -> &'static str {
        match self {
            Submission::Finished(_) => "finished",
            Submission::Pending(_) => "pending",
        }
    }
}

/// The job scheduling service.
///
/// Creates jobs, drives them through `New → Processing → Completed|Failed`
/// and publishes an event for every transition. Processing always runs as a
/// task registered in the [`JobRegistry`]; a submission that stops waiting
/// leaves that task running to completion. This fire-and-forget contract is
/// deliberate: neither a timeout nor the caller's [`CancelSignal`] reaches
/// the background task.
#[derive(Clone)]
pub struct JobScheduler {
    config: Arc<SchedulerConfig>,
    store: Arc<dyn JobStore>,
    events: Arc<dyn EventBus>,
    work: Arc<dyn JobWork>,
    registry: JobRegistry,
}

impl fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobScheduler")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

impl JobScheduler {
    /// Create a scheduler from its collaborators.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        events: Arc<dyn EventBus>,
        work: Arc<dyn JobWork>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            events,
            work,
            registry: JobRegistry::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Persist a new job and announce it on the incoming topic.
    ///
    /// A store failure leaves nothing behind. A publish failure fails the
    /// call after the job was stored; the record stays `New`.
    pub async fn create_job(
        &self,
        owner: &str,
        parameters: JobParameters,
    ) -> SchedulerResult<JobId> {
        let job = Job::new(owner, parameters);

        self.store
            .save(&job, ExpectedVersion::Absent)
            .await
            .map_err(|err| {
                warn!(job_id = %job.job_id, owner, "failed to persist new job: {err}");
                SchedulerError::from(err)
            })?;

        self.publish(&self.config.topics.incoming, JobEvent::created(&job))
            .await?;

        telemetry::record_job_created(job.job_id.to_string(), &job.owner);
        Ok(job.job_id)
    }

    /// Look up a job. Absence and store faults are reported separately.
    pub async fn get_job(&self, job_id: JobId) -> SchedulerResult<Job> {
        match self.store.get(job_id).await {
            Ok(Some(stored)) => Ok(stored.job),
            Ok(None) => Err(SchedulerError::NotFound(job_id)),
            Err(err) => {
                warn!(job_id = %job_id, "job lookup failed: {err}");
                Err(err.into())
            }
        }
    }

    /// Claim a `New` job and run it to a terminal status.
    ///
    /// The claim is a version-checked write, so of several concurrent
    /// invocations for the same job exactly one executes the work; the rest
    /// return [`ProcessOutcome::Skipped`].
    pub async fn process(&self, job_id: JobId) -> SchedulerResult<ProcessOutcome> {
        self.process_claimed(job_id)
            .instrument(telemetry::process_span(job_id.to_string()))
            .await
    }

    async fn process_claimed(&self, job_id: JobId) -> SchedulerResult<ProcessOutcome> {
        let Some(stored) = self.store.get(job_id).await? else {
            info!(job_id = %job_id, "job not found; nothing to process");
            return Ok(ProcessOutcome::Missing);
        };

        if stored.job.status != JobStatus::New {
            info!(job_id = %job_id, status = %stored.job.status, "only new jobs can be processed; skipping");
            return Ok(ProcessOutcome::Skipped {
                status: stored.job.status,
            });
        }

        let processing = match self.transition(&stored, JobStatus::Processing).await {
            Ok(processing) => processing,
            Err(SchedulerError::Conflict { .. }) => {
                info!(job_id = %job_id, "job claimed by another processor; skipping");
                // The claim is lost either way; an unreadable record is
                // reported as held by the winner.
                let status = match self.store.get(job_id).await {
                    Ok(current) => current.map_or(JobStatus::Processing, |c| c.job.status),
                    Err(err) => {
                        warn!(job_id = %job_id, "re-reading job after lost claim failed: {err}");
                        JobStatus::Processing
                    }
                };
                return Ok(ProcessOutcome::Skipped { status });
            }
            Err(err) => return Err(err),
        };

        let timing = telemetry::record_work_start(job_id.to_string());
        let outcome = self.run_work(&processing.job).await;
        let elapsed = timing.elapsed();

        match outcome {
            Ok(output) => {
                let completed = self
                    .transition(&processing, JobStatus::Completed)
                    .await?;
                self.publish(
                    &self.config.topics.completed,
                    JobEvent::completed(&completed.job, elapsed, output.result_uri),
                )
                .await?;
                telemetry::record_job_finished(&completed.job.owner, JobStatus::Completed, elapsed);
                Ok(ProcessOutcome::Finished(JobStatus::Completed))
            }
            Err(reason) => {
                warn!(job_id = %job_id, error = %reason, "work failed; marking job failed");
                let failed = self.transition(&processing, JobStatus::Failed).await?;
                telemetry::record_job_finished(&failed.job.owner, JobStatus::Failed, elapsed);
                Ok(ProcessOutcome::Finished(JobStatus::Failed))
            }
        }
    }

    /// Execute the work, converting errors and panics into a failure reason.
    async fn run_work(&self, job: &Job) -> Result<WorkOutput, String> {
        let work = telemetry::instrument_work(
            job.job_id.to_string(),
            &job.owner,
            self.work.execute(job),
        );
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(format!("{err:#}")),
            Err(panic) => Err(format!("work panicked: {}", panic_message(panic.as_ref()))),
        }
    }

    /// Persist `current` moved to `next`, conditioned on the version it was
    /// read at, then announce the change.
    async fn transition(&self, current: &StoredJob, next: JobStatus) -> SchedulerResult<StoredJob> {
        let from = current.job.status;
        let updated = current
            .job
            .transitioned(next)
            .ok_or(SchedulerError::InvalidTransition {
                job_id: current.job.job_id,
                from,
                to: next,
            })?;

        let version = self
            .store
            .save(&updated, ExpectedVersion::Exactly(current.version))
            .await?;

        self.publish(
            &self.config.topics.status_changed,
            JobEvent::status_changed(&updated, from, next),
        )
        .await?;

        debug!(job_id = %updated.job_id, %from, to = %next, version, "job status changed");
        Ok(StoredJob {
            job: updated,
            version,
        })
    }

    async fn publish(&self, topic: &str, event: JobEvent) -> SchedulerResult<()> {
        let job_id = event.job_id();
        let kind = event.kind();
        self.events.publish(topic, event).await.map_err(|err| {
            error!(job_id = %job_id, topic, kind, "event publish failed: {err}");
            SchedulerError::from(err)
        })
    }

    /// Start processing `job_id` as a registered background task.
    pub fn spawn_processing(&self, job_id: JobId) -> TaskWatch {
        let scheduler = self.clone();
        self.registry.spawn(job_id, async move {
            let result = scheduler.process(job_id).await;
            if let Err(err) = &result {
                error!(job_id = %job_id, kind = err.kind(), "background processing failed: {err}");
            }
            result
        })
    }

    /// Create a job, start processing it and return its id at once.
    pub async fn submit_and_return(
        &self,
        owner: &str,
        parameters: JobParameters,
    ) -> SchedulerResult<JobId> {
        let span = telemetry::submit_span(owner, "immediate");
        async move {
            let job_id = match self.create_job(owner, parameters).await {
                Ok(job_id) => job_id,
                Err(err) => {
                    telemetry::record_submission("immediate", "error");
                    return Err(err);
                }
            };
            self.spawn_processing(job_id);
            telemetry::record_submission("immediate", "pending");
            Ok(job_id)
        }
        .instrument(span)
        .await
    }

    /// Create a job, start processing it and wait at most `timeout` for it
    /// to finish.
    pub async fn submit_with_timeout(
        &self,
        owner: &str,
        parameters: JobParameters,
        timeout: Duration,
    ) -> SchedulerResult<Submission> {
        self.submit_with_timeout_or_cancel(owner, parameters, timeout, &CancelSignal::new())
            .await
    }

    /// Like [`submit_with_timeout`](Self::submit_with_timeout), but `cancel`
    /// can also end the wait early. Either way the job keeps processing in
    /// the background and the call returns [`Submission::Pending`].
    pub async fn submit_with_timeout_or_cancel(
        &self,
        owner: &str,
        parameters: JobParameters,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> SchedulerResult<Submission> {
        let span = telemetry::submit_span(owner, "bounded_wait");
        let result = self
            .bounded_wait(owner, parameters, timeout, cancel)
            .instrument(span)
            .await;
        let outcome = result.as_ref().map_or("error", Submission::outcome_label);
        telemetry::record_submission("bounded_wait", outcome);
        result
    }

    async fn bounded_wait(
        &self,
        owner: &str,
        parameters: JobParameters,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> SchedulerResult<Submission> {
        let job_id = self.create_job(owner, parameters).await?;
        let watch = self.spawn_processing(job_id);

        if timeout.is_zero() || cancel.is_cancelled() {
            return Ok(Submission::Pending(job_id));
        }

        let finished = tokio::select! {
            result = watch.wait() => Some(result),
            _ = tokio::time::sleep(timeout) => {
                info!(job_id = %job_id, timeout_ms = timeout.as_millis() as u64, "job not finished within timeout");
                None
            }
            _ = cancel.cancelled() => {
                info!(job_id = %job_id, "caller cancelled the wait");
                None
            }
        };

        let Some(result) = finished else {
            return Ok(Submission::Pending(job_id));
        };
        result?;

        match self.get_job(job_id).await {
            Ok(job) if job.status.is_terminal() => Ok(Submission::Finished(job)),
            Ok(_) | Err(SchedulerError::NotFound(_)) => Ok(Submission::Pending(job_id)),
            Err(err) => Err(err),
        }
    }

    /// Wait for the in-flight processing task of `job_id`, if one exists.
    pub async fn wait_for(&self, job_id: JobId) -> Option<ProcessResult> {
        match self.registry.watch(job_id) {
            Some(watch) => Some(watch.wait().await),
            None => None,
        }
    }

    /// Number of processing tasks still running.
    pub fn in_flight(&self) -> usize {
        self.registry.in_flight()
    }

    /// Wait for in-flight processing to finish, up to the configured grace
    /// period. Returns how many tasks were still running when it elapsed.
    pub async fn shutdown(&self) -> usize {
        let grace = Duration::from_millis(self.config.shutdown_grace_ms);
        info!(in_flight = self.in_flight(), "draining job scheduler");
        let unfinished = self.registry.drain(grace).await;
        if unfinished > 0 {
            warn!(unfinished, "job scheduler shutdown left tasks running");
        } else {
            info!("job scheduler shutdown complete");
        }
        unfinished
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
