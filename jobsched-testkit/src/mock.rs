use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobsched::*;
use parking_lot::Mutex;
use tokio::sync::watch;

/// Event bus that records every publish and can refuse one topic.
#[derive(Clone, Default)]
pub struct RecordingEventBus {
    published: Arc<Mutex<Vec<TopicMessage>>>,
    failing_topic: Arc<Mutex<Option<String>>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish to `topic` from now on.
    pub fn fail_topic(&self, topic: impl Into<String>) {
        *self.failing_topic.lock() = Some(topic.into());
    }

    pub fn messages(&self) -> Vec<TopicMessage> {
        self.published.lock().clone()
    }

    pub fn messages_for(&self, job_id: JobId) -> Vec<TopicMessage> {
        self.published
            .lock()
            .iter()
            .filter(|message| message.event.job_id() == job_id)
            .cloned()
            .collect()
    }

    /// Statuses a job moved through, in publish order, starting with `New`.
    pub fn status_sequence(&self, job_id: JobId) -> Vec<JobStatus> {
        let mut sequence = Vec::new();
        for message in self.messages_for(job_id) {
            match message.event.payload {
                JobEventPayload::Created { .. } => sequence.push(JobStatus::New),
                JobEventPayload::StatusChanged { new_status, .. } => sequence.push(new_status),
                JobEventPayload::Completed { .. } => {}
            }
        }
        sequence
    }

    pub fn count_kind(&self, job_id: JobId, kind: &str) -> usize {
        self.messages_for(job_id)
            .iter()
            .filter(|message| message.event.kind() == kind)
            .count()
    }

    pub fn assert_published_count_eq(&self, expected: usize) {
        let actual = self.published.lock().len();
        assert_eq!(
            actual, expected,
            "Expected {} published events, got {}",
            expected, actual
        );
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, topic: &str, event: JobEvent) -> Result<(), PublishError> {
        if self.failing_topic.lock().as_deref() == Some(topic) {
            return Err(PublishError::new(topic, "injected publish fault"));
        }
        self.published.lock().push(TopicMessage {
            topic: topic.to_string(),
            event,
        });
        Ok(())
    }
}

/// What a [`ScriptedWork`] does when executed.
#[derive(Clone, Debug)]
pub enum WorkScript {
    Succeed,
    Fail(String),
    Panic(String),
}

/// Work with a fixed delay and outcome that counts its executions.
#[derive(Clone)]
pub struct ScriptedWork {
    delay: Duration,
    script: WorkScript,
    executions: Arc<AtomicUsize>,
}

impl ScriptedWork {
    pub fn new(delay: Duration, script: WorkScript) -> Self {
        Self {
            delay,
            script,
            executions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn succeeding(delay: Duration) -> Self {
        Self::new(delay, WorkScript::Succeed)
    }

    pub fn failing(delay: Duration, reason: impl Into<String>) -> Self {
        Self::new(delay, WorkScript::Fail(reason.into()))
    }

    pub fn panicking(reason: impl Into<String>) -> Self {
        Self::new(Duration::ZERO, WorkScript::Panic(reason.into()))
    }

    /// How many times the work body started.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobWork for ScriptedWork {
    async fn execute(&self, job: &Job) -> anyhow::Result<WorkOutput> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.script {
            WorkScript::Succeed => Ok(WorkOutput::new(format!(
                "memory://jobs/results/{}",
                job.job_id
            ))),
            WorkScript::Fail(reason) => Err(anyhow::anyhow!("{reason}")),
            WorkScript::Panic(reason) => panic!("{reason}"),
        }
    }
}

/// Work that blocks until released, for controlling interleavings.
#[derive(Clone)]
pub struct GatedWork {
    gate: watch::Sender<bool>,
    entered: watch::Sender<usize>,
}

impl GatedWork {
    pub fn new() -> Self {
        Self {
            gate: watch::channel(false).0,
            entered: watch::channel(0).0,
        }
    }

    /// Let every current and future execution finish.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn entered(&self) -> usize {
        *self.entered.borrow()
    }

    /// Wait until at least `count` executions have started.
    pub async fn wait_entered(&self, count: usize) {
        let mut entered = self.entered.subscribe();
        let _ = entered.wait_for(|n| *n >= count).await;
    }
}

impl Default for GatedWork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobWork for GatedWork {
    async fn execute(&self, job: &Job) -> anyhow::Result<WorkOutput> {
        self.entered.send_modify(|n| *n += 1);
        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| anyhow::anyhow!("gate dropped"))?;
        Ok(WorkOutput::new(format!("memory://gated/{}", job.job_id)))
    }
}
