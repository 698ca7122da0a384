use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config::EventBusConfig;
use crate::error::PublishError;
use crate::job::{Job, JobId, JobStatus};

/// Metadata envelope attached to every job event.
///
/// The idempotency key is stable for a given transition of a given job, so
/// consumers of an at-least-once bus can drop redeliveries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub idempotency_key: String,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(idempotency_key: impl Into<String>) -> Self {
        Self {
            version: 1,
            idempotency_key: idempotency_key.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Job lifecycle event with metadata and payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub meta: EventMeta,
    pub payload: JobEventPayload,
}

/// Event payload emitted for job lifecycle transitions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEventPayload {
    /// Job was persisted in the `New` state.
    Created { job_id: JobId, owner: String },
    /// Job moved between two states.
    StatusChanged {
        job_id: JobId,
        owner: String,
        old_status: JobStatus,
        new_status: JobStatus,
    },
    /// Job work finished successfully.
    Completed {
        job_id: JobId,
        owner: String,
        #[serde(with = "duration_ms")]
        duration: Duration,
        result_uri: String,
    },
}

impl JobEvent {
    pub fn created(job: &Job) -> Self {
        Self {
            meta: EventMeta::new(format!("created-{}", job.job_id)),
            payload: JobEventPayload::Created {
                job_id: job.job_id,
                owner: job.owner.clone(),
            },
        }
    }

    pub fn status_changed(job: &Job, old_status: JobStatus, new_status: JobStatus) -> Self {
        Self {
            meta: EventMeta::new(format!("status-{}-{}", job.job_id, new_status)),
            payload: JobEventPayload::StatusChanged {
                job_id: job.job_id,
                owner: job.owner.clone(),
                old_status,
                new_status,
            },
        }
    }

    pub fn completed(job: &Job, duration: Duration, result_uri: impl Into<String>) -> Self {
        Self {
            meta: EventMeta::new(format!("completed-{}", job.job_id)),
            payload: JobEventPayload::Completed {
                job_id: job.job_id,
                owner: job.owner.clone(),
                duration,
                result_uri: result_uri.into(),
            },
        }
    }

    pub fn job_id(&self) -> JobId {
        match &self.payload {
            JobEventPayload::Created { job_id, .. }
            | JobEventPayload::StatusChanged { job_id, .. }
            | JobEventPayload::Completed { job_id, .. } => *job_id,
        }
    }

    pub fn owner(&self) -> &str {
        match &self.payload {
            JobEventPayload::Created { owner, .. }
            | JobEventPayload::StatusChanged { owner, .. }
            | JobEventPayload::Completed { owner, .. } => owner,
        }
    }

    pub fn kind(&self) -> &'static str {
        match &self.payload {
            JobEventPayload::Created { .. } => "created",
            JobEventPayload::StatusChanged { .. } => "status_changed",
            JobEventPayload::Completed { .. } => "completed",
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Publish side of the job event bus.
///
/// `publish` resolves once the bus has accepted the event; delivery to
/// subscribers happens independently of the caller.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event on a named topic.
    async fn publish(&self, topic: &str, event: JobEvent) -> Result<(), PublishError>;
}

/// An event together with the topic it was published on.
#[derive(Clone, Debug)]
pub struct TopicMessage {
    pub topic: String,
    pub event: JobEvent,
}

/// In-process event bus using a tokio broadcast channel.
///
/// Every subscriber receives every message published after it subscribed
/// (fan-out). A subscriber that falls more than `capacity` messages behind
/// skips the oldest ones; publishers never wait on subscribers. Events do not
/// leave the process. Bridging to an external broker is a matter of
/// implementing [`EventBus`].
///
/// Clones share one channel: hand a clone to the scheduler and subscribe on
/// the original.
#[derive(Clone)]
pub struct InProcEventBus {
    sender: broadcast::Sender<TopicMessage>,
    capacity: usize,
}

impl std::fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl Default for InProcEventBus {
    fn default() -> Self {
        Self::from_config(&EventBusConfig::default())
    }
}

impl InProcEventBus {
    /// Create a new event bus buffering `capacity` messages per subscriber.
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn from_config(config: &EventBusConfig) -> Self {
        Self::new(config.capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscribe to every topic.
    pub fn subscribe(&self) -> broadcast::Receiver<TopicMessage> {
        self.sender.subscribe()
    }

    /// Subscribe to the messages matching `filter`.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            filter,
        }
    }
}

#[async_trait]
impl EventBus for InProcEventBus {
    async fn publish(&self, topic: &str, event: JobEvent) -> Result<(), PublishError> {
        // No subscribers is not a failure: the message is simply dropped.
        let _ = self.sender.send(TopicMessage {
            topic: topic.to_string(),
            event,
        });
        Ok(())
    }
}

/// Topic and owner restriction for a subscription.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    topic: Option<String>,
    owner: Option<String>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn matches(&self, message: &TopicMessage) -> bool {
        self.topic.as_deref().map_or(true, |t| t == message.topic)
            && self
                .owner
                .as_deref()
                .map_or(true, |o| o == message.event.owner())
    }
}

/// Receiver yielding only the messages that match its filter.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<TopicMessage>,
    filter: EventFilter,
}

impl EventSubscription {
    /// Wait for the next matching message. Returns `None` once the bus is
    /// dropped.
    pub async fn recv(&mut self) -> Option<TopicMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) if self.filter.matches(&message) => return Some(message),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
