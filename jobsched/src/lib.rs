//! jobsched - Job scheduling with bounded-wait submission.
//!
//! A caller submits a unit of work and either gets the finished job back,
//! when it completes within a caller-supplied time budget, or gets the job id
//! to poll later. Every status change is announced on an event bus.
//!
//! # Core Concepts
//!
//! - **Job**: An owner, opaque string parameters and a [`JobStatus`] moving
//!   along `New → Processing → Completed|Failed`.
//!
//! - **Store**: The [`JobStore`] trait persists jobs with version-checked
//!   writes. The version check is what makes claiming a job atomic.
//!
//! - **Events**: [`JobEvent`]s are published through the [`EventBus`] trait;
//!   [`InProcEventBus`] fans them out to in-process subscribers.
//!
//! - **Work**: The [`JobWork`] trait is the computation executed for a job.
//!   [`SimulatedWork`] sleeps for a random duration.
//!
//! - **Scheduler**: [`JobScheduler`] ties everything together. Processing
//!   runs as tasks owned by a [`JobRegistry`], so a submission that stops
//!   waiting never cancels the work it started.
//!
//! # Feature Flags
//!
//! - `postgres` - PostgreSQL job store via sqlx
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```ignore
//! use jobsched::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let scheduler = JobScheduler::builder(SchedulerConfig::default())
//!     .with_store(Arc::new(InMemoryJobStore::new()))
//!     .with_work(Arc::new(SimulatedWork::default()))
//!     .build()?;
//!
//! match scheduler
//!     .submit_with_timeout("svc-x", params, Duration::from_secs(60))
//!     .await?
//! {
//!     Submission::Finished(job) => println!("{} finished: {}", job.job_id, job.status),
//!     Submission::Pending(job_id) => println!("poll {job_id} later"),
//! }
//! ```

/// Transport-facing request and reply types.
pub mod api;

/// Caller-side cancellation of a bounded wait.
pub mod cancel;

/// Configuration structures for topics, simulated work and persistence.
pub mod config;

/// Error types for stores, event buses and the scheduler.
pub mod error;

/// Job lifecycle events and the event bus.
///
/// The `events` module provides:
/// - [`JobEvent`] and [`JobEventPayload`] for event data
/// - [`EventBus`] trait for publishers
/// - [`InProcEventBus`] for in-process fan-out with topic and owner filters
pub mod events;

/// Core job definitions.
///
/// The `job` module defines [`Job`], [`JobId`], [`JobStatus`] and its
/// transition table, and [`StoredJob`] (a job with its store version).
pub mod job;

#[cfg(feature = "metrics")]
/// Prometheus metrics for job throughput and durations.
pub mod metrics;

#[cfg(feature = "postgres")]
/// PostgreSQL persistence implementation.
///
/// The `persistence` module provides a PostgreSQL-backed implementation of
/// the job store when the `postgres` feature is enabled.
pub mod persistence;

/// Registry of in-flight processing tasks.
pub mod registry;

/// The job scheduling service.
///
/// The `service` module provides [`JobScheduler`], its builder, and the
/// [`ProcessOutcome`] and [`Submission`] result types.
pub mod service;

/// Job persistence trait and the in-memory store.
pub mod store;

/// Tracing spans and lifecycle recording.
pub mod telemetry;

/// Pluggable unit of work.
pub mod work;

pub use cancel::*;
pub use config::*;
pub use error::*;
pub use events::*;
pub use job::*;
pub use registry::*;
pub use service::*;
pub use store::*;
pub use work::*;
