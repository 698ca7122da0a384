//! Bounded-wait submission with simulated work.
//!
//! Submits two jobs for `svc-x` against work that takes 100ms..10s:
//! one with a 50ms budget, which comes back pending, and one with a 60s
//! budget, which comes back finished. A subscriber filtered to the owner
//! prints every lifecycle event, the way a downstream service would.
//!
//! ```bash
//! RUST_LOG=jobsched=debug cargo run --example bounded_wait
//! ```

use std::sync::Arc;

use jobsched::api::{self, JobRequestWithTimeout, SubmitReply};
use jobsched::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobsched=info")),
        )
        .init();

    println!("=== jobsched bounded-wait example ===\n");

    let bus = InProcEventBus::from_config(&EventBusConfig::default());
    let scheduler = JobScheduler::builder(SchedulerConfig::default())
        .with_store(Arc::new(InMemoryJobStore::new()))
        .with_events(Arc::new(bus.clone()))
        .with_work(Arc::new(SimulatedWork::new(SimulatedWorkConfig::default())))
        .build()?;

    let mut subscription = bus.subscribe_filtered(EventFilter::new().owner("svc-x"));
    let listener = tokio::spawn(async move {
        while let Some(message) = subscription.recv().await {
            match &message.event.payload {
                JobEventPayload::Created { job_id, .. } => {
                    println!("[{}] created {job_id}", message.topic);
                }
                JobEventPayload::StatusChanged {
                    job_id,
                    old_status,
                    new_status,
                    ..
                } => {
                    println!("[{}] {job_id}: {old_status} -> {new_status}", message.topic);
                }
                JobEventPayload::Completed {
                    job_id,
                    duration,
                    result_uri,
                    ..
                } => {
                    println!(
                        "[{}] {job_id} completed in {}ms at {result_uri}",
                        message.topic,
                        duration.as_millis()
                    );
                }
            }
        }
    });

    for initial_timeout in [50, 60_000] {
        let request = JobRequestWithTimeout {
            owner: "svc-x".to_string(),
            initial_timeout,
            parameters: JobParameters::from([("k".to_string(), "v".to_string())]),
        };
        println!("\nSubmitting with a {initial_timeout}ms budget...");
        let reply = api::start_job_with_timeout(&scheduler, request).await?;

        match &reply {
            SubmitReply::Ok(job) => {
                println!("{} {}: {}", reply.status_code(), job.job_id, job.status);
            }
            SubmitReply::Accepted { job_id, location } => {
                println!("{} {job_id}: poll {location}", reply.status_code());
            }
        }
    }

    println!("\nDraining in-flight jobs...");
    let unfinished = scheduler.shutdown().await;
    println!("Unfinished after grace period: {unfinished}");

    drop(scheduler);
    drop(bus);
    listener.await?;
    Ok(())
}
