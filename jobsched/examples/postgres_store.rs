//! Bounded-wait submission backed by PostgreSQL.
//!
//! # Prerequisites
//!
//! 1. PostgreSQL server running locally or accessible via network
//! 2. Database created: `createdb jobsched_example`
//!
//! The example creates the `jobsched_jobs` table if it is missing.
//!
//! # Running the Example
//!
//! ```bash
//! export DATABASE_URL="postgres://localhost/jobsched_example"
//! cargo run --example postgres_store --features postgres
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use jobsched::persistence::{PostgresJobStore, DEFAULT_STORE_NAME};
use jobsched::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("jobsched=info").init();

    let database_url = env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/jobsched_example".to_string());
    println!("Connecting to {database_url}...");

    let store = PostgresJobStore::connect(
        &PersistenceConfig {
            connection_string: database_url,
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_seconds: 5,
        },
        DEFAULT_STORE_NAME,
    )
    .await?;
    store.ensure_schema().await?;

    let scheduler = JobScheduler::builder(SchedulerConfig::default())
        .with_store(Arc::new(store.clone()))
        .with_work(Arc::new(SimulatedWork::new(SimulatedWorkConfig {
            min_delay_ms: 100,
            max_delay_ms: 2_000,
            ..SimulatedWorkConfig::default()
        })))
        .build()?;

    let mut pending = Vec::new();
    for i in 0..5 {
        let parameters = JobParameters::from([("batch".to_string(), i.to_string())]);
        match scheduler
            .submit_with_timeout("svc-x", parameters, Duration::from_millis(500))
            .await?
        {
            Submission::Finished(job) => println!("{} finished: {}", job.job_id, job.status),
            Submission::Pending(job_id) => {
                println!("{job_id} still running");
                pending.push(job_id);
            }
        }
    }

    scheduler.shutdown().await;
    for job_id in pending {
        let job = scheduler.get_job(job_id).await?;
        println!("{job_id} now {}", job.status);
    }

    Ok(())
}
