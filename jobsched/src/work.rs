use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::SimulatedWorkConfig;
use crate::job::Job;

/// What a successful unit of work hands back to the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkOutput {
    /// Where the result of the job can be fetched from.
    pub result_uri: String,
}

impl WorkOutput {
    pub fn new(result_uri: impl Into<String>) -> Self {
        Self {
            result_uri: result_uri.into(),
        }
    }
}

/// The computation executed for a claimed job.
///
/// An `Err` (or a panic) marks the job as failed; the scheduler never
/// retries.
#[async_trait]
pub trait JobWork: Send + Sync {
    async fn execute(&self, job: &Job) -> anyhow::Result<WorkOutput>;
}

/// Adapter turning an async closure into a [`JobWork`].
pub struct WorkFn<F>(F);

/// Wrap `f` so it can be handed to the scheduler as its work strategy.
///
/// ```ignore
/// let work = work_fn(|job: Job| async move {
///     Ok(WorkOutput::new(format!("s3://results/{}", job.job_id)))
/// });
/// ```
pub fn work_fn<F, Fut>(f: F) -> WorkFn<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<WorkOutput>> + Send,
{
    WorkFn(f)
}

#[async_trait]
impl<F, Fut> JobWork for WorkFn<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<WorkOutput>> + Send,
{
    async fn execute(&self, job: &Job) -> anyhow::Result<WorkOutput> {
        (self.0)(job.clone()).await
    }
}

/// Stand-in for an external computation: sleeps for a random duration and
/// optionally faults.
pub struct SimulatedWork {
    config: SimulatedWorkConfig,
    rng: Mutex<StdRng>,
}

impl std::fmt::Debug for SimulatedWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedWork")
            .field("config", &self.config)
            .finish()
    }
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self::new(SimulatedWorkConfig::default())
    }
}

impl SimulatedWork {
    pub fn new(config: SimulatedWorkConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &SimulatedWorkConfig {
        &self.config
    }

    /// Upper bound on the time a single execution can take.
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.config.max_delay_ms.max(self.config.min_delay_ms))
    }

    fn sample(&self) -> (Duration, bool) {
        let mut rng = self.rng.lock();
        let delay_ms = if self.config.min_delay_ms < self.config.max_delay_ms {
            rng.gen_range(self.config.min_delay_ms..self.config.max_delay_ms)
        } else {
            self.config.min_delay_ms
        };
        let fault = rng.gen_bool(self.config.failure_rate.clamp(0.0, 1.0));
        (Duration::from_millis(delay_ms), fault)
    }
}

#[async_trait]
impl JobWork for SimulatedWork {
    async fn execute(&self, job: &Job) -> anyhow::Result<WorkOutput> {
        let (delay, fault) = self.sample();
        debug!(job_id = %job.job_id, delay_ms = delay.as_millis() as u64, "simulating work");
        tokio::time::sleep(delay).await;

        if fault {
            anyhow::bail!("simulated fault after {}ms", delay.as_millis());
        }

        Ok(WorkOutput::new(format!(
            "{}{}",
            self.config.result_base_uri, job.job_id
        )))
    }
}
