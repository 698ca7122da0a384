/// Builder for constructing scheduler instances.
pub mod builder;
/// Job lifecycle operations and bounded-wait submission.
pub mod scheduler;

pub use builder::JobSchedulerBuilder;
pub use scheduler::{JobScheduler, ProcessOutcome, Submission};
