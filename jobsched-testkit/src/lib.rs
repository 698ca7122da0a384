//! Test doubles for the jobsched scheduling core.

pub mod job;
pub mod mock;
pub mod store;

pub use job::*;
pub use mock::*;
pub use store::*;
