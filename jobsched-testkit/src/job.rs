use jobsched::{Job, JobParameters, JobStatus};

/// Owner used across the scenario tests.
pub const TEST_OWNER: &str = "svc-x";

/// Build a parameter map from string pairs.
pub fn params<const N: usize>(pairs: [(&str, &str); N]) -> JobParameters {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// The `{"k": "v"}` parameters of the reference scenario.
pub fn scenario_params() -> JobParameters {
    params([("k", "v")])
}

/// A job for [`TEST_OWNER`] already moved to `status`.
pub fn job_in_status(status: JobStatus) -> Job {
    Job {
        status,
        ..Job::new(TEST_OWNER, scenario_params())
    }
}
