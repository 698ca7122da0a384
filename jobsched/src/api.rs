//! Transport-facing request and reply types.
//!
//! No server lives here. These types capture what an HTTP front end needs:
//! the camelCase request bodies, how a [`Submission`] maps to `200 OK` with
//! the job or `202 Accepted` with a polling location, and how a lookup maps
//! to `200`, `404` or `503`. The `start_*` and `lookup` functions run the
//! matching scheduler operation and produce the reply.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SchedulerError, SchedulerResult};
use crate::job::{Job, JobId, JobParameters};
use crate::service::{JobScheduler, Submission};

/// Path a client polls for a job that was accepted but not finished.
pub const JOB_LOOKUP_PATH: &str = "/Jobs/get";

/// Body of a fire-and-forget submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub owner: String,
    #[serde(default)]
    pub parameters: JobParameters,
}

/// Body of a bounded-wait submission. `initial_timeout` is in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequestWithTimeout {
    pub owner: String,
    pub initial_timeout: u64,
    #[serde(default)]
    pub parameters: JobParameters,
}

impl JobRequestWithTimeout {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.initial_timeout)
    }
}

/// Reply to a submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitReply {
    /// The job finished while the caller waited.
    Ok(Job),
    /// The job is still running; poll `location`.
    Accepted { job_id: JobId, location: String },
}

impl SubmitReply {
    pub fn accepted(job_id: JobId) -> Self {
        SubmitReply::Accepted {
            job_id,
            location: location_for(job_id),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            SubmitReply::Ok(_) => 200,
            SubmitReply::Accepted { .. } => 202,
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            SubmitReply::Ok(_) => None,
            SubmitReply::Accepted { location, .. } => Some(location),
        }
    }

    /// JSON body: the job for `200`, the bare job id for `202`.
    pub fn body_json(&self) -> serde_json::Result<String> {
        match self {
            SubmitReply::Ok(job) => serde_json::to_string(job),
            SubmitReply::Accepted { job_id, .. } => serde_json::to_string(job_id),
        }
    }
}

impl From<Submission> for SubmitReply {
    fn from(submission: Submission) -> Self {
        match submission {
            Submission::Finished(job) => SubmitReply::Ok(job),
            Submission::Pending(job_id) => SubmitReply::accepted(job_id),
        }
    }
}

/// Polling location for `job_id`.
pub fn location_for(job_id: JobId) -> String {
    format!("{JOB_LOOKUP_PATH}?jobId={job_id}")
}

/// Reply to a job lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupReply {
    Found(Job),
    NotFound(JobId),
    Unavailable(String),
}

impl LookupReply {
    pub fn status_code(&self) -> u16 {
        match self {
            LookupReply::Found(_) => 200,
            LookupReply::NotFound(_) => 404,
            LookupReply::Unavailable(_) => 503,
        }
    }
}

/// Map the result of `get_job` to a lookup reply.
///
/// Any error other than `NotFound` means the record could not be read, so
/// it is reported as unavailable rather than absent.
pub fn lookup_reply(result: SchedulerResult<Job>) -> LookupReply {
    match result {
        Ok(job) => LookupReply::Found(job),
        Err(SchedulerError::NotFound(job_id)) => LookupReply::NotFound(job_id),
        Err(err) => LookupReply::Unavailable(err.to_string()),
    }
}

/// Handle a fire-and-forget submission. Always `202` on success.
pub async fn start_job(
    scheduler: &JobScheduler,
    request: JobRequest,
) -> SchedulerResult<SubmitReply> {
    let job_id = scheduler
        .submit_and_return(&request.owner, request.parameters)
        .await?;
    Ok(SubmitReply::accepted(job_id))
}

/// Handle a bounded-wait submission.
pub async fn start_job_with_timeout(
    scheduler: &JobScheduler,
    request: JobRequestWithTimeout,
) -> SchedulerResult<SubmitReply> {
    let timeout = request.timeout();
    let submission = scheduler
        .submit_with_timeout(&request.owner, request.parameters, timeout)
        .await?;
    Ok(submission.into())
}

/// Handle a poll for a job.
pub async fn lookup(scheduler: &JobScheduler, job_id: JobId) -> LookupReply {
    lookup_reply(scheduler.get_job(job_id).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;

    #[test]
    fn test_request_with_timeout_uses_camel_case() {
        let request: JobRequestWithTimeout = serde_json::from_str(
            r#"{ "owner": "svc-x", "initialTimeout": 50, "parameters": { "k": "v" } }"#,
        )
        .unwrap();
        assert_eq!(request.owner, "svc-x");
        assert_eq!(request.timeout(), Duration::from_millis(50));
        assert_eq!(request.parameters.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn test_request_parameters_default_to_empty() {
        let request: JobRequest = serde_json::from_str(r#"{ "owner": "svc-x" }"#).unwrap();
        assert!(request.parameters.is_empty());
    }

    #[test]
    fn test_pending_submission_maps_to_accepted() {
        let job_id = JobId::new();
        let reply = SubmitReply::from(Submission::Pending(job_id));

        assert_eq!(reply.status_code(), 202);
        assert_eq!(
            reply.location(),
            Some(format!("/Jobs/get?jobId={job_id}").as_str())
        );
        assert_eq!(reply.body_json().unwrap(), format!("\"{job_id}\""));
    }

    #[test]
    fn test_finished_submission_maps_to_ok() {
        let mut job = Job::new("svc-x", JobParameters::new());
        job.status = JobStatus::Completed;
        let reply = SubmitReply::from(Submission::Finished(job.clone()));

        assert_eq!(reply.status_code(), 200);
        assert_eq!(reply.location(), None);
        let body: serde_json::Value = serde_json::from_str(&reply.body_json().unwrap()).unwrap();
        assert_eq!(body["status"], "Completed");
        assert_eq!(body["jobId"], job.job_id.to_string());
    }

    #[test]
    fn test_lookup_reply_keeps_absence_and_faults_apart() {
        let job_id = JobId::new();
        let job = Job::new("svc-x", JobParameters::new());

        assert_eq!(lookup_reply(Ok(job.clone())).status_code(), 200);
        assert_eq!(
            lookup_reply(Err(SchedulerError::NotFound(job_id))),
            LookupReply::NotFound(job_id)
        );
        assert_eq!(
            lookup_reply(Err(SchedulerError::StoreUnavailable("down".into()))).status_code(),
            503
        );
    }
}
