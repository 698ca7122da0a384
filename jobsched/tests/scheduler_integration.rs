//! Scheduler integration tests.
//!
//! Covers the job lifecycle end to end: creation, idempotent and concurrent
//! processing, bounded-wait submission against slow, failing and panicking
//! work, store and bus faults, and caller cancellation.

use std::sync::Arc;
use std::time::Duration;

use jobsched::api::{self, JobRequestWithTimeout, LookupReply, SubmitReply};
use jobsched::*;
use jobsched_testkit::{
    params, scenario_params, FlakyJobStore, GatedWork, RecordingEventBus, ScriptedWork,
    TEST_OWNER,
};
use tokio::time::timeout;

struct Harness<W> {
    scheduler: JobScheduler,
    store: FlakyJobStore,
    bus: RecordingEventBus,
    work: W,
}

fn harness<W: JobWork + Clone + 'static>(work: W) -> Harness<W> {
    let store = FlakyJobStore::new();
    let bus = RecordingEventBus::new();
    let scheduler = JobScheduler::builder(SchedulerConfig::default().with_shutdown_grace(60_000))
        .with_store(Arc::new(store.clone()))
        .with_events(Arc::new(bus.clone()))
        .with_work(Arc::new(work.clone()))
        .build()
        .expect("all dependencies set");
    Harness {
        scheduler,
        store,
        bus,
        work,
    }
}

#[tokio::test]
async fn create_job_persists_one_new_job() {
    let h = harness(ScriptedWork::succeeding(Duration::ZERO));

    let job_id = h
        .scheduler
        .create_job(TEST_OWNER, scenario_params())
        .await
        .unwrap();

    let job = h.scheduler.get_job(job_id).await.unwrap();
    assert_eq!(job.job_id, job_id);
    assert_eq!(job.status, JobStatus::New);
    assert_eq!(job.parameters, scenario_params());
    assert_eq!(h.store.inner().len(), 1);

    let messages = h.bus.messages_for(job_id);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "nw.jobs.incoming");
    assert_eq!(messages[0].event.kind(), "created");
    assert_eq!(messages[0].event.owner(), TEST_OWNER);
    assert_eq!(h.work.executions(), 0);
}

#[tokio::test]
async fn process_walks_the_full_status_sequence() {
    let h = harness(ScriptedWork::succeeding(Duration::from_millis(5)));

    let job_id = h.scheduler.create_job(TEST_OWNER, params([])).await.unwrap();
    let outcome = h.scheduler.process(job_id).await.unwrap();

    assert_eq!(outcome, ProcessOutcome::Finished(JobStatus::Completed));
    assert_eq!(
        h.bus.status_sequence(job_id),
        vec![JobStatus::New, JobStatus::Processing, JobStatus::Completed]
    );
    assert_eq!(h.bus.count_kind(job_id, "completed"), 1);
    h.bus.assert_published_count_eq(4);
}

#[tokio::test]
async fn process_is_idempotent_per_job() {
    let h = harness(ScriptedWork::succeeding(Duration::ZERO));
    let job_id = h.scheduler.create_job(TEST_OWNER, params([])).await.unwrap();

    let first = h.scheduler.process(job_id).await.unwrap();
    let second = h.scheduler.process(job_id).await.unwrap();

    assert_eq!(first, ProcessOutcome::Finished(JobStatus::Completed));
    assert_eq!(
        second,
        ProcessOutcome::Skipped {
            status: JobStatus::Completed
        }
    );
    assert_eq!(h.work.executions(), 1);
    assert_eq!(h.bus.count_kind(job_id, "completed"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_process_executes_work_once() {
    let h = harness(ScriptedWork::succeeding(Duration::from_millis(20)));
    let job_id = h.scheduler.create_job(TEST_OWNER, params([])).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let scheduler = h.scheduler.clone();
            tokio::spawn(async move { scheduler.process(job_id).await })
        })
        .collect();
    let outcomes: Vec<ProcessOutcome> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").expect("process failed"))
        .collect();

    let finished = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, ProcessOutcome::Finished(_)))
        .count();
    assert_eq!(finished, 1, "outcomes: {outcomes:?}");
    assert!(outcomes.iter().all(|outcome| matches!(
        outcome,
        ProcessOutcome::Finished(JobStatus::Completed) | ProcessOutcome::Skipped { .. }
    )));
    assert_eq!(h.work.executions(), 1);
    assert_eq!(
        h.bus.status_sequence(job_id),
        vec![JobStatus::New, JobStatus::Processing, JobStatus::Completed]
    );
}

#[tokio::test]
async fn process_unknown_job_is_missing_not_error() {
    let h = harness(ScriptedWork::succeeding(Duration::ZERO));

    let outcome = h.scheduler.process(JobId::new()).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Missing);
    h.bus.assert_published_count_eq(0);
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_returns_pending_and_job_finishes_alone() {
    let h = harness(ScriptedWork::succeeding(Duration::from_millis(200)));

    let submission = h
        .scheduler
        .submit_with_timeout(TEST_OWNER, scenario_params(), Duration::ZERO)
        .await
        .unwrap();
    let job_id = match submission {
        Submission::Pending(job_id) => job_id,
        other => panic!("expected pending, got {other:?}"),
    };

    assert_eq!(h.scheduler.shutdown().await, 0);
    assert_eq!(
        h.scheduler.get_job(job_id).await.unwrap().status,
        JobStatus::Completed
    );
    assert_eq!(h.bus.count_kind(job_id, "completed"), 1);
}

#[tokio::test(start_paused = true)]
async fn short_timeout_returns_pending_while_processing() {
    let h = harness(ScriptedWork::succeeding(Duration::from_millis(500)));

    let submission = h
        .scheduler
        .submit_with_timeout(TEST_OWNER, scenario_params(), Duration::from_millis(50))
        .await
        .unwrap();
    assert!(submission.is_pending());
    let job_id = submission.job_id();

    assert_eq!(
        h.scheduler.get_job(job_id).await.unwrap().status,
        JobStatus::Processing
    );
    assert_eq!(h.scheduler.in_flight(), 1);

    let result = h.scheduler.wait_for(job_id).await;
    assert_eq!(
        result,
        Some(Ok(ProcessOutcome::Finished(JobStatus::Completed)))
    );
    assert_eq!(
        h.scheduler.get_job(job_id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test(start_paused = true)]
async fn generous_timeout_returns_finished_job() {
    let h = harness(ScriptedWork::succeeding(Duration::from_millis(100)));

    let submission = h
        .scheduler
        .submit_with_timeout(TEST_OWNER, scenario_params(), Duration::from_secs(60))
        .await
        .unwrap();

    match submission {
        Submission::Finished(job) => {
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.owner, TEST_OWNER);
        }
        other => panic!("expected finished job, got {other:?}"),
    }
}

#[tokio::test]
async fn failing_work_finishes_failed_without_completed_event() {
    let h = harness(ScriptedWork::failing(Duration::from_millis(5), "upstream 500"));

    let submission = h
        .scheduler
        .submit_with_timeout(TEST_OWNER, params([]), Duration::from_secs(5))
        .await
        .unwrap();

    let Submission::Finished(job) = submission else {
        panic!("expected finished job");
    };
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        h.bus.status_sequence(job.job_id),
        vec![JobStatus::New, JobStatus::Processing, JobStatus::Failed]
    );
    assert_eq!(h.bus.count_kind(job.job_id, "completed"), 0);
}

#[tokio::test]
async fn panicking_work_finishes_failed() {
    let h = harness(ScriptedWork::panicking("worker exploded"));

    let submission = h
        .scheduler
        .submit_with_timeout(TEST_OWNER, params([]), Duration::from_secs(5))
        .await
        .unwrap();

    let Submission::Finished(job) = submission else {
        panic!("expected finished job");
    };
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(h.bus.count_kind(job.job_id, "completed"), 0);
    assert_eq!(h.scheduler.shutdown().await, 0);
}

#[tokio::test]
async fn get_job_distinguishes_absence_from_store_fault() {
    let h = harness(ScriptedWork::succeeding(Duration::ZERO));
    let job_id = h.scheduler.create_job(TEST_OWNER, params([])).await.unwrap();
    let unknown = JobId::new();

    assert_eq!(
        h.scheduler.get_job(unknown).await,
        Err(SchedulerError::NotFound(unknown))
    );

    h.store.set_fail_reads(true);
    let err = h.scheduler.get_job(job_id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::StoreUnavailable(_)), "{err:?}");
    assert_eq!(api::lookup(&h.scheduler, job_id).await.status_code(), 503);

    h.store.set_fail_reads(false);
    assert_eq!(
        api::lookup(&h.scheduler, unknown).await,
        LookupReply::NotFound(unknown)
    );
}

#[tokio::test]
async fn create_job_store_fault_leaves_nothing_behind() {
    let h = harness(ScriptedWork::succeeding(Duration::ZERO));
    h.store.set_fail_writes(true);

    let err = h
        .scheduler
        .submit_and_return(TEST_OWNER, params([]))
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::StoreUnavailable(_)));
    assert!(h.store.inner().is_empty());
    h.bus.assert_published_count_eq(0);
    assert_eq!(h.scheduler.in_flight(), 0);
}

#[tokio::test]
async fn create_job_publish_fault_fails_after_persisting() {
    let h = harness(ScriptedWork::succeeding(Duration::ZERO));
    h.bus.fail_topic("nw.jobs.incoming");

    let err = h
        .scheduler
        .create_job(TEST_OWNER, params([]))
        .await
        .unwrap_err();

    assert!(
        matches!(&err, SchedulerError::Publish { topic, .. } if topic == "nw.jobs.incoming"),
        "{err:?}"
    );
    let jobs = h.store.inner().jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::New);
}

#[tokio::test]
async fn store_fault_on_terminal_write_propagates_to_waiter() {
    let h = harness(ScriptedWork::succeeding(Duration::ZERO));
    h.store.fail_writes_of(JobStatus::Completed);

    let err = h
        .scheduler
        .submit_with_timeout(TEST_OWNER, params([]), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::StoreUnavailable(_)), "{err:?}");

    let jobs = h.store.inner().jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Processing);
    assert_eq!(h.bus.count_kind(jobs[0].job_id, "completed"), 0);
}

#[tokio::test]
async fn completed_publish_fault_keeps_persisted_terminal_state() {
    let h = harness(ScriptedWork::succeeding(Duration::ZERO));
    h.bus.fail_topic("nw.jobs.completed");

    let job_id = h.scheduler.create_job(TEST_OWNER, params([])).await.unwrap();
    let err = h.scheduler.process(job_id).await.unwrap_err();

    assert!(matches!(err, SchedulerError::Publish { .. }));
    assert_eq!(
        h.scheduler.get_job(job_id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn caller_cancel_ends_wait_but_not_processing() {
    let work = GatedWork::new();
    let h = harness(work.clone());
    let cancel = CancelSignal::new();

    let waiter = {
        let scheduler = h.scheduler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            scheduler
                .submit_with_timeout_or_cancel(
                    TEST_OWNER,
                    params([]),
                    Duration::from_secs(60),
                    &cancel,
                )
                .await
        })
    };

    timeout(Duration::from_secs(1), work.wait_entered(1))
        .await
        .expect("work should start");
    cancel.cancel();

    let submission = timeout(Duration::from_secs(1), waiter)
        .await
        .expect("cancel should end the wait")
        .unwrap()
        .unwrap();
    assert!(submission.is_pending());
    assert_eq!(h.scheduler.in_flight(), 1);

    work.release();
    assert_eq!(h.scheduler.shutdown().await, 0);
    assert_eq!(
        h.scheduler.get_job(submission.job_id()).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn submit_and_return_does_not_wait_for_work() {
    let work = GatedWork::new();
    let h = harness(work.clone());

    let job_id = timeout(
        Duration::from_secs(1),
        h.scheduler.submit_and_return(TEST_OWNER, params([])),
    )
    .await
    .expect("submission should return at once")
    .unwrap();

    work.wait_entered(1).await;
    assert_eq!(
        h.scheduler.get_job(job_id).await.unwrap().status,
        JobStatus::Processing
    );

    work.release();
    assert_eq!(
        h.scheduler.wait_for(job_id).await,
        Some(Ok(ProcessOutcome::Finished(JobStatus::Completed)))
    );
}

#[tokio::test]
async fn shutdown_reports_tasks_outliving_grace() {
    let work = GatedWork::new();
    let store = InMemoryJobStore::new();
    let scheduler = JobScheduler::builder(SchedulerConfig::default().with_shutdown_grace(20))
        .with_store(Arc::new(store.clone()))
        .with_work(Arc::new(work.clone()))
        .build()
        .unwrap();

    let job_id = scheduler
        .submit_and_return(TEST_OWNER, params([]))
        .await
        .unwrap();
    work.wait_entered(1).await;

    assert_eq!(scheduler.shutdown().await, 1);
    assert_eq!(scheduler.in_flight(), 1);

    work.release();
    let result = timeout(Duration::from_secs(5), scheduler.wait_for(job_id))
        .await
        .unwrap();
    assert_eq!(
        result,
        Some(Ok(ProcessOutcome::Finished(JobStatus::Completed)))
    );
    assert_eq!(scheduler.in_flight(), 0);
}

#[tokio::test]
async fn owner_filtered_subscriber_sees_only_its_jobs() {
    let bus = InProcEventBus::new(64);
    let scheduler = JobScheduler::builder(SchedulerConfig::default())
        .with_store(Arc::new(InMemoryJobStore::new()))
        .with_events(Arc::new(bus.clone()))
        .with_work(Arc::new(ScriptedWork::succeeding(Duration::ZERO)))
        .build()
        .unwrap();
    let mut completions = bus.subscribe_filtered(
        EventFilter::new()
            .topic("nw.jobs.completed")
            .owner("microservice-x"),
    );

    scheduler
        .submit_with_timeout("someone-else", params([]), Duration::from_secs(5))
        .await
        .unwrap();
    let mine = scheduler
        .submit_with_timeout("microservice-x", params([]), Duration::from_secs(5))
        .await
        .unwrap();

    let message = timeout(Duration::from_secs(1), completions.recv())
        .await
        .expect("completion should arrive")
        .expect("bus open");
    assert_eq!(message.event.job_id(), mine.job_id());
    match message.event.payload {
        JobEventPayload::Completed { result_uri, .. } => {
            assert_eq!(result_uri, format!("memory://jobs/results/{}", mine.job_id()));
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn bounded_wait_request_maps_to_http_replies() {
    let h = harness(ScriptedWork::succeeding(Duration::from_millis(300)));

    let accepted = api::start_job_with_timeout(
        &h.scheduler,
        JobRequestWithTimeout {
            owner: TEST_OWNER.to_string(),
            initial_timeout: 10,
            parameters: scenario_params(),
        },
    )
    .await
    .unwrap();
    assert_eq!(accepted.status_code(), 202);
    let location = accepted.location().map(str::to_string);

    let ok = api::start_job_with_timeout(
        &h.scheduler,
        JobRequestWithTimeout {
            owner: TEST_OWNER.to_string(),
            initial_timeout: 5_000,
            parameters: scenario_params(),
        },
    )
    .await
    .unwrap();
    assert!(matches!(ok, SubmitReply::Ok(ref job) if job.status == JobStatus::Completed));

    h.scheduler.shutdown().await;
    let SubmitReply::Accepted { job_id, .. } = accepted else {
        panic!("expected accepted reply");
    };
    assert_eq!(location, Some(format!("/Jobs/get?jobId={job_id}")));
    assert_eq!(api::lookup(&h.scheduler, job_id).await.status_code(), 200);
}

#[tokio::test(start_paused = true)]
async fn reference_scenario_with_simulated_work() {
    let work = SimulatedWork::new(SimulatedWorkConfig {
        seed: Some(7),
        ..SimulatedWorkConfig::default()
    });
    let bus = RecordingEventBus::new();
    let scheduler = JobScheduler::builder(SchedulerConfig::default())
        .with_store(Arc::new(InMemoryJobStore::new()))
        .with_events(Arc::new(bus.clone()))
        .with_work(Arc::new(work))
        .build()
        .unwrap();

    let short = scheduler
        .submit_with_timeout(TEST_OWNER, scenario_params(), Duration::from_millis(50))
        .await
        .unwrap();
    assert!(short.is_pending());

    let long = scheduler
        .submit_with_timeout(TEST_OWNER, scenario_params(), Duration::from_secs(60))
        .await
        .unwrap();
    let Submission::Finished(job) = long else {
        panic!("a 60s wait must outlast the simulated work");
    };
    assert_eq!(job.status, JobStatus::Completed);

    assert_eq!(scheduler.shutdown().await, 0);
    assert_eq!(
        scheduler.get_job(short.job_id()).await.unwrap().status,
        JobStatus::Completed
    );
    for job_id in [short.job_id(), job.job_id] {
        assert_eq!(
            bus.status_sequence(job_id),
            vec![JobStatus::New, JobStatus::Processing, JobStatus::Completed]
        );
    }
}
