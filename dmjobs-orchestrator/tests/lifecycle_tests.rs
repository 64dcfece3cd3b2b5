// Lifecycle tests over in-memory stores: register, run, status, remove, result

mod common;

use std::time::Duration;

use chrono::Utc;
use common::{Harness, recurring, reverse, scripted, toggled};
use dmjobs_core::domain::job::JobStatus;
use dmjobs_core::domain::progress::ProgressUpdate;
use dmjobs_orchestrator::handler::{Capability, RegistryError};
use dmjobs_orchestrator::repository::JobStore;
use dmjobs_orchestrator::service::JobError;
use serde_json::json;

#[tokio::test]
async fn test_unmatched_runner_persists_nothing() {
    let h = Harness::new();
    let reference = h
        .add_document("job", common::job_document(json!({"type": "dmss://Tests/Blueprints/Nothing"})))
        .await;

    let err = h.service.register_job(&reference, None).await.unwrap_err();
    assert!(matches!(err, JobError::Registry(RegistryError::NoHandler(_))));
    assert!(h.jobs.is_empty().await);
    assert!(h.triggers.is_empty().await);
}

#[tokio::test]
async fn test_unavailable_backend_is_not_a_missing_handler() {
    let h = Harness::new();
    h.set_backend_up(false);
    let reference = h.add_document("job", toggled()).await;

    let err = h.service.register_job(&reference, None).await.unwrap_err();
    assert!(
        matches!(err, JobError::BackendUnavailable(ref msg) if msg == "Toggled backend is switched off"),
        "unexpected error: {err:?}"
    );
    assert!(h.jobs.is_empty().await);
    assert!(h.triggers.is_empty().await);
}

#[tokio::test]
async fn test_backend_lost_before_run_fails_the_job() {
    let h = Harness::new();
    let reference = h.add_document("job", toggled()).await;
    let registration = h.service.register_job(&reference, None).await.unwrap();

    h.set_backend_up(false);
    assert_eq!(h.tick().await, 1);

    let job = h.jobs.get(registration.uid).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.ended.is_some());
    assert!(job
        .log
        .iter()
        .any(|line| line == "JOBAPI: Toggled backend is switched off"));
}

#[tokio::test]
async fn test_document_write_failures_do_not_roll_back() {
    let h = Harness::with_read_only_documents();
    let reference = h.add_document("job", scripted("complete")).await;

    let registration = h.service.register_job(&reference, None).await.unwrap();
    assert_eq!(registration.status, JobStatus::Starting);
    assert_eq!(
        h.jobs.get(registration.uid).await.unwrap().status,
        JobStatus::Starting
    );
    assert_eq!(h.triggers.len().await, 1);

    assert_eq!(h.tick().await, 1);

    let job = h.jobs.get(registration.uid).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.ended.is_some());
    assert_eq!(job.log, vec!["scripted job completed"]);

    // the document never saw any of it
    assert_eq!(
        h.documents.snapshot(&reference).await.unwrap()["status"],
        json!("not started")
    );
}

#[tokio::test]
async fn test_failing_progress_is_logged_once() {
    let h = Harness::new();
    let reference = h.add_document("job", scripted("stall")).await;
    let registration = h.service.register_job(&reference, None).await.unwrap();
    h.tick().await;

    for _ in 0..3 {
        let report = h.service.job_status(registration.uid).await.unwrap();
        assert_eq!(report.status, JobStatus::Failed);
    }

    let job = h.jobs.get(registration.uid).await.unwrap();
    assert_eq!(
        job.log,
        vec![
            "scripted job started",
            "JOBAPI: Failed to poll progress: backend went away"
        ]
    );
}

#[tokio::test]
async fn test_register_unknown_document() {
    let h = Harness::new();

    let err = h
        .service
        .register_job("dmss://WorkflowDS/$missing", Some("token".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Document(ref e) if e.is_not_found()));

    let err = h.service.register_job("no-slash", None).await.unwrap_err();
    assert!(matches!(err, JobError::BadRequest(_)));
}

#[tokio::test]
async fn test_one_shot_job_end_to_end() {
    let h = Harness::new();
    let reference = h.add_document("job", reverse("hello")).await;

    let registration = h.service.register_job(&reference, None).await.unwrap();
    assert_eq!(registration.status, JobStatus::Starting);
    assert_eq!(registration.message, "Job successfully started");

    // not run yet: the handler is not polled
    let report = h.service.job_status(registration.uid).await.unwrap();
    assert_eq!(report.status, JobStatus::Starting);
    assert!(report.message.starts_with("Started: "));

    assert_eq!(h.tick().await, 1);
    assert!(h.triggers.is_empty().await);

    let job = h.jobs.get(registration.uid).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.ended.is_some());
    assert!(job.log.contains(&"OK".to_string()));

    let report = h.service.job_status(registration.uid).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.log.last().map(String::as_str), Some("OK"));
    assert_eq!(report.percentage, Some(1.0));

    let (message, payload) = h.service.job_result(registration.uid).await.unwrap();
    assert_eq!(message, "Done");
    assert_eq!(payload, b"olleh".to_vec());

    // the document store sees the final state, without private fields
    let document = h.documents.snapshot(&reference).await.unwrap();
    assert_eq!(document["status"], json!("completed"));
    assert_eq!(document["result"], json!({"description": "olleh"}));
    assert!(document.get("token").is_none());
    assert!(document.get("log").is_none());
}

#[tokio::test]
async fn test_failing_start_fails_the_job() {
    let h = Harness::new();
    let reference = h.add_document("job", scripted("fail")).await;
    let registration = h.service.register_job(&reference, None).await.unwrap();

    h.tick().await;

    let job = h.jobs.get(registration.uid).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.ended.is_some());
    assert!(job.log.iter().any(|line| line == "JOBAPI: Job failed to start: boom"));
}

#[tokio::test]
async fn test_hanging_start_times_out() {
    let h = Harness::with_handler_timeout(Duration::from_millis(50));
    let reference = h.add_document("job", scripted("hang")).await;
    let registration = h.service.register_job(&reference, None).await.unwrap();

    h.tick().await;

    let job = h.jobs.get(registration.uid).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.log.iter().any(|line| line.contains("timed out")));
}

#[tokio::test]
async fn test_started_job_is_running_and_polled() {
    let h = Harness::new();
    let reference = h.add_document("job", scripted("run")).await;
    let registration = h.service.register_job(&reference, None).await.unwrap();
    h.tick().await;

    let job = h.jobs.get(registration.uid).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.ended.is_none());
    assert_eq!(job.log, vec!["scripted job started"]);

    let report = h.service.job_status(registration.uid).await.unwrap();
    assert_eq!(report.status, JobStatus::Running);
    assert_eq!(report.log, vec!["polled"]);
    assert_eq!(report.percentage, Some(0.25));

    assert!(matches!(
        h.service.job_result(registration.uid).await,
        Err(JobError::NotCompleted(JobStatus::Running))
    ));
}

#[tokio::test]
async fn test_pushed_progress_stops_polling() {
    let h = Harness::new();
    let reference = h.add_document("job", scripted("run")).await;
    let registration = h.service.register_job(&reference, None).await.unwrap();
    h.tick().await;

    let job = h
        .service
        .push_progress(registration.uid, false, ProgressUpdate::logs(vec!["step 1".to_string()]))
        .await
        .unwrap();
    assert!(job.external_progress);
    assert_eq!(job.log, vec!["scripted job started", "step 1"]);

    h.service
        .push_progress(registration.uid, false, ProgressUpdate::percentage(0.75))
        .await
        .unwrap();
    h.service
        .push_progress(registration.uid, false, ProgressUpdate::status(JobStatus::Completed))
        .await
        .unwrap();

    let report = h.service.job_status(registration.uid).await.unwrap();
    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.percentage, Some(0.75));
    assert_eq!(report.log, vec!["scripted job started", "step 1"]);

    // the scripted handler has no result capability
    assert!(matches!(
        h.service.job_result(registration.uid).await,
        Err(JobError::Unsupported(Capability::Result))
    ));
}

#[tokio::test]
async fn test_remove_twice() {
    let h = Harness::new();
    let reference = h.add_document("job", scripted("run")).await;
    let registration = h.service.register_job(&reference, None).await.unwrap();

    let removed = h.service.remove_job(registration.uid).await.unwrap();
    assert_eq!(removed.status, JobStatus::Removed);
    assert!(removed.response.contains("does not support the 'remove' operation"));
    assert!(h.jobs.is_empty().await);
    assert!(h.triggers.is_empty().await);
    assert_eq!(
        h.documents.snapshot(&reference).await.unwrap()["status"],
        json!("removed")
    );

    assert!(matches!(
        h.service.remove_job(registration.uid).await,
        Err(JobError::NotFound(uid)) if uid == registration.uid
    ));

    // the trigger went with the job
    assert_eq!(h.tick().await, 0);
}

#[tokio::test]
async fn test_service_operations() {
    let h = Harness::new();
    let reference = h.add_document("job", scripted("run")).await;
    let registration = h.service.register_job(&reference, None).await.unwrap();

    let message = h.service.setup_service(registration.uid, "db").await.unwrap();
    assert_eq!(message, "service db is up");
    assert!(matches!(
        h.service.teardown_service(registration.uid, "db").await,
        Err(JobError::Unsupported(Capability::TeardownService))
    ));
}

#[tokio::test]
async fn test_malformed_cron_arms_nothing() {
    let h = Harness::new();
    let mut document = recurring(None, None);
    document["schedule"]["cron"] = json!("61 * * * *");
    let reference = h.add_document("recurring", document).await;

    let err = h.service.register_job(&reference, None).await.unwrap_err();
    assert!(matches!(err, JobError::BadRequest(ref msg) if msg.starts_with("Failed to schedule cron job")));
    assert!(h.jobs.is_empty().await);
    assert!(h.triggers.is_empty().await);
}

#[tokio::test]
async fn test_recurring_job_spawns_child_runs() {
    let h = Harness::new();
    let reference = h.add_document("recurring", recurring(None, None)).await;

    let registration = h.service.register_job(&reference, None).await.unwrap();
    assert_eq!(registration.status, JobStatus::Registered);
    assert!(registration.message.starts_with("Cron job successfully registered. Next scheduled run at"));

    let first = h.scheduler.next_fire_time(registration.uid).await.unwrap().unwrap();
    assert_eq!(h.fire(registration.uid).await, 1);

    // the cron trigger is re-armed, the child got a one-shot trigger
    let next = h.scheduler.next_fire_time(registration.uid).await.unwrap().unwrap();
    assert!(next > first);
    assert_eq!(h.triggers.len().await, 2);

    let parent = h.jobs.get(registration.uid).await.unwrap();
    assert_eq!(parent.status, JobStatus::Registered);
    assert!(parent.log.iter().any(|line| line.starts_with("JOBAPI: Starting scheduled job from")));

    let runs = h
        .documents
        .snapshot(&format!("{reference}.schedule.runs"))
        .await
        .unwrap();
    let runs = runs.as_array().unwrap();
    assert_eq!(runs.len(), 1);
    let child_id = runs[0]["_id"].as_str().unwrap();

    // the child runs on its own trigger and completes
    assert_eq!(h.tick().await, 1);
    let child = h
        .documents
        .snapshot(&format!("dmss://WorkflowDS/${child_id}"))
        .await
        .unwrap();
    assert_eq!(child["status"], json!("completed"));
    assert_eq!(child["result"], json!({"description": "gnirrucer"}));

    let report = h.service.job_status(registration.uid).await.unwrap();
    assert!(report.message.starts_with("Next scheduled run @"));
}

#[tokio::test]
async fn test_recurring_job_inside_another_document() {
    let h = Harness::new();
    let container = h
        .add_document(
            "container",
            json!({"type": "dmss://WorkflowDS/Blueprints/Container", "jobs": [recurring(None, None)]}),
        )
        .await;
    let reference = format!("{container}.jobs[0]");

    let registration = h.service.register_job(&reference, None).await.unwrap();
    assert_eq!(h.fire(registration.uid).await, 1);

    let parent = h.jobs.get(registration.uid).await.unwrap();
    assert_eq!(parent.status, JobStatus::Registered);
    assert_eq!(parent.dmss_id, reference);

    let runs = h
        .documents
        .snapshot(&format!("{reference}.schedule.runs"))
        .await
        .unwrap();
    assert_eq!(runs.as_array().unwrap().len(), 1);
    assert!(h.documents.snapshot(&format!("{container}.schedule")).await.is_none());

    assert_eq!(h.tick().await, 1);
    let child_id = runs[0]["_id"].as_str().unwrap();
    let child = h
        .documents
        .snapshot(&format!("dmss://WorkflowDS/${child_id}"))
        .await
        .unwrap();
    assert_eq!(child["status"], json!("completed"));
}

#[tokio::test]
async fn test_recurring_job_not_yet_valid() {
    let h = Harness::new();
    let start = Utc::now() + chrono::Duration::days(1);
    let reference = h.add_document("recurring", recurring(Some(start), None)).await;
    let registration = h.service.register_job(&reference, None).await.unwrap();

    assert_eq!(h.fire(registration.uid).await, 1);

    let parent = h.jobs.get(registration.uid).await.unwrap();
    assert!(parent.log.iter().any(|line| line.starts_with("Job is not valid yet")));
    assert_eq!(
        h.documents
            .snapshot(&format!("{reference}.schedule.runs"))
            .await
            .unwrap(),
        json!([])
    );
    assert_eq!(h.triggers.len().await, 1);
}

#[tokio::test]
async fn test_expired_recurring_job_removes_itself() {
    let h = Harness::new();
    let end = Utc::now() - chrono::Duration::hours(1);
    let reference = h.add_document("recurring", recurring(None, Some(end))).await;
    let registration = h.service.register_job(&reference, None).await.unwrap();

    assert_eq!(h.fire(registration.uid).await, 1);

    assert!(h.jobs.is_empty().await);
    assert!(h.triggers.is_empty().await);
    assert_eq!(
        h.documents.snapshot(&reference).await.unwrap()["status"],
        json!("removed")
    );
    assert!(matches!(
        h.service.job_status(registration.uid).await,
        Err(JobError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_rehydrate_after_restart() {
    let h = Harness::new();
    let reference = h.add_document("recurring", recurring(None, None)).await;
    let registration = h.service.register_job(&reference, None).await.unwrap();

    // a restart loses nothing but the triggers of a volatile trigger store
    h.scheduler.cancel(registration.uid).await.unwrap();
    assert_eq!(h.service.rehydrate().await.unwrap(), 1);
    assert!(h.scheduler.next_fire_time(registration.uid).await.unwrap().is_some());
}
