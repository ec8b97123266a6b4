//! End-to-end scheduler behavior against the in-process mock engine.

mod common;

use anneal_core::TrainingConfig;
use anneal_orchestrator::{JobStatus, MetricValue, MockEngine, SchedulerConfig};
use common::{fast_scheduler, harness, small_config, wait_for, MODEL, PROJECT, SMALL_DATASET};
use std::time::Duration;

#[tokio::test]
async fn test_job_runs_to_completion_with_progress_and_metrics() {
    let mut h = harness(fast_scheduler(2), MockEngine::new()).await;
    h.orchestrator.start().await.unwrap();

    let id = h
        .orchestrator
        .create_job(PROJECT, SMALL_DATASET, MODEL, small_config())
        .await
        .unwrap();
    let done = wait_for(&h.orchestrator, &id, |j| j.status.is_terminal()).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.progress, 1.0);
    assert_eq!(done.total_steps, 12);
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
    assert!(done.error_detail().is_none());

    let Some(MetricValue::Series(loss)) = done.metrics.get("loss") else {
        panic!("expected a loss series");
    };
    assert_eq!(loss.len(), 12);
    assert!(loss.windows(2).all(|w| w[1].value < w[0].value), "loss should decrease");

    // The final checkpoint lands on the last step.
    let ckpt = done.checkpoint.expect("completed job should have a checkpoint");
    assert_eq!(ckpt.step, 12);
    assert_eq!(ckpt.job_id, id);
}

#[tokio::test]
async fn test_single_slot_admits_in_creation_order() {
    let engine = MockEngine::new().with_step_delay(Duration::from_millis(20));
    let mut h = harness(fast_scheduler(1), engine).await;
    h.orchestrator.start().await.unwrap();

    let first = h
        .orchestrator
        .create_job(PROJECT, SMALL_DATASET, MODEL, small_config())
        .await
        .unwrap();
    let second = h
        .orchestrator
        .create_job(PROJECT, SMALL_DATASET, MODEL, small_config())
        .await
        .unwrap();

    // The older job takes the only slot; the newer one waits behind it.
    wait_for(&h.orchestrator, &first, |j| j.status == JobStatus::Running).await;
    assert_eq!(h.orchestrator.get_job(&second).await.unwrap().status, JobStatus::Queued);

    let first_done = wait_for(&h.orchestrator, &first, |j| j.status.is_terminal()).await;
    let second_done = wait_for(&h.orchestrator, &second, |j| j.status.is_terminal()).await;
    assert_eq!(first_done.status, JobStatus::Completed);
    assert_eq!(second_done.status, JobStatus::Completed);
    assert!(second_done.started_at.unwrap() >= first_done.completed_at.unwrap());
}

#[tokio::test]
async fn test_cancel_queued_job_never_reaches_a_worker() {
    let engine = MockEngine::new().with_step_delay(Duration::from_millis(20));
    let mut h = harness(fast_scheduler(1), engine).await;
    h.orchestrator.start().await.unwrap();

    let running = h
        .orchestrator
        .create_job(PROJECT, SMALL_DATASET, MODEL, small_config())
        .await
        .unwrap();
    let queued = h
        .orchestrator
        .create_job(PROJECT, SMALL_DATASET, MODEL, small_config())
        .await
        .unwrap();
    wait_for(&h.orchestrator, &running, |j| j.status == JobStatus::Running).await;

    h.orchestrator.cancel_job(&queued).await.unwrap();
    let cancelled = wait_for(&h.orchestrator, &queued, |j| j.status.is_terminal()).await;
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert!(cancelled.started_at.is_none());
    assert_eq!(cancelled.progress, 0.0);
    assert!(cancelled.metrics.is_empty());
}

#[tokio::test]
async fn test_cancel_running_job_stops_within_a_step() {
    let engine = MockEngine::new().with_step_delay(Duration::from_millis(30));
    let mut h = harness(fast_scheduler(1), engine).await;
    h.orchestrator.start().await.unwrap();

    let config = TrainingConfig { save_steps: 2, ..small_config() };
    let id =
        h.orchestrator.create_job(PROJECT, SMALL_DATASET, MODEL, config).await.unwrap();
    wait_for(&h.orchestrator, &id, |j| j.progress > 0.0).await;

    h.orchestrator.cancel_job(&id).await.unwrap();
    let done = wait_for(&h.orchestrator, &id, |j| j.status.is_terminal()).await;

    assert_eq!(done.status, JobStatus::Cancelled);
    assert!(done.progress < 1.0);
    assert!(done.error_detail().is_none());
    assert!(done.completed_at.is_some());
    // Checkpoints are still only written on the save cadence.
    if let Some(ckpt) = done.checkpoint {
        assert_eq!(ckpt.step % 2, 0);
    }
}

#[tokio::test]
async fn test_cancel_does_not_wait_for_the_next_save_boundary() {
    // One save boundary at the very last step; cancellation must still land
    // within a step of the request.
    let engine = MockEngine::new().with_step_delay(Duration::from_millis(50));
    let mut h = harness(fast_scheduler(1), engine).await;
    h.orchestrator.start().await.unwrap();

    let config = TrainingConfig { save_steps: 12, ..small_config() };
    let id =
        h.orchestrator.create_job(PROJECT, SMALL_DATASET, MODEL, config).await.unwrap();
    wait_for(&h.orchestrator, &id, |j| j.progress > 0.0).await;

    h.orchestrator.cancel_job(&id).await.unwrap();
    let done = wait_for(&h.orchestrator, &id, |j| j.status.is_terminal()).await;

    assert_eq!(done.status, JobStatus::Cancelled);
    assert!(done.progress < 1.0, "job ran to the end despite the cancel request");
}

#[tokio::test]
async fn test_cancel_observed_as_running_always_takes_effect() {
    let engine = MockEngine::new().with_step_delay(Duration::from_millis(20));
    let mut h = harness(fast_scheduler(1), engine).await;
    h.orchestrator.start().await.unwrap();

    // Cancelling the instant a job is first seen Running must never be lost
    // to the admission hand-off.
    for _ in 0..5 {
        let id = h
            .orchestrator
            .create_job(PROJECT, SMALL_DATASET, MODEL, small_config())
            .await
            .unwrap();
        wait_for(&h.orchestrator, &id, |j| j.status == JobStatus::Running).await;
        h.orchestrator.cancel_job(&id).await.unwrap();
        let done = wait_for(&h.orchestrator, &id, |j| j.status.is_terminal()).await;
        assert_eq!(done.status, JobStatus::Cancelled);
    }
}

#[tokio::test]
async fn test_transient_step_failure_is_retried_to_completion() {
    let mut h = harness(fast_scheduler(1), MockEngine::new()).await;
    h.engine.fail_transient_at(5, "accelerator contention");
    h.orchestrator.start().await.unwrap();

    let id = h
        .orchestrator
        .create_job(PROJECT, SMALL_DATASET, MODEL, small_config())
        .await
        .unwrap();
    let done = wait_for(&h.orchestrator, &id, |j| j.status.is_terminal()).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.error_detail().is_none());
    let Some(MetricValue::Series(loss)) = done.metrics.get("loss") else {
        panic!("expected a loss series");
    };
    // The retried step reports exactly once.
    assert_eq!(loss.len(), 12);
}

#[tokio::test]
async fn test_transient_failures_on_distinct_steps_each_get_a_retry() {
    let mut h = harness(fast_scheduler(1), MockEngine::new()).await;
    // The retry budget is per step, so two separated blips that each
    // succeed on retry must not fail the job.
    h.engine.fail_transient_at(3, "contention early");
    h.engine.fail_transient_at(9, "contention late");
    h.orchestrator.start().await.unwrap();

    let id = h
        .orchestrator
        .create_job(PROJECT, SMALL_DATASET, MODEL, small_config())
        .await
        .unwrap();
    let done = wait_for(&h.orchestrator, &id, |j| j.status.is_terminal()).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.error_detail().is_none());
    let Some(MetricValue::Series(loss)) = done.metrics.get("loss") else {
        panic!("expected a loss series");
    };
    assert_eq!(loss.len(), 12);
}

#[tokio::test]
async fn test_fatal_step_failure_fails_the_job_with_detail() {
    let mut h = harness(fast_scheduler(1), MockEngine::new()).await;
    h.engine.fail_fatal_at(3, "device lost");
    h.orchestrator.start().await.unwrap();

    let id = h
        .orchestrator
        .create_job(PROJECT, SMALL_DATASET, MODEL, small_config())
        .await
        .unwrap();
    let done = wait_for(&h.orchestrator, &id, |j| j.status.is_terminal()).await;

    assert_eq!(done.status, JobStatus::Failed);
    assert!(done.error_detail().unwrap().contains("device lost"));
    assert!(done.progress < 1.0);
    assert!(done.completed_at.is_some());

    // The two steps that succeeded before the failure are still recorded.
    let Some(MetricValue::Series(loss)) = done.metrics.get("loss") else {
        panic!("expected a loss series");
    };
    assert_eq!(loss.len(), 2);
}

#[tokio::test]
async fn test_running_jobs_never_exceed_slot_count() {
    let engine = MockEngine::new().with_step_delay(Duration::from_millis(20));
    let mut h = harness(fast_scheduler(2), engine).await;
    h.orchestrator.start().await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            h.orchestrator
                .create_job(PROJECT, SMALL_DATASET, MODEL, small_config())
                .await
                .unwrap(),
        );
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        assert!(h.store.running_count().await <= 2, "slot bound violated");
        let jobs = h.orchestrator.list_jobs().await;
        if jobs.iter().all(|j| j.status.is_terminal()) {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not finish in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for id in &ids {
        assert_eq!(h.orchestrator.get_job(id).await.unwrap().status, JobStatus::Completed);
    }
}

#[tokio::test]
async fn test_oversized_job_is_held_while_smaller_jobs_admit() {
    // Slot budget sized so tinyllama fits but phi-2 does not; creation-time
    // validation passes for both against the full machine budget.
    let config = SchedulerConfig { slot_memory_mb: 2_000, ..fast_scheduler(1) };
    let mut h = harness(config, MockEngine::new()).await;
    h.orchestrator.start().await.unwrap();

    let held = h
        .orchestrator
        .create_job(PROJECT, SMALL_DATASET, "phi-2", small_config())
        .await
        .unwrap();
    let small = h
        .orchestrator
        .create_job(PROJECT, SMALL_DATASET, MODEL, small_config())
        .await
        .unwrap();

    // The younger, smaller job overtakes the held one.
    let done = wait_for(&h.orchestrator, &small, |j| j.status.is_terminal()).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(h.orchestrator.get_job(&held).await.unwrap().status, JobStatus::Queued);

    h.orchestrator.cancel_job(&held).await.unwrap();
    assert_eq!(
        h.orchestrator.get_job(&held).await.unwrap().status,
        JobStatus::Cancelled
    );
}
