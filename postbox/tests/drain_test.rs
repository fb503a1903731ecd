mod common;

use std::time::Duration;

use common::Harness;
use postbox::mail::SendError;
use postbox::models::{CampaignKind, JobStatus};
use postbox::queue::{self, Drain, DrainError, Trigger, TriggerSource};

fn cron() -> Trigger {
    Trigger::automatic(TriggerSource::Cron)
}

async fn wait_for_sends(h: &Harness, expected: usize) {
    for _ in 0..100 {
        if h.transport.sent_count().await >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!(
        "expected {expected} sends, saw {}",
        h.transport.sent_count().await
    );
}

#[tokio::test]
async fn drain_runs_until_a_batch_comes_back_short() {
    let h = Harness::new(2);
    h.campaign(CampaignKind::Scheduled, 5).await;
    let (drain, _handle) = Drain::new(h.processor.clone(), 10);

    let batches = drain.drain(cron().continuation()).await;

    assert_eq!(batches, 3);
    assert_eq!(h.transport.sent_count().await, 5);
}

#[tokio::test]
async fn drain_stops_at_the_batch_limit() {
    let h = Harness::new(2);
    h.campaign(CampaignKind::Scheduled, 10).await;
    let (drain, _handle) = Drain::new(h.processor.clone(), 2);

    let batches = drain.drain(cron()).await;

    assert_eq!(batches, 2);
    assert_eq!(h.transport.sent_count().await, 4);
    let pending = h
        .store
        .jobs()
        .await
        .into_iter()
        .filter(|j| j.status == JobStatus::Pending)
        .count();
    assert_eq!(pending, 6);
}

#[tokio::test]
async fn manual_chain_attempts_failed_jobs_once() {
    let h = Harness::new(3);
    let jobs = h.campaign(CampaignKind::Scheduled, 3).await;
    for job in &jobs {
        h.edit(job, |job| {
            job.status = JobStatus::Failed;
            job.retry_count = 3;
        })
        .await;
    }
    for _ in 0..20 {
        h.transport
            .fail_next(SendError::permanent("Authentication failed"))
            .await;
    }
    let (drain, _handle) = Drain::new(h.processor.clone(), 50);

    let trigger = Trigger::manual(TriggerSource::Session);
    let first = h.processor.run_batch(trigger).await.unwrap();
    assert_eq!(first.processed(), 3);
    assert!(first.is_full());

    let batches = drain.drain(trigger.continuation()).await;

    assert_eq!(batches, 1);
    for job in &jobs {
        let job = h.job(job.id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 4);
    }
}

#[tokio::test]
async fn manual_chain_still_lifts_the_ceiling() {
    let h = Harness::new(1);
    let jobs = h.campaign(CampaignKind::Scheduled, 2).await;
    for job in &jobs {
        h.edit(job, |job| job.retry_count = 3).await;
    }
    let (drain, _handle) = Drain::new(h.processor.clone(), 10);

    drain
        .drain(Trigger::manual(TriggerSource::Session).continuation())
        .await;

    assert_eq!(h.transport.sent_count().await, 2);
}

#[tokio::test]
async fn submitted_continuations_are_drained() {
    let h = Harness::new(2);
    h.campaign(CampaignKind::Scheduled, 4).await;
    let (drain, handle) = Drain::new(h.processor.clone(), 10);
    drain.start();

    handle.submit(cron().continuation()).await.unwrap();

    wait_for_sends(&h, 4).await;
}

#[tokio::test]
async fn full_batch_hands_off_a_continuation() {
    let h = Harness::new(2);
    h.campaign(CampaignKind::Direct, 5).await;
    let (drain, handle) = Drain::new(h.processor.clone(), 10);
    drain.start();

    let report = queue::run_and_continue(&h.processor, &handle, cron())
        .await
        .unwrap();
    assert_eq!(report.processed(), 2);

    wait_for_sends(&h, 5).await;
}

#[tokio::test]
async fn submit_fails_once_the_loop_is_gone() {
    let h = Harness::new(2);
    let (drain, handle) = Drain::new(h.processor.clone(), 10);
    drop(drain);

    assert!(matches!(
        handle.submit(cron()).await,
        Err(DrainError::Closed)
    ));
}
