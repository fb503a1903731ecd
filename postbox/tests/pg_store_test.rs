//! Runs against a real Postgres when `DATABASE_URL` is set; skipped otherwise.

mod common;

use common::{request, test_key};
use postbox::campaigns::CampaignDraft;
use postbox::models::{CampaignKind, EmailJob, JobStatus, User};
use postbox::store::{CampaignStore, JobStore, JobUpdate, PgStore, UserStore};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

async fn store() -> Option<PgStore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres store test");
        return None;
    };
    let store = PgStore::connect(&url).await.unwrap();
    store.migrate().await.unwrap();
    Some(store)
}

async fn reload(store: &PgStore, owner: Uuid, job: &EmailJob) -> EmailJob {
    store
        .campaign_jobs(owner, job.campaign_id)
        .await
        .unwrap()
        .into_iter()
        .find(|j| j.id == job.id)
        .unwrap()
}

#[tokio::test]
async fn claim_retry_and_backlog_against_postgres() {
    let Some(store) = store().await else {
        return;
    };

    let owner = User {
        id: Uuid::new_v4(),
        email: format!("{}@pgstore.test", Uuid::new_v4()),
        password_hash: "unused".into(),
        created_at: OffsetDateTime::now_utc(),
    };
    store.create_user(&owner).await.unwrap();

    let now = OffsetDateTime::now_utc();
    let mut draft = CampaignDraft::build(
        test_key(),
        owner.id,
        request(CampaignKind::Scheduled, 3),
        now,
    )
    .await
    .unwrap();
    draft.jobs[2].scheduled_for = now + Duration::days(1);

    let before = store.backlog(now).await.unwrap();
    store
        .create_campaign(&draft.campaign, &draft.attachments, &draft.jobs)
        .await
        .unwrap();

    let retried = reload(&store, owner.id, &draft.jobs[0]).await;
    let failed = &draft.jobs[1];

    // Only one claim wins.
    assert!(store.claim(retried.id).await.unwrap());
    assert!(!store.claim(retried.id).await.unwrap());
    assert_eq!(
        reload(&store, owner.id, &retried).await.status,
        JobStatus::Sending
    );

    // The first retry remembers the original slot; later ones keep it.
    for attempt in 1..=2 {
        if attempt > 1 {
            assert!(store.claim(retried.id).await.unwrap());
        }
        let update = JobUpdate::Retry {
            next_retry_at: now + Duration::minutes(5 * i64::from(attempt)),
            error: format!("timeout (retry {attempt}/3)"),
        };
        store.update(retried.id, &update).await.unwrap();

        let job = reload(&store, owner.id, &retried).await;
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, attempt);
        assert_eq!(job.original_scheduled_for, Some(retried.scheduled_for));
        assert!(job.next_retry_at.is_some());
    }

    assert!(store.claim(failed.id).await.unwrap());
    let update = JobUpdate::Failed {
        error: "Authentication failed".into(),
        count_attempt: true,
        bounced: false,
    };
    store.update(failed.id, &update).await.unwrap();
    let job = reload(&store, owner.id, failed).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 1);

    // One job pushed out by the retry, one scheduled tomorrow.
    let after = store.backlog(now).await.unwrap();
    assert_eq!(after.future_pending - before.future_pending, 2);
    assert_eq!(after.failed_retryable - before.failed_retryable, 1);

    assert!(store
        .delete_campaign(owner.id, draft.campaign.id)
        .await
        .unwrap());
    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(owner.id)
        .execute(store.pool())
        .await
        .unwrap();
}
