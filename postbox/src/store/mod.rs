//! Persistence for campaigns, jobs, attachments and users.
//!
//! - [`JobStore`]: what the queue processor needs (tiered selection, the atomic claim,
//!   outcome bookkeeping).
//! - [`CampaignStore`]: campaign CRUD, history and tracking writes.
//! - [`UserStore`]: accounts for session login.
//! - [`PgStore`]: Postgres implementation.
//! - [`MemoryStore`]: in-memory implementation for development and testing.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{Attachment, Campaign, CampaignKind, EmailJob, StatusCounts, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0} already exists")]
    Conflict(&'static str),
}

/// Selection tiers in priority order.
///
/// Tiers are disjoint: the first three differ on `next_retry_at` or campaign kind, and
/// [`Tier::ForcedRetry`] is the only one selecting `FAILED` rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// `PENDING`, due, no retry scheduled, planned campaign.
    Campaign,
    /// `PENDING`, due, no retry scheduled, direct send.
    Direct,
    /// `PENDING` with `next_retry_at <= now`.
    RetryDue,
    /// `FAILED`, regardless of retry count. Manual triggers only.
    ForcedRetry,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Campaign, Tier::Direct, Tier::RetryDue, Tier::ForcedRetry];

    /// Campaign kind filter for the first two tiers.
    pub fn kind(&self) -> Option<CampaignKind> {
        match self {
            Tier::Campaign => Some(CampaignKind::Scheduled),
            Tier::Direct => Some(CampaignKind::Direct),
            Tier::RetryDue | Tier::ForcedRetry => None,
        }
    }

    /// Whether `job` (belonging to a campaign of `kind`) is selectable in this tier.
    pub fn matches(&self, job: &EmailJob, kind: CampaignKind, now: OffsetDateTime) -> bool {
        use crate::models::JobStatus::{Failed, Pending};
        match self {
            Tier::Campaign | Tier::Direct => {
                job.status == Pending
                    && job.scheduled_for <= now
                    && job.next_retry_at.is_none()
                    && Some(kind) == self.kind()
            }
            Tier::RetryDue => {
                job.status == Pending && job.next_retry_at.is_some_and(|at| at <= now)
            }
            Tier::ForcedRetry => job.status == Failed,
        }
    }
}

/// A selected job with the campaign it belongs to.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: EmailJob,
    pub campaign: Campaign,
}

/// Outcome written back after a claimed job was handled.
///
/// Every variant releases the `SENDING` lock.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Sent {
        sent_at: OffsetDateTime,
        sent_via_cron: bool,
    },
    /// Back to `PENDING`: bumps `retry_count`, moves `scheduled_for` to `next_retry_at`
    /// and sets `original_scheduled_for` once.
    Retry {
        next_retry_at: OffsetDateTime,
        error: String,
    },
    /// Terminal `FAILED`. `count_attempt` bumps `retry_count`.
    Failed {
        error: String,
        count_attempt: bool,
        bounced: bool,
    },
}

/// Counts reported when there is nothing due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backlog {
    /// `PENDING` jobs scheduled in the future.
    pub future_pending: i64,
    /// `FAILED` jobs still below their retry ceiling.
    pub failed_retryable: i64,
}

#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Up to `limit` jobs selectable in `tier`, oldest `scheduled_for` first.
    async fn select(
        &self,
        tier: Tier,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<QueuedJob>, StoreError>;

    /// Atomically move the job to `SENDING` if it is still `PENDING` or `FAILED`.
    ///
    /// Returns `false` when another worker got there first. For Postgres this is a
    /// conditional `UPDATE ... WHERE status IN (..)` checked by rows affected.
    async fn claim(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn update(&self, id: Uuid, update: &JobUpdate) -> Result<(), StoreError>;

    /// Persist enriched content for audit.
    async fn save_content(
        &self,
        id: Uuid,
        subject_enc: &str,
        body_enc: &str,
    ) -> Result<(), StoreError>;

    async fn attachments(&self, campaign_id: Uuid) -> Result<Vec<Attachment>, StoreError>;

    async fn backlog(&self, now: OffsetDateTime) -> Result<Backlog, StoreError>;
}

/// A campaign as listed for its owner.
#[derive(Debug, Clone)]
pub struct CampaignSummary {
    pub campaign: Campaign,
    pub counts: StatusCounts,
}

#[async_trait]
pub trait CampaignStore: Send + Sync + 'static {
    /// Insert the campaign, its attachments and jobs in one transaction.
    async fn create_campaign(
        &self,
        campaign: &Campaign,
        attachments: &[Attachment],
        jobs: &[EmailJob],
    ) -> Result<(), StoreError>;

    async fn list_campaigns(&self, owner_id: Uuid) -> Result<Vec<CampaignSummary>, StoreError>;

    async fn campaign_jobs(
        &self,
        owner_id: Uuid,
        campaign_id: Uuid,
    ) -> Result<Vec<EmailJob>, StoreError>;

    /// Returns `false` if the campaign does not exist or is not owned by `owner_id`.
    async fn delete_campaign(&self, owner_id: Uuid, campaign_id: Uuid) -> Result<bool, StoreError>;

    /// `PENDING -> CANCELLED`. Returns `false` when the job is missing, not owned, or no
    /// longer pending.
    async fn cancel_job(&self, owner_id: Uuid, job_id: Uuid) -> Result<bool, StoreError>;

    async fn record_open(&self, tracking_id: &str) -> Result<bool, StoreError>;

    async fn record_survey(&self, tracking_id: &str, response: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Fails with [`StoreError::Conflict`] when the email is taken.
    async fn create_user(&self, user: &User) -> Result<(), StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
}
