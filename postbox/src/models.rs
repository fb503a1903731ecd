//! Persisted records. Fields named `*_enc` hold values sealed with
//! [`EncryptionKey::seal`](crate::crypto::EncryptionKey::seal), or plaintext for legacy rows.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Default `max_retries` for new jobs.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Status of an email job.
///
/// `Sending` is a transient lock held between the claim and the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Sending,
    Sent,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sending => "SENDING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Statuses a claim may transition out of.
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// For sqlx: JobStatus <-> String conversion
impl TryFrom<String> for JobStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "PENDING" => Ok(Self::Pending),
            "SENDING" => Ok(Self::Sending),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Whether a campaign was planned or fired off immediately.
///
/// Direct sends are drained after planned campaigns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
    #[default]
    Scheduled,
    Direct,
}

impl CampaignKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Direct => "direct",
        }
    }
}

impl TryFrom<String> for CampaignKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "direct" => Ok(Self::Direct),
            other => Err(format!("unknown campaign kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[sqlx(try_from = "String")]
    pub kind: CampaignKind,
    pub name_enc: Option<String>,
    pub smtp_host: String,
    pub smtp_port: i32,
    pub smtp_secure: bool,
    pub smtp_username_enc: String,
    pub smtp_password_enc: String,
    pub from_name_enc: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmailJob {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub recipient_enc: String,
    pub subject_enc: String,
    pub body_enc: String,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub scheduled_for: OffsetDateTime,
    pub original_scheduled_for: Option<OffsetDateTime>,
    pub sent_at: Option<OffsetDateTime>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<OffsetDateTime>,
    pub tracking_id: String,
    pub open_count: i32,
    pub survey_response: Option<String>,
    pub sent_via_cron: bool,
    pub bounced: bool,
}

impl EmailJob {
    /// A fresh pending job; the caller supplies sealed content.
    pub fn pending(
        campaign_id: Uuid,
        recipient_enc: String,
        subject_enc: String,
        body_enc: String,
        scheduled_for: OffsetDateTime,
        max_retries: i32,
        tracking_id: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            recipient_enc,
            subject_enc,
            body_enc,
            status: JobStatus::Pending,
            scheduled_for,
            original_scheduled_for: None,
            sent_at: None,
            error: None,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            tracking_id,
            open_count: 0,
            survey_response: None,
            sent_via_cron: false,
            bounced: false,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Attachment {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub filename_enc: String,
    /// Sealed base64 of the raw bytes.
    pub content_enc: String,
    pub content_type: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub created_at: OffsetDateTime,
}

/// Per-status job counts for one campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pending: i64,
    pub sending: i64,
    pub sent: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: JobStatus, n: i64) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Sending => self.sending += n,
            JobStatus::Sent => self.sent += n,
            JobStatus::Failed => self.failed += n,
            JobStatus::Cancelled => self.cancelled += n,
        }
    }
}
