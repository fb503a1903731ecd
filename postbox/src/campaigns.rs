//! Campaign creation and the decrypted views returned by the API.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::crypto::{CryptoError, EncryptionKey};
use crate::models::{
    Attachment, Campaign, CampaignKind, EmailJob, JobStatus, StatusCounts, DEFAULT_MAX_RETRIES,
};
use crate::store::CampaignSummary;

#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("{0}")]
    Invalid(String),
    #[error("encryption failed: {0}")]
    Crypto(#[from] CryptoError),
    #[error("campaign builder panicked")]
    Panic,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSmtp {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub from_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAttachment {
    pub filename: String,
    /// Base64 of the raw bytes.
    pub content: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

/// Longest window a campaign may be spread over: one year.
pub const MAX_DURATION_MINUTES: u32 = 60 * 24 * 366;

/// Body of `POST /api/campaigns`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCampaign {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: CampaignKind,
    pub smtp: NewSmtp,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub start_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default)]
    pub attachments: Vec<NewAttachment>,
    #[serde(default)]
    pub max_retries: Option<i32>,
}

impl NewCampaign {
    pub fn validate(&self) -> Result<(), CampaignError> {
        let invalid = |msg: &str| Err(CampaignError::Invalid(msg.to_string()));

        if self.recipients.is_empty() {
            return invalid("at least one recipient is required");
        }
        if let Some(bad) = self
            .recipients
            .iter()
            .find(|r| r.trim().parse::<lettre::Address>().is_err())
        {
            return Err(CampaignError::Invalid(format!("invalid recipient: {bad}")));
        }
        if self.smtp.host.trim().is_empty() || self.smtp.port == 0 {
            return invalid("SMTP host and port are required");
        }
        if self.smtp.username.trim().is_empty() || self.smtp.password.is_empty() {
            return invalid("SMTP username and password are required");
        }
        if self.subject.trim().is_empty() {
            return invalid("subject is required");
        }
        if self.duration_minutes > MAX_DURATION_MINUTES {
            return Err(CampaignError::Invalid(format!(
                "durationMinutes cannot exceed {MAX_DURATION_MINUTES}"
            )));
        }
        if self.max_retries.is_some_and(|n| n < 0) {
            return invalid("maxRetries cannot be negative");
        }
        for attachment in &self.attachments {
            if BASE64_STANDARD.decode(attachment.content.trim()).is_err() {
                return Err(CampaignError::Invalid(format!(
                    "attachment {} is not valid base64",
                    attachment.filename
                )));
            }
        }
        Ok(())
    }
}

/// Send times for `count` jobs spread linearly over `duration_minutes`: the first at
/// `start`, the last at `start + duration`. Fails when a time falls outside the
/// representable range.
pub fn schedule_times(
    start: OffsetDateTime,
    count: usize,
    duration_minutes: u32,
) -> Result<Vec<OffsetDateTime>, CampaignError> {
    if count <= 1 {
        return Ok(vec![start; count]);
    }
    let out_of_range = || CampaignError::Invalid("campaign schedule is out of range".into());
    let total_ms = i64::from(duration_minutes) * 60_000;
    let gaps = (count - 1) as i64;
    (0..count as i64)
        .map(|i| {
            let offset = total_ms.checked_mul(i).ok_or_else(out_of_range)? / gaps;
            start
                .checked_add(time::Duration::milliseconds(offset))
                .ok_or_else(out_of_range)
        })
        .collect()
}

/// Opaque token for tracking URLs.
pub fn tracking_token() -> String {
    let bytes: [u8; 16] = rand::random();
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

/// A campaign ready to insert: every secret sealed, one job per recipient.
pub struct CampaignDraft {
    pub campaign: Campaign,
    pub attachments: Vec<Attachment>,
    pub jobs: Vec<EmailJob>,
}

impl CampaignDraft {
    /// Seal and schedule on a blocking thread.
    pub async fn build(
        key: EncryptionKey,
        owner_id: Uuid,
        req: NewCampaign,
        now: OffsetDateTime,
    ) -> Result<CampaignDraft, CampaignError> {
        req.validate()?;
        tokio::task::spawn_blocking(move || Self::build_sync(&key, owner_id, req, now))
            .await
            .map_err(|_| CampaignError::Panic)?
    }

    fn build_sync(
        key: &EncryptionKey,
        owner_id: Uuid,
        req: NewCampaign,
        now: OffsetDateTime,
    ) -> Result<CampaignDraft, CampaignError> {
        let seal_opt = |value: &Option<String>| -> Result<Option<String>, CryptoError> {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(|v| key.seal(v))
                .transpose()
        };

        let campaign = Campaign {
            id: Uuid::new_v4(),
            owner_id,
            kind: req.kind,
            name_enc: seal_opt(&req.name)?,
            smtp_host: req.smtp.host.trim().to_string(),
            smtp_port: i32::from(req.smtp.port),
            smtp_secure: req.smtp.secure,
            smtp_username_enc: key.seal(req.smtp.username.trim())?,
            smtp_password_enc: key.seal(&req.smtp.password)?,
            from_name_enc: seal_opt(&req.smtp.from_name)?,
            created_at: now,
        };

        let attachments = req
            .attachments
            .iter()
            .map(|a| {
                Ok(Attachment {
                    id: Uuid::new_v4(),
                    campaign_id: campaign.id,
                    filename_enc: key.seal(&a.filename)?,
                    content_enc: key.seal(a.content.trim())?,
                    content_type: a.content_type.clone(),
                })
            })
            .collect::<Result<Vec<_>, CryptoError>>()?;

        let times = match req.kind {
            CampaignKind::Direct => vec![now; req.recipients.len()],
            CampaignKind::Scheduled => schedule_times(
                req.start_at.unwrap_or(now),
                req.recipients.len(),
                req.duration_minutes,
            )?,
        };

        let subject_enc = key.seal(&req.subject)?;
        let max_retries = req.max_retries.unwrap_or(DEFAULT_MAX_RETRIES);
        let jobs = req
            .recipients
            .iter()
            .zip(times)
            .map(|(recipient, scheduled_for)| {
                Ok(EmailJob::pending(
                    campaign.id,
                    key.seal(recipient.trim())?,
                    subject_enc.clone(),
                    key.seal(&req.body)?,
                    scheduled_for,
                    max_retries,
                    tracking_token(),
                ))
            })
            .collect::<Result<Vec<_>, CryptoError>>()?;

        Ok(CampaignDraft {
            campaign,
            attachments,
            jobs,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignView {
    pub id: Uuid,
    pub name: Option<String>,
    pub kind: CampaignKind,
    pub smtp_host: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub counts: StatusCounts,
}

impl CampaignView {
    pub fn new(key: &EncryptionKey, summary: CampaignSummary) -> Self {
        let CampaignSummary { campaign, counts } = summary;
        CampaignView {
            id: campaign.id,
            name: campaign.name_enc.as_deref().map(|n| key.open_or_plain(n)),
            kind: campaign.kind,
            smtp_host: campaign.smtp_host,
            created_at: campaign.created_at,
            counts,
        }
    }
}

/// One row of a campaign's history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_for: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub original_scheduled_for: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub sent_at: Option<OffsetDateTime>,
    pub error: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_retry_at: Option<OffsetDateTime>,
    pub open_count: i32,
    pub survey_response: Option<String>,
    pub sent_via_cron: bool,
    pub bounced: bool,
}

impl JobView {
    pub fn new(key: &EncryptionKey, job: EmailJob) -> Self {
        JobView {
            id: job.id,
            recipient: key.open_or_plain(&job.recipient_enc),
            subject: key.open_or_plain(&job.subject_enc),
            status: job.status,
            scheduled_for: job.scheduled_for,
            original_scheduled_for: job.original_scheduled_for,
            sent_at: job.sent_at,
            error: job.error,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            next_retry_at: job.next_retry_at,
            open_count: job.open_count,
            survey_response: job.survey_response,
            sent_via_cron: job.sent_via_cron,
            bounced: job.bounced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn request(recipients: usize) -> NewCampaign {
        NewCampaign {
            name: Some("Spring launch".into()),
            kind: CampaignKind::Scheduled,
            smtp: NewSmtp {
                host: "smtp.example.com".into(),
                port: 587,
                secure: false,
                username: "sales@example.com".into(),
                password: "app-password".into(),
                from_name: Some("Sales".into()),
            },
            recipients: (0..recipients).map(|i| format!("lead{i}@acme.io")).collect(),
            subject: "Hello {{company}}".into(),
            body: "<p>Hi</p>".into(),
            start_at: Some(datetime!(2026-03-01 09:00 UTC)),
            duration_minutes: 60,
            attachments: vec![],
            max_retries: None,
        }
    }

    #[test]
    fn twelve_over_an_hour_is_linear() {
        let start = datetime!(2026-03-01 09:00 UTC);
        let times = schedule_times(start, 12, 60).unwrap();
        assert_eq!(times.len(), 12);
        assert_eq!(times[0], start);
        assert_eq!(times[11], start + time::Duration::minutes(60));
        let gap = times[1] - times[0];
        for pair in times.windows(2) {
            let delta = pair[1] - pair[0];
            assert!((delta - gap).abs() <= time::Duration::milliseconds(1));
        }
    }

    #[test]
    fn single_recipient_starts_immediately() {
        let start = datetime!(2026-03-01 09:00 UTC);
        assert_eq!(schedule_times(start, 1, 60).unwrap(), vec![start]);
        assert!(schedule_times(start, 0, 60).unwrap().is_empty());
    }

    #[test]
    fn tracking_tokens_are_url_safe() {
        let token = tracking_token();
        assert_eq!(token.len(), 22);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, tracking_token());
    }

    #[test]
    fn validation_rejects_bad_input() {
        let mut req = request(1);
        req.recipients = vec!["not-an-address".into()];
        assert!(req.validate().is_err());

        let mut req = request(1);
        req.attachments.push(NewAttachment {
            filename: "a.pdf".into(),
            content: "***".into(),
            content_type: "application/pdf".into(),
        });
        assert!(req.validate().is_err());

        assert!(request(0).validate().is_err());
        assert!(request(2).validate().is_ok());
    }

    #[test]
    fn recipients_must_be_real_addresses() {
        let mut req = request(1);
        req.recipients = vec!["not an@address here".into()];
        assert!(matches!(req.validate(), Err(CampaignError::Invalid(_))));

        req.recipients = vec!["  lead@acme.io ".into()];
        assert!(req.validate().is_ok());
    }

    #[test]
    fn schedule_past_the_calendar_is_rejected() {
        let start = datetime!(9999-12-31 23:00 UTC);
        assert!(matches!(
            schedule_times(start, 2, 120),
            Err(CampaignError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn oversized_duration_is_a_validation_error() {
        let key = EncryptionKey::try_from_base64(&EncryptionKey::generate_base64()).unwrap();
        let mut req = request(3);
        req.duration_minutes = u32::MAX;

        let result =
            CampaignDraft::build(key, Uuid::new_v4(), req, datetime!(2026-02-28 12:00 UTC)).await;
        assert!(matches!(result, Err(CampaignError::Invalid(_))));
    }

    #[tokio::test]
    async fn draft_seals_everything() {
        let key = EncryptionKey::try_from_base64(&EncryptionKey::generate_base64()).unwrap();
        let now = datetime!(2026-02-28 12:00 UTC);
        let draft = CampaignDraft::build(key.clone(), Uuid::new_v4(), request(3), now)
            .await
            .unwrap();

        assert_eq!(draft.jobs.len(), 3);
        let password = key.open(&draft.campaign.smtp_password_enc).unwrap();
        assert_eq!(password, "app-password");
        for job in &draft.jobs {
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
            assert!(key.open(&job.recipient_enc).unwrap().ends_with("@acme.io"));
        }
        assert_eq!(draft.jobs[2].scheduled_for, datetime!(2026-03-01 10:00 UTC));
    }

    #[tokio::test]
    async fn direct_sends_are_due_now() {
        let key = EncryptionKey::try_from_base64(&EncryptionKey::generate_base64()).unwrap();
        let now = datetime!(2026-02-28 12:00 UTC);
        let mut req = request(4);
        req.kind = CampaignKind::Direct;
        let draft = CampaignDraft::build(key, Uuid::new_v4(), req, now).await.unwrap();
        assert!(draft.jobs.iter().all(|j| j.scheduled_for == now));
        assert_eq!(draft.campaign.kind, CampaignKind::Direct);
    }
}
