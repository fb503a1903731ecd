use std::sync::Arc;

use base64::prelude::*;
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

use super::{BatchReport, JobResult, Trigger, BATCH_SIZE, MAX_RETRIES_EXCEEDED, RETRY_DELAY};
use crate::crypto::{self, CryptoError, EncryptionKey};
use crate::enrich::{self, CompanyLookup};
use crate::mail::{
    html_to_text, MailTransport, OutgoingAttachment, OutgoingEmail, SendErrorKind, SmtpConfig,
};
use crate::models::{Campaign, EmailJob, JobStatus};
use crate::store::{JobStore, JobUpdate, QueuedJob, StoreError, Tier};
use crate::tracking;

/// Why a claimed job could not be prepared for sending. Never retried.
#[derive(Debug, thiserror::Error)]
enum PrepareError {
    #[error("Credential error: could not decrypt SMTP password")]
    Credentials(#[source] CryptoError),
    #[error("Invalid SMTP port {0}")]
    Port(i32),
    #[error("Content error: {0}")]
    Content(#[from] CryptoError),
    #[error("Attachment error: could not load attachments: {0}")]
    Store(#[from] StoreError),
    #[error("Attachment error: {filename} is not valid base64")]
    Attachment {
        filename: String,
        #[source]
        source: base64::DecodeError,
    },
}

struct Content {
    recipient: String,
    subject: String,
    body: String,
}

/// Runs batches of email jobs against a [`JobStore`].
///
/// ```ignore
/// let processor = Processor::new(store, Arc::new(TransportPool::new()), lookup, key, public_url)
///     .batch_size(10);
/// let report = processor.run_batch(Trigger::automatic(TriggerSource::Cron)).await?;
/// ```
pub struct Processor {
    jobs: Arc<dyn JobStore>,
    transport: Arc<dyn MailTransport>,
    lookup: Arc<dyn CompanyLookup>,
    key: EncryptionKey,
    public_url: String,
    batch_size: usize,
}

impl Processor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        transport: Arc<dyn MailTransport>,
        lookup: Arc<dyn CompanyLookup>,
        key: EncryptionKey,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            transport,
            lookup,
            key,
            public_url: public_url.into(),
            batch_size: BATCH_SIZE,
        }
    }

    /// Jobs per batch (default: 10).
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.max(1);
        self
    }

    /// Select, claim and send one batch.
    ///
    /// Only selection and the idle backlog count can fail the whole batch. Errors while
    /// handling a single job are logged and reported as an unsuccessful result.
    pub async fn run_batch(&self, trigger: Trigger) -> Result<BatchReport, StoreError> {
        let now = OffsetDateTime::now_utc();
        let batch = self.select_batch(trigger, now).await?;

        if batch.is_empty() {
            let backlog = self.jobs.backlog(now).await?;
            tracing::debug!(
                future_pending = backlog.future_pending,
                failed_retryable = backlog.failed_retryable,
                "no jobs due"
            );
            return Ok(BatchReport::idle(backlog));
        }

        let processed = batch.len();
        tracing::info!(processed, manual = trigger.manual, source = ?trigger.source, "processing batch");

        let mut results = Vec::with_capacity(processed);
        for queued in batch {
            let job_id = queued.job.id;
            let span = tracing::info_span!("email_job", %job_id, campaign_id = %queued.campaign.id);

            match self.process(queued, trigger).instrument(span).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(%job_id, error = %e, "job processing failed");
                    results.push(JobResult::failed(job_id));
                }
            }
        }

        Ok(BatchReport::Processed {
            processed,
            batch_size: self.batch_size,
            results,
        })
    }

    /// Concatenate the tiers in priority order until the batch is full.
    async fn select_batch(
        &self,
        trigger: Trigger,
        now: OffsetDateTime,
    ) -> Result<Vec<QueuedJob>, StoreError> {
        let mut batch = Vec::with_capacity(self.batch_size);

        for tier in Tier::ALL {
            if tier == Tier::ForcedRetry && !trigger.retries_failed() {
                continue;
            }
            let remaining = self.batch_size - batch.len();
            if remaining == 0 {
                break;
            }
            let selected = self.jobs.select(tier, now, remaining).await?;
            tracing::trace!(?tier, selected = selected.len(), "tier selected");
            batch.extend(selected);
        }

        Ok(batch)
    }

    /// Handle one job. `None` means another worker claimed it first.
    async fn process(
        &self,
        queued: QueuedJob,
        trigger: Trigger,
    ) -> Result<Option<JobResult>, StoreError> {
        let QueuedJob { job, campaign } = queued;

        if !self.jobs.claim(job.id).await? {
            tracing::debug!("job already claimed, skipping");
            return Ok(None);
        }

        if job.retry_count >= job.max_retries && !trigger.manual {
            tracing::warn!(
                retry_count = job.retry_count,
                max_retries = job.max_retries,
                "retry ceiling reached"
            );
            self.fail(job.id, MAX_RETRIES_EXCEEDED.to_string(), false, false)
                .await?;
            return Ok(Some(JobResult::failed(job.id)));
        }

        let email = match self.prepare(&job, &campaign).await {
            Ok(email) => email,
            Err(e) => {
                tracing::warn!(error = %e, "job cannot be sent");
                self.fail(job.id, e.to_string(), false, false).await?;
                return Ok(Some(JobResult::failed(job.id)));
            }
        };

        let sent_at = OffsetDateTime::now_utc();
        match self.transport.send(&email).await {
            Ok(sent) => {
                tracing::info!(message_id = sent.message_id.as_deref(), "email sent");
                let update = JobUpdate::Sent {
                    sent_at,
                    sent_via_cron: trigger.manual && job.status == JobStatus::Failed,
                };
                self.jobs.update(job.id, &update).await?;
                Ok(Some(JobResult::sent(job.id)))
            }
            Err(e) if e.kind == SendErrorKind::Retryable => {
                let attempt = job.retry_count + 1;
                let next_retry_at = sent_at + RETRY_DELAY;
                tracing::warn!(error = %e, attempt, %next_retry_at, "send failed, scheduling retry");
                let update = JobUpdate::Retry {
                    next_retry_at,
                    error: format!("{} (retry {}/{})", e.detail, attempt, job.max_retries),
                };
                self.jobs.update(job.id, &update).await?;
                Ok(Some(JobResult::retrying(job.id)))
            }
            Err(e) => {
                let bounced = e.kind == SendErrorKind::Rejected;
                tracing::error!(error = %e, bounced, "send failed permanently");
                self.fail(job.id, e.detail, true, bounced).await?;
                Ok(Some(JobResult::failed(job.id)))
            }
        }
    }

    async fn fail(
        &self,
        id: Uuid,
        error: String,
        count_attempt: bool,
        bounced: bool,
    ) -> Result<(), StoreError> {
        let update = JobUpdate::Failed {
            error,
            count_attempt,
            bounced,
        };
        self.jobs.update(id, &update).await
    }

    /// Decrypt, enrich and assemble the message.
    async fn prepare(
        &self,
        job: &EmailJob,
        campaign: &Campaign,
    ) -> Result<OutgoingEmail, PrepareError> {
        let password =
            crypto::decrypt_strict(self.key.clone(), campaign.smtp_password_enc.clone())
                .await
                .map_err(PrepareError::Credentials)?;
        let port =
            u16::try_from(campaign.smtp_port).map_err(|_| PrepareError::Port(campaign.smtp_port))?;

        let content = self.decrypt_content(job).await?;
        let attachments = self.decrypt_attachments(campaign).await?;
        let content = self.enrich(job, content).await;

        let html = tracking::inject_open_pixel(&content.body, &self.public_url, &job.tracking_id);
        let text = html_to_text(&content.body);

        let username =
            crypto::decrypt_maybe_legacy(self.key.clone(), campaign.smtp_username_enc.clone())
                .await?;
        let from_name =
            crypto::decrypt_maybe_legacy_opt(self.key.clone(), campaign.from_name_enc.clone())
                .await?;

        Ok(OutgoingEmail {
            to: content.recipient,
            subject: content.subject,
            text,
            html,
            attachments,
            config: SmtpConfig {
                host: campaign.smtp_host.clone(),
                port,
                secure: campaign.smtp_secure,
                username,
                password,
                from_name,
            },
        })
    }

    async fn decrypt_content(&self, job: &EmailJob) -> Result<Content, CryptoError> {
        let key = &self.key;
        Ok(Content {
            recipient: crypto::decrypt_maybe_legacy(key.clone(), job.recipient_enc.clone()).await?,
            subject: crypto::decrypt_maybe_legacy(key.clone(), job.subject_enc.clone()).await?,
            body: crypto::decrypt_maybe_legacy(key.clone(), job.body_enc.clone()).await?,
        })
    }

    async fn decrypt_attachments(
        &self,
        campaign: &Campaign,
    ) -> Result<Vec<OutgoingAttachment>, PrepareError> {
        let stored = self.jobs.attachments(campaign.id).await?;

        let mut attachments = Vec::with_capacity(stored.len());
        for attachment in stored {
            let filename =
                crypto::decrypt_maybe_legacy(self.key.clone(), attachment.filename_enc).await?;
            let encoded =
                crypto::decrypt_maybe_legacy(self.key.clone(), attachment.content_enc).await?;
            let content = BASE64_STANDARD
                .decode(encoded.trim())
                .map_err(|source| PrepareError::Attachment {
                    filename: filename.clone(),
                    source,
                })?;
            attachments.push(OutgoingAttachment {
                filename,
                content,
                content_type: attachment.content_type,
            });
        }
        Ok(attachments)
    }

    /// Fill `{{company}}` placeholders and persist the result. Never fails the send.
    async fn enrich(&self, job: &EmailJob, content: Content) -> Content {
        if !enrich::contains_placeholder(&content.subject)
            && !enrich::contains_placeholder(&content.body)
        {
            return content;
        }

        let company = self.lookup.company_for(&content.recipient).await;
        tracing::debug!(company = company.as_deref(), "placeholder enrichment");

        let subject = enrich::replace_placeholders(&content.subject, company.as_deref());
        let body = enrich::replace_placeholders(&content.body, company.as_deref());

        if let Err(e) = self.save_enriched(job.id, &subject, &body).await {
            tracing::warn!(error = %e, "failed to persist enriched content");
        }

        Content {
            recipient: content.recipient,
            subject,
            body,
        }
    }

    async fn save_enriched(&self, id: Uuid, subject: &str, body: &str) -> anyhow::Result<()> {
        let subject_enc = crypto::encrypt(self.key.clone(), subject.to_string()).await?;
        let body_enc = crypto::encrypt(self.key.clone(), body.to_string()).await?;
        self.jobs.save_content(id, &subject_enc, &body_enc).await?;
        Ok(())
    }
}
