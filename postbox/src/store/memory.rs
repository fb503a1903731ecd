use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    Backlog, CampaignStore, CampaignSummary, JobStore, JobUpdate, QueuedJob, StoreError, Tier,
    UserStore,
};
use crate::models::{Attachment, Campaign, EmailJob, JobStatus, StatusCounts, User};

#[derive(Default)]
struct Tables {
    campaigns: HashMap<Uuid, Campaign>,
    jobs: Vec<EmailJob>,
    attachments: Vec<Attachment>,
    users: Vec<User>,
    writes: usize,
}

/// In-memory store for development and testing.
///
/// Everything sits behind one mutex, which makes [`JobStore::claim`] a true
/// compare-and-swap. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a job, for assertions.
    pub async fn job(&self, id: Uuid) -> Option<EmailJob> {
        let tables = self.tables.lock().await;
        tables.jobs.iter().find(|j| j.id == id).cloned()
    }

    pub async fn jobs(&self) -> Vec<EmailJob> {
        self.tables.lock().await.jobs.clone()
    }

    /// Overwrite a job row, for seeding test states.
    pub async fn put_job(&self, job: EmailJob) {
        let mut tables = self.tables.lock().await;
        match tables.jobs.iter_mut().find(|j| j.id == job.id) {
            Some(existing) => *existing = job,
            None => tables.jobs.push(job),
        }
    }

    /// Number of successful writes since creation. Lets tests assert a call wrote nothing.
    pub async fn write_count(&self) -> usize {
        self.tables.lock().await.writes
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn select(
        &self,
        tier: Tier,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<QueuedJob>, StoreError> {
        let tables = self.tables.lock().await;

        let mut selected: Vec<QueuedJob> = tables
            .jobs
            .iter()
            .filter_map(|job| {
                let campaign = tables.campaigns.get(&job.campaign_id)?;
                tier.matches(job, campaign.kind, now).then(|| QueuedJob {
                    job: job.clone(),
                    campaign: campaign.clone(),
                })
            })
            .collect();

        selected.sort_by_key(|q| q.job.scheduled_for);
        selected.truncate(limit);
        Ok(selected)
    }

    async fn claim(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Tables { jobs, writes, .. } = &mut *tables;
        match jobs.iter_mut().find(|j| j.id == id) {
            Some(job) if job.status.is_claimable() => {
                job.status = JobStatus::Sending;
                *writes += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update(&self, id: Uuid, update: &JobUpdate) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let Tables { jobs, writes, .. } = &mut *tables;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(StoreError::NotFound("job"))?;
        *writes += 1;

        match update {
            JobUpdate::Sent {
                sent_at,
                sent_via_cron,
            } => {
                job.status = JobStatus::Sent;
                job.sent_at = Some(*sent_at);
                job.error = None;
                job.next_retry_at = None;
                job.sent_via_cron = *sent_via_cron;
            }
            JobUpdate::Retry {
                next_retry_at,
                error,
            } => {
                job.status = JobStatus::Pending;
                job.retry_count += 1;
                job.original_scheduled_for.get_or_insert(job.scheduled_for);
                job.scheduled_for = *next_retry_at;
                job.next_retry_at = Some(*next_retry_at);
                job.error = Some(error.clone());
            }
            JobUpdate::Failed {
                error,
                count_attempt,
                bounced,
            } => {
                job.status = JobStatus::Failed;
                job.error = Some(error.clone());
                job.next_retry_at = None;
                job.bounced |= *bounced;
                if *count_attempt {
                    job.retry_count += 1;
                }
            }
        }
        Ok(())
    }

    async fn save_content(
        &self,
        id: Uuid,
        subject_enc: &str,
        body_enc: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let Tables { jobs, writes, .. } = &mut *tables;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(StoreError::NotFound("job"))?;
        *writes += 1;
        job.subject_enc = subject_enc.to_string();
        job.body_enc = body_enc.to_string();
        Ok(())
    }

    async fn attachments(&self, campaign_id: Uuid) -> Result<Vec<Attachment>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .attachments
            .iter()
            .filter(|a| a.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn backlog(&self, now: OffsetDateTime) -> Result<Backlog, StoreError> {
        let tables = self.tables.lock().await;
        let mut backlog = Backlog::default();
        for job in &tables.jobs {
            match job.status {
                JobStatus::Pending if job.scheduled_for > now => backlog.future_pending += 1,
                JobStatus::Failed if job.retry_count < job.max_retries => {
                    backlog.failed_retryable += 1
                }
                _ => {}
            }
        }
        Ok(backlog)
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn create_campaign(
        &self,
        campaign: &Campaign,
        attachments: &[Attachment],
        jobs: &[EmailJob],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.campaigns.insert(campaign.id, campaign.clone());
        tables.attachments.extend_from_slice(attachments);
        tables.jobs.extend_from_slice(jobs);
        tables.writes += 1;
        Ok(())
    }

    async fn list_campaigns(&self, owner_id: Uuid) -> Result<Vec<CampaignSummary>, StoreError> {
        let tables = self.tables.lock().await;
        let mut summaries: Vec<CampaignSummary> = tables
            .campaigns
            .values()
            .filter(|c| c.owner_id == owner_id)
            .map(|campaign| {
                let mut counts = StatusCounts::default();
                for job in tables.jobs.iter().filter(|j| j.campaign_id == campaign.id) {
                    counts.add(job.status, 1);
                }
                CampaignSummary {
                    campaign: campaign.clone(),
                    counts,
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.campaign.created_at.cmp(&a.campaign.created_at));
        Ok(summaries)
    }

    async fn campaign_jobs(
        &self,
        owner_id: Uuid,
        campaign_id: Uuid,
    ) -> Result<Vec<EmailJob>, StoreError> {
        let tables = self.tables.lock().await;
        match tables.campaigns.get(&campaign_id) {
            Some(c) if c.owner_id == owner_id => {}
            _ => return Err(StoreError::NotFound("campaign")),
        }
        let mut jobs: Vec<EmailJob> = tables
            .jobs
            .iter()
            .filter(|j| j.campaign_id == campaign_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.scheduled_for);
        Ok(jobs)
    }

    async fn delete_campaign(&self, owner_id: Uuid, campaign_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.campaigns.get(&campaign_id) {
            Some(c) if c.owner_id == owner_id => {}
            _ => return Ok(false),
        }
        tables.campaigns.remove(&campaign_id);
        tables.jobs.retain(|j| j.campaign_id != campaign_id);
        tables.attachments.retain(|a| a.campaign_id != campaign_id);
        tables.writes += 1;
        Ok(true)
    }

    async fn cancel_job(&self, owner_id: Uuid, job_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Tables {
            campaigns,
            jobs,
            writes,
            ..
        } = &mut *tables;
        let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) else {
            return Ok(false);
        };
        let owned = campaigns
            .get(&job.campaign_id)
            .is_some_and(|c| c.owner_id == owner_id);
        if !owned || job.status != JobStatus::Pending {
            return Ok(false);
        }
        job.status = JobStatus::Cancelled;
        *writes += 1;
        Ok(true)
    }

    async fn record_open(&self, tracking_id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Tables { jobs, writes, .. } = &mut *tables;
        match jobs.iter_mut().find(|j| j.tracking_id == tracking_id) {
            Some(job) => {
                job.open_count += 1;
                *writes += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_survey(&self, tracking_id: &str, response: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let Tables { jobs, writes, .. } = &mut *tables;
        match jobs.iter_mut().find(|j| j.tracking_id == tracking_id) {
            Some(job) => {
                job.survey_response = Some(response.to_string());
                *writes += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("user"));
        }
        tables.users.push(user.clone());
        tables.writes += 1;
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|u| u.email == email).cloned())
    }
}
