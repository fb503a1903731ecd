//! Postgres store. Schema lives in `migrations/`.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    Backlog, CampaignStore, CampaignSummary, JobStore, JobUpdate, QueuedJob, StoreError, Tier,
    UserStore,
};
use crate::models::{Attachment, Campaign, EmailJob, JobStatus, StatusCounts, User};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn campaigns_by_id(&self, ids: Vec<Uuid>) -> Result<HashMap<Uuid, Campaign>, StoreError> {
        let campaigns = sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(campaigns.into_iter().map(|c| (c.id, c)).collect())
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn select(
        &self,
        tier: Tier,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<QueuedJob>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let jobs = match tier {
            Tier::Campaign | Tier::Direct => {
                let kind = tier.kind().unwrap_or_default();
                sqlx::query_as::<_, EmailJob>(
                    r#"
                    SELECT j.*
                    FROM email_jobs j
                    JOIN campaigns c ON c.id = j.campaign_id
                    WHERE j.status = 'PENDING'
                      AND j.scheduled_for <= $1
                      AND j.next_retry_at IS NULL
                      AND c.kind = $2
                    ORDER BY j.scheduled_for ASC
                    LIMIT $3
                    "#,
                )
                .bind(now)
                .bind(kind.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Tier::RetryDue => {
                sqlx::query_as::<_, EmailJob>(
                    r#"
                    SELECT * FROM email_jobs
                    WHERE status = 'PENDING' AND next_retry_at <= $1
                    ORDER BY scheduled_for ASC
                    LIMIT $2
                    "#,
                )
                .bind(now)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            Tier::ForcedRetry => {
                sqlx::query_as::<_, EmailJob>(
                    r#"
                    SELECT * FROM email_jobs
                    WHERE status = 'FAILED'
                    ORDER BY scheduled_for ASC
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let mut ids: Vec<Uuid> = jobs.iter().map(|j| j.campaign_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let campaigns = self.campaigns_by_id(ids).await?;

        Ok(jobs
            .into_iter()
            .filter_map(|job| {
                let campaign = campaigns.get(&job.campaign_id)?.clone();
                Some(QueuedJob { job, campaign })
            })
            .collect())
    }

    async fn claim(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE email_jobs SET status = 'SENDING' WHERE id = $1 AND status IN ('PENDING', 'FAILED')",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update(&self, id: Uuid, update: &JobUpdate) -> Result<(), StoreError> {
        let query = match update {
            JobUpdate::Sent {
                sent_at,
                sent_via_cron,
            } => sqlx::query(
                r#"
                UPDATE email_jobs
                SET status = 'SENT', sent_at = $2, error = NULL, next_retry_at = NULL,
                    sent_via_cron = $3
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(*sent_at)
            .bind(*sent_via_cron),
            JobUpdate::Retry {
                next_retry_at,
                error,
            } => sqlx::query(
                r#"
                UPDATE email_jobs
                SET status = 'PENDING',
                    retry_count = retry_count + 1,
                    original_scheduled_for = COALESCE(original_scheduled_for, scheduled_for),
                    scheduled_for = $2,
                    next_retry_at = $2,
                    error = $3
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(*next_retry_at)
            .bind(error.as_str()),
            JobUpdate::Failed {
                error,
                count_attempt,
                bounced,
            } => sqlx::query(
                r#"
                UPDATE email_jobs
                SET status = 'FAILED',
                    error = $2,
                    next_retry_at = NULL,
                    bounced = bounced OR $3,
                    retry_count = retry_count + $4
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(error.as_str())
            .bind(*bounced)
            .bind(i32::from(*count_attempt)),
        };

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("job"));
        }
        Ok(())
    }

    async fn save_content(
        &self,
        id: Uuid,
        subject_enc: &str,
        body_enc: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE email_jobs SET subject_enc = $2, body_enc = $3 WHERE id = $1")
            .bind(id)
            .bind(subject_enc)
            .bind(body_enc)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn attachments(&self, campaign_id: Uuid) -> Result<Vec<Attachment>, StoreError> {
        let attachments =
            sqlx::query_as::<_, Attachment>("SELECT * FROM attachments WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(attachments)
    }

    async fn backlog(&self, now: OffsetDateTime) -> Result<Backlog, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'PENDING' AND scheduled_for > $1) AS future_pending,
                COUNT(*) FILTER (WHERE status = 'FAILED' AND retry_count < max_retries) AS failed_retryable
            FROM email_jobs
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(Backlog {
            future_pending: row.get("future_pending"),
            failed_retryable: row.get("failed_retryable"),
        })
    }
}

#[async_trait]
impl CampaignStore for PgStore {
    async fn create_campaign(
        &self,
        campaign: &Campaign,
        attachments: &[Attachment],
        jobs: &[EmailJob],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, owner_id, kind, name_enc, smtp_host, smtp_port, smtp_secure,
                smtp_username_enc, smtp_password_enc, from_name_enc, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(campaign.id)
        .bind(campaign.owner_id)
        .bind(campaign.kind.as_str())
        .bind(&campaign.name_enc)
        .bind(&campaign.smtp_host)
        .bind(campaign.smtp_port)
        .bind(campaign.smtp_secure)
        .bind(&campaign.smtp_username_enc)
        .bind(&campaign.smtp_password_enc)
        .bind(&campaign.from_name_enc)
        .bind(campaign.created_at)
        .execute(&mut *tx)
        .await?;

        for attachment in attachments {
            sqlx::query(
                r#"
                INSERT INTO attachments (id, campaign_id, filename_enc, content_enc, content_type)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(attachment.id)
            .bind(attachment.campaign_id)
            .bind(&attachment.filename_enc)
            .bind(&attachment.content_enc)
            .bind(&attachment.content_type)
            .execute(&mut *tx)
            .await?;
        }

        for job in jobs {
            sqlx::query(
                r#"
                INSERT INTO email_jobs (
                    id, campaign_id, recipient_enc, subject_enc, body_enc, status,
                    scheduled_for, retry_count, max_retries, tracking_id
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(job.id)
            .bind(job.campaign_id)
            .bind(&job.recipient_enc)
            .bind(&job.subject_enc)
            .bind(&job.body_enc)
            .bind(job.status.as_str())
            .bind(job.scheduled_for)
            .bind(job.retry_count)
            .bind(job.max_retries)
            .bind(&job.tracking_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_campaigns(&self, owner_id: Uuid) -> Result<Vec<CampaignSummary>, StoreError> {
        let campaigns = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let rows = sqlx::query(
            r#"
            SELECT j.campaign_id, j.status, COUNT(*) AS n
            FROM email_jobs j
            JOIN campaigns c ON c.id = j.campaign_id
            WHERE c.owner_id = $1
            GROUP BY j.campaign_id, j.status
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts: HashMap<Uuid, StatusCounts> = HashMap::new();
        for row in rows {
            let status: String = row.get("status");
            let Ok(status) = JobStatus::try_from(status) else {
                continue;
            };
            counts
                .entry(row.get("campaign_id"))
                .or_default()
                .add(status, row.get("n"));
        }

        Ok(campaigns
            .into_iter()
            .map(|campaign| CampaignSummary {
                counts: counts.remove(&campaign.id).unwrap_or_default(),
                campaign,
            })
            .collect())
    }

    async fn campaign_jobs(
        &self,
        owner_id: Uuid,
        campaign_id: Uuid,
    ) -> Result<Vec<EmailJob>, StoreError> {
        let owned: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM campaigns WHERE id = $1 AND owner_id = $2)",
        )
        .bind(campaign_id)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        if !owned {
            return Err(StoreError::NotFound("campaign"));
        }

        let jobs = sqlx::query_as::<_, EmailJob>(
            "SELECT * FROM email_jobs WHERE campaign_id = $1 ORDER BY scheduled_for ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn delete_campaign(&self, owner_id: Uuid, campaign_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1 AND owner_id = $2")
            .bind(campaign_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel_job(&self, owner_id: Uuid, job_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs j
            SET status = 'CANCELLED'
            FROM campaigns c
            WHERE j.id = $1
              AND c.id = j.campaign_id
              AND c.owner_id = $2
              AND j.status = 'PENDING'
            "#,
        )
        .bind(job_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_open(&self, tracking_id: &str) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE email_jobs SET open_count = open_count + 1 WHERE tracking_id = $1")
                .bind(tracking_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_survey(&self, tracking_id: &str, response: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE email_jobs SET survey_response = $2 WHERE tracking_id = $1")
            .bind(tracking_id)
            .bind(response)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("users_email_key") {
                    return StoreError::Conflict("user");
                }
            }
            StoreError::Sqlx(e)
        })?;
        Ok(())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }
}
