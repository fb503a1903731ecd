use std::str::FromStr;
use std::sync::Arc;

use tokio_cron_scheduler::{Job as CronJob, JobScheduler, JobSchedulerError};

use super::{run_and_continue, DrainHandle, Processor, Trigger, TriggerSource};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid cron schedule: {0}")]
    InvalidCron(String),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
}

/// Runs an automatic batch on a cron schedule, standing in for an external scheduler.
///
/// Cron expression format:
/// ```text
/// sec   min   hour   day_of_month   month   day_of_week   year
/// *     *     *      *              *       *             *
/// ```
pub struct CronTrigger {
    inner: JobScheduler,
}

impl CronTrigger {
    pub async fn new() -> Result<Self, SchedulerError> {
        let inner = JobScheduler::new().await?;
        Ok(Self { inner })
    }

    pub async fn every(
        &mut self,
        schedule: &str,
        processor: Arc<Processor>,
        drain: DrainHandle,
    ) -> Result<(), SchedulerError> {
        let parsed = cron::Schedule::from_str(schedule)
            .map_err(|e| SchedulerError::InvalidCron(format!("{schedule}: {e}")))?;
        match parsed.upcoming(chrono::Utc).next() {
            Some(next) => tracing::debug!(%schedule, %next, "batch schedule registered"),
            None => return Err(SchedulerError::InvalidCron(format!("{schedule} never fires"))),
        }

        let job = CronJob::new_async(schedule, move |_uuid, _lock| {
            let processor = processor.clone();
            let drain = drain.clone();
            Box::pin(async move {
                let trigger = Trigger::automatic(TriggerSource::Cron);
                match run_and_continue(&processor, &drain, trigger).await {
                    Ok(report) => tracing::debug!(processed = report.processed(), "scheduled batch done"),
                    Err(e) => tracing::error!(error = %e, "scheduled batch failed"),
                }
            })
        })?;

        self.inner.add(job).await?;
        Ok(())
    }

    /// Start firing. Call after registering schedules.
    pub async fn start(self) -> Result<(), SchedulerError> {
        self.inner.start().await?;
        tracing::info!("cron trigger running");
        Ok(())
    }
}
