//! The delivery queue.
//!
//! # Architecture
//!
//! - [`Processor`]: runs one batch. Selects due jobs in priority order, claims each one,
//!   decrypts and enriches it, sends it and records the outcome.
//! - [`Drain`]: a long-lived consumer that keeps running batches while they come back
//!   full. Fed through a [`DrainHandle`].
//! - [`CronTrigger`]: fires a batch on a cron schedule.
//!
//! Any of these can overlap with an HTTP trigger. The claim in
//! [`JobStore::claim`](crate::store::JobStore::claim) is what keeps a job from being sent
//! twice.

mod drain;
mod processor;
mod scheduler;

pub use drain::{Drain, DrainError, DrainHandle};
pub use processor::Processor;
pub use scheduler::{CronTrigger, SchedulerError};

use serde::Serialize;
use uuid::Uuid;

use crate::store::{Backlog, StoreError};

/// Jobs per batch unless configured otherwise.
pub const BATCH_SIZE: usize = 10;

/// Delay before a retryable failure is attempted again.
pub const RETRY_DELAY: time::Duration = time::Duration::seconds(60);

pub const MAX_RETRIES_EXCEEDED: &str = "Max retries exceeded";

/// Who asked for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// External scheduler presenting the cron secret.
    Scheduler,
    /// Signed-in user from the dashboard.
    Session,
    /// Automation presenting the bypass secret.
    Bypass,
    /// Unauthenticated call accepted in development.
    Development,
    /// Built-in cron schedule.
    Cron,
    /// Follow-up batch from the drain loop.
    Continuation,
    /// `postbox process` on the command line.
    Cli,
}

/// A request to run a batch.
///
/// `manual` lifts the retry ceiling and enables the forced retry of `FAILED` jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub manual: bool,
    pub source: TriggerSource,
}

impl Trigger {
    pub fn automatic(source: TriggerSource) -> Self {
        Self {
            manual: false,
            source,
        }
    }

    pub fn manual(source: TriggerSource) -> Self {
        Self {
            manual: true,
            source,
        }
    }

    /// The trigger for a follow-up batch. Keeps the manual flag, so the retry ceiling
    /// stays lifted, but see [`Trigger::retries_failed`].
    pub fn continuation(self) -> Self {
        Self {
            manual: self.manual,
            source: TriggerSource::Continuation,
        }
    }

    /// Whether this batch re-selects `FAILED` jobs.
    ///
    /// Only the batch a user asked for does. Follow-up batches in the same chain would
    /// otherwise pick up the jobs that just failed and resend them until the chain limit.
    pub fn retries_failed(&self) -> bool {
        self.manual && self.source != TriggerSource::Continuation
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    pub id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrying: Option<bool>,
}

impl JobResult {
    pub fn sent(id: Uuid) -> Self {
        Self {
            id,
            success: true,
            retrying: None,
        }
    }

    pub fn failed(id: Uuid) -> Self {
        Self {
            id,
            success: false,
            retrying: None,
        }
    }

    pub fn retrying(id: Uuid) -> Self {
        Self {
            id,
            success: false,
            retrying: Some(true),
        }
    }
}

/// What a batch did, as returned to the trigger caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BatchReport {
    #[serde(rename_all = "camelCase")]
    Processed {
        /// Jobs selected, including any lost to another worker's claim.
        processed: usize,
        batch_size: usize,
        results: Vec<JobResult>,
    },
    #[serde(rename_all = "camelCase")]
    Idle {
        processed: usize,
        message: String,
        future_pending_count: i64,
        failed_retryable_count: i64,
    },
}

impl BatchReport {
    pub fn idle(backlog: Backlog) -> Self {
        BatchReport::Idle {
            processed: 0,
            message: "No emails due for sending".to_string(),
            future_pending_count: backlog.future_pending,
            failed_retryable_count: backlog.failed_retryable,
        }
    }

    pub fn processed(&self) -> usize {
        match self {
            BatchReport::Processed { processed, .. } => *processed,
            BatchReport::Idle { .. } => 0,
        }
    }

    /// A full batch means more work may be waiting.
    pub fn is_full(&self) -> bool {
        match self {
            BatchReport::Processed {
                processed,
                batch_size,
                ..
            } => processed >= batch_size,
            BatchReport::Idle { .. } => false,
        }
    }
}

/// Run one batch and, when it came back full, hand a continuation to the drain loop.
///
/// The submission runs detached so the caller gets its report without waiting on the
/// retry backoff.
pub async fn run_and_continue(
    processor: &Processor,
    drain: &DrainHandle,
    trigger: Trigger,
) -> Result<BatchReport, StoreError> {
    let report = processor.run_batch(trigger).await?;

    if report.is_full() {
        let drain = drain.clone();
        tokio::spawn(async move {
            if let Err(e) = drain.submit(trigger.continuation()).await {
                tracing::error!(error = %e, "failed to submit continuation");
            }
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn idle_report_shape() {
        let report = BatchReport::idle(Backlog {
            future_pending: 4,
            failed_retryable: 1,
        });
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "processed": 0,
                "message": "No emails due for sending",
                "futurePendingCount": 4,
                "failedRetryableCount": 1,
            })
        );
        assert!(!report.is_full());
    }

    #[test]
    fn processed_report_shape() {
        let id = Uuid::nil();
        let report = BatchReport::Processed {
            processed: 2,
            batch_size: 2,
            results: vec![JobResult::sent(id), JobResult::retrying(id)],
        };
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "processed": 2,
                "batchSize": 2,
                "results": [
                    { "id": id, "success": true },
                    { "id": id, "success": false, "retrying": true },
                ],
            })
        );
        assert!(report.is_full());
    }

    #[test]
    fn continuation_keeps_manual_flag() {
        let first = Trigger::manual(TriggerSource::Session);
        assert!(first.retries_failed());

        let next = first.continuation();
        assert!(next.manual);
        assert_eq!(next.source, TriggerSource::Continuation);
        assert!(!next.retries_failed());
        assert!(!Trigger::automatic(TriggerSource::Cron).retries_failed());
    }
}
