use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use super::{Processor, Trigger};

const CHANNEL_CAPACITY: usize = 16;
const SUBMIT_ATTEMPTS: u32 = 3;
const SUBMIT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error("drain loop has stopped")]
    Closed,
    #[error("drain queue still full after {0} attempts")]
    Full(u32),
}

/// Sending side of the drain loop.
#[derive(Clone)]
pub struct DrainHandle {
    tx: mpsc::Sender<Trigger>,
}

impl DrainHandle {
    /// Queue a continuation, retrying up to three times one second apart while the
    /// queue is full.
    pub async fn submit(&self, trigger: Trigger) -> Result<(), DrainError> {
        for attempt in 1..=SUBMIT_ATTEMPTS {
            match self.tx.try_send(trigger) {
                Ok(()) => {
                    tracing::debug!(attempt, manual = trigger.manual, "continuation submitted");
                    return Ok(());
                }
                Err(TrySendError::Closed(_)) => return Err(DrainError::Closed),
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(attempt, "drain queue full");
                    if attempt < SUBMIT_ATTEMPTS {
                        tokio::time::sleep(SUBMIT_BACKOFF).await;
                    }
                }
            }
        }
        Err(DrainError::Full(SUBMIT_ATTEMPTS))
    }
}

/// Consumes continuations and runs batches until one comes back short.
///
/// ```ignore
/// let (drain, handle) = Drain::new(processor.clone(), settings.max_continuations);
/// drain.start();
/// handle.submit(Trigger::automatic(TriggerSource::Cron)).await?;
/// ```
pub struct Drain {
    processor: Arc<Processor>,
    rx: mpsc::Receiver<Trigger>,
    max_batches: u32,
}

impl Drain {
    /// `max_batches` bounds how many batches one continuation may chain.
    pub fn new(processor: Arc<Processor>, max_batches: u32) -> (Self, DrainHandle) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let drain = Self {
            processor,
            rx,
            max_batches: max_batches.max(1),
        };
        (drain, DrainHandle { tx })
    }

    /// Spawn the loop on the runtime. It ends once every [`DrainHandle`] is dropped.
    pub fn start(self) -> JoinHandle<()> {
        let handle = tokio::spawn(self.run());
        tracing::info!("drain loop running");
        handle
    }

    pub async fn run(mut self) {
        while let Some(trigger) = self.rx.recv().await {
            self.drain(trigger).await;
        }
        tracing::debug!("drain loop stopped");
    }

    /// Run batches for one continuation. Returns the number of batches run.
    ///
    /// Every batch runs as a continuation, so `FAILED` jobs are never re-selected here.
    pub async fn drain(&self, trigger: Trigger) -> u32 {
        let trigger = trigger.continuation();
        let mut batches = 0;

        while batches < self.max_batches {
            match self.processor.run_batch(trigger).await {
                Ok(report) => {
                    batches += 1;
                    if !report.is_full() {
                        return batches;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, batches, "continuation batch failed");
                    return batches;
                }
            }
        }

        tracing::warn!(
            batches,
            manual = trigger.manual,
            "continuation limit reached, leaving the rest for the next trigger"
        );
        batches
    }
}
