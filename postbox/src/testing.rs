//! Test doubles for the processor's collaborators.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::enrich::CompanyLookup;
use crate::mail::{MailTransport, OutgoingEmail, SendError, SentMessage};

/// Records every message instead of sending it. Scripted failures are returned first,
/// one per send.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutgoingEmail>>,
    failures: Mutex<VecDeque<SendError>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next send with `err`.
    pub async fn fail_next(&self, err: SendError) {
        self.failures.lock().await.push_back(err);
    }

    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, email: &OutgoingEmail) -> Result<SentMessage, SendError> {
        if let Some(err) = self.failures.lock().await.pop_front() {
            return Err(err);
        }
        let mut sent = self.sent.lock().await;
        sent.push(email.clone());
        Ok(SentMessage {
            message_id: Some(format!("<{}@postbox.test>", sent.len())),
        })
    }
}

/// Answers every lookup with the same company.
#[derive(Debug, Clone, Default)]
pub struct StaticLookup(pub Option<String>);

impl StaticLookup {
    pub fn company(name: &str) -> Self {
        Self(Some(name.to_string()))
    }
}

#[async_trait]
impl CompanyLookup for StaticLookup {
    async fn company_for(&self, _address: &str) -> Option<String> {
        self.0.clone()
    }
}
