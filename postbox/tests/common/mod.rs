#![allow(dead_code)]

use std::sync::Arc;

use postbox::campaigns::{CampaignDraft, NewCampaign, NewSmtp};
use postbox::crypto::EncryptionKey;
use postbox::models::{CampaignKind, EmailJob};
use postbox::queue::Processor;
use postbox::store::{CampaignStore, MemoryStore};
use postbox::testing::{RecordingTransport, StaticLookup};
use time::OffsetDateTime;
use uuid::Uuid;

pub const PUBLIC_URL: &str = "https://postbox.test";

pub struct Harness {
    pub store: MemoryStore,
    pub transport: Arc<RecordingTransport>,
    pub key: EncryptionKey,
    pub processor: Arc<Processor>,
}

impl Harness {
    pub fn new(batch_size: usize) -> Self {
        Self::with_lookup(batch_size, StaticLookup::company("Acme"))
    }

    pub fn with_lookup(batch_size: usize, lookup: StaticLookup) -> Self {
        let store = MemoryStore::new();
        let transport = Arc::new(RecordingTransport::new());
        let key = test_key();
        let processor = Processor::new(
            Arc::new(store.clone()),
            transport.clone(),
            Arc::new(lookup),
            key.clone(),
            PUBLIC_URL,
        )
        .batch_size(batch_size);

        Harness {
            store,
            transport,
            key,
            processor: Arc::new(processor),
        }
    }

    /// Insert a campaign with `recipients` jobs, all due an hour ago.
    pub async fn campaign(&self, kind: CampaignKind, recipients: usize) -> Vec<EmailJob> {
        self.campaign_with(request(kind, recipients)).await
    }

    pub async fn campaign_with(&self, req: NewCampaign) -> Vec<EmailJob> {
        let now = OffsetDateTime::now_utc();
        let draft = CampaignDraft::build(self.key.clone(), Uuid::new_v4(), req, now)
            .await
            .unwrap();
        self.store
            .create_campaign(&draft.campaign, &draft.attachments, &draft.jobs)
            .await
            .unwrap();
        draft.jobs
    }

    /// Overwrite a seeded job after applying `f`.
    pub async fn edit(&self, job: &EmailJob, f: impl FnOnce(&mut EmailJob)) -> EmailJob {
        let mut job = self.store.job(job.id).await.unwrap();
        f(&mut job);
        self.store.put_job(job.clone()).await;
        job
    }

    pub async fn job(&self, id: Uuid) -> EmailJob {
        self.store.job(id).await.unwrap()
    }
}

pub fn test_key() -> EncryptionKey {
    EncryptionKey::try_from(&[42u8; 32][..]).unwrap()
}

pub fn request(kind: CampaignKind, recipients: usize) -> NewCampaign {
    NewCampaign {
        name: Some("Outreach".into()),
        kind,
        smtp: NewSmtp {
            host: "smtp.example.com".into(),
            port: 587,
            secure: false,
            username: "sales@example.com".into(),
            password: "app-password".into(),
            from_name: Some("Sales Team".into()),
        },
        recipients: (0..recipients)
            .map(|i| format!("lead{i}@acme.io"))
            .collect(),
        subject: "Quarterly update".into(),
        body: "<html><body><p>Hello</p></body></html>".into(),
        start_at: Some(OffsetDateTime::now_utc() - time::Duration::hours(1)),
        duration_minutes: 0,
        attachments: vec![],
        max_retries: None,
    }
}
