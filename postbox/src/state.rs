use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::{JwtManager, TriggerSecrets};
use crate::crypto::EncryptionKey;
use crate::queue::{DrainHandle, Processor};
use crate::store::{CampaignStore, UserStore};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub campaigns: Arc<dyn CampaignStore>,
    pub users: Arc<dyn UserStore>,
    pub processor: Arc<Processor>,
    pub drain: DrainHandle,
    pub jwt: JwtManager,
    pub key: EncryptionKey,
    pub secrets: TriggerSecrets,
}

impl FromRef<AppState> for JwtManager {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl FromRef<AppState> for TriggerSecrets {
    fn from_ref(state: &AppState) -> Self {
        state.secrets.clone()
    }
}
