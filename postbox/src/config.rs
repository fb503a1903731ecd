use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::crypto::{deserialize_base64_key, EncryptionKey};

pub use config::ConfigError;

pub trait EnvConfig: Sized {
    fn from_env() -> Result<Self, ConfigError>;
    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError>;
}

impl<D> EnvConfig for D
where
    D: DeserializeOwned,
{
    fn from_env() -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize()
    }

    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(config::Environment::with_prefix(prefix))
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    #[default]
    Production,
}

/// Runtime settings, read from the environment (optionally via `.env`).
///
/// | Variable | Required | Description |
/// |----------|----------|-------------|
/// | `DATABASE_URL` | Yes | Postgres connection string |
/// | `ENCRYPTION_KEY` | Yes | base64 of 32 random bytes (`postbox keygen`) |
/// | `HMAC_KEY` | Yes | session signing secret, at least 32 chars |
/// | `CRON_SECRET` | No | bearer token accepted from an external scheduler |
/// | `BYPASS_SECRET` | No | value accepted in `x-vercel-protection-bypass` |
/// | `PUBLIC_URL` | No | base URL embedded in tracking pixels |
/// | `APP_ENV` | No | `production` (default) or `development` |
/// | `PORT` | No | HTTP port (default: 3030) |
/// | `BATCH_SIZE` | No | jobs per processor batch (default: 10) |
/// | `CRON_SCHEDULE` | No | built-in trigger schedule (default: every minute) |
/// | `MAX_CONTINUATIONS` | No | batches one drain may chain (default: 50) |
#[derive(Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    #[serde(deserialize_with = "deserialize_base64_key")]
    pub encryption_key: EncryptionKey,
    pub hmac_key: String,
    #[serde(default)]
    pub cron_secret: Option<String>,
    #[serde(default)]
    pub bypass_secret: Option<String>,
    #[serde(default = "default_public_url")]
    pub public_url: String,
    #[serde(default)]
    pub app_env: AppEnv,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_cron_schedule")]
    pub cron_schedule: String,
    #[serde(default = "default_max_continuations")]
    pub max_continuations: u32,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn is_production(&self) -> bool {
        self.app_env == AppEnv::Production
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "[redacted]")
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("database_url", &"[redacted]")
            .field("encryption_key", &self.encryption_key)
            .field("hmac_key", &"[redacted]")
            .field("cron_secret", &redacted(&self.cron_secret))
            .field("bypass_secret", &redacted(&self.bypass_secret))
            .field("public_url", &self.public_url)
            .field("app_env", &self.app_env)
            .field("port", &self.port)
            .field("batch_size", &self.batch_size)
            .field("cron_schedule", &self.cron_schedule)
            .field("max_continuations", &self.max_continuations)
            .finish()
    }
}

fn default_public_url() -> String {
    "http://localhost:3030".to_string()
}

fn default_port() -> u16 {
    3030
}

fn default_batch_size() -> usize {
    crate::queue::BATCH_SIZE
}

fn default_cron_schedule() -> String {
    "0 * * * * *".to_string()
}

fn default_max_continuations() -> u32 {
    50
}
