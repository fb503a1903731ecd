//! Cached SMTP transports, one per credential set.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::PoolConfig;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tokio::sync::Mutex;

use super::{MailError, MailTransport, OutgoingEmail, SendError, SentMessage, SmtpConfig};

const MESSAGES_PER_SECOND: NonZeroU32 = match NonZeroU32::new(3) {
    Some(n) => n,
    None => panic!("rate must be non-zero"),
};
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    host: String,
    port: u16,
    secure: bool,
    username: String,
    password: String,
}

impl From<&SmtpConfig> for PoolKey {
    fn from(config: &SmtpConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            secure: config.secure,
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

struct Pooled {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    limiter: DefaultDirectRateLimiter,
}

/// SMTP transports keyed by host, port, TLS mode and credentials.
///
/// Each transport holds at most one open connection and is limited to three messages per
/// second. A retryable (connection-class) failure drops the cached transport so the next
/// send reconnects from scratch.
#[derive(Clone, Default)]
pub struct TransportPool {
    transports: Arc<Mutex<HashMap<PoolKey, Arc<Pooled>>>>,
}

impl TransportPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached transports.
    pub async fn len(&self) -> usize {
        self.transports.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn transport_for(&self, config: &SmtpConfig) -> Result<Arc<Pooled>, MailError> {
        let key = PoolKey::from(config);
        let mut transports = self.transports.lock().await;
        if let Some(pooled) = transports.get(&key) {
            return Ok(pooled.clone());
        }

        let relay = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        };
        let builder = relay.map_err(|e| MailError::Smtp(e.to_string()))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .timeout(Some(COMMAND_TIMEOUT))
            .pool_config(
                PoolConfig::new()
                    .max_size(1)
                    .connection_timeout(CONNECTION_TIMEOUT)
                    .idle_timeout(IDLE_TIMEOUT),
            )
            .build();

        tracing::debug!(host = %config.host, port = config.port, "opened smtp transport");

        let pooled = Arc::new(Pooled {
            transport,
            limiter: RateLimiter::direct(Quota::per_second(MESSAGES_PER_SECOND)),
        });
        transports.insert(key, pooled.clone());
        Ok(pooled)
    }

    async fn evict(&self, config: &SmtpConfig) {
        let key = PoolKey::from(config);
        if self.transports.lock().await.remove(&key).is_some() {
            tracing::info!(host = %config.host, port = config.port, "evicted smtp transport");
        }
    }
}

#[async_trait]
impl MailTransport for TransportPool {
    async fn send(&self, email: &OutgoingEmail) -> Result<SentMessage, SendError> {
        let message = email.to_message()?;
        let message_id = message
            .headers()
            .get_raw("Message-ID")
            .map(|id| id.to_string());

        let pooled = self.transport_for(&email.config).await?;
        pooled.limiter.until_ready().await;

        match pooled.transport.send(message).await {
            Ok(_) => Ok(SentMessage { message_id }),
            Err(e) => {
                let err = SendError::from_smtp(&e);
                if err.is_retryable() {
                    self.evict(&email.config).await;
                }
                Err(err)
            }
        }
    }
}
