//! Outbound mail.
//!
//! The queue processor talks to a [`MailTransport`]. The production implementation is
//! [`TransportPool`], which keeps one pooled [lettre](https://lettre.rs) SMTP transport
//! per distinct credential set and evicts it when the connection goes bad.
//!
//! Failures come back as a typed [`SendError`]:
//!
//! | Kind | Meaning | Processor reaction |
//! |------|---------|--------------------|
//! | `Retryable` | network-class (timeout, refused, reset) | reschedule in 60s |
//! | `Permanent` | anything else (auth, bad message) | `FAILED` |
//! | `Rejected` | server refused the recipient (550/551/553) | `FAILED`, `bounced` |

mod message;
mod pool;

pub use message::{html_to_text, OutgoingAttachment, OutgoingEmail};
pub use pool::TransportPool;

use std::error::Error as StdError;
use std::fmt;
use std::io;

use async_trait::async_trait;
use thiserror::Error;

/// Sends one message.
#[async_trait]
pub trait MailTransport: Send + Sync + 'static {
    async fn send(&self, email: &OutgoingEmail) -> Result<SentMessage, SendError>;
}

/// Decrypted SMTP settings of a campaign.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    /// Implicit TLS. Otherwise STARTTLS is required.
    pub secure: bool,
    pub username: String,
    pub password: String,
    pub from_name: Option<String>,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("from_name", &self.from_name)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendErrorKind {
    Retryable,
    Permanent,
    Rejected,
}

#[derive(Debug, Clone, Error)]
#[error("{detail}")]
pub struct SendError {
    pub kind: SendErrorKind,
    pub detail: String,
}

/// SMTP reply codes meaning the mailbox itself was refused.
const REJECTED_CODES: [u16; 3] = [550, 551, 553];

impl SendError {
    pub fn retryable(detail: impl Into<String>) -> Self {
        Self {
            kind: SendErrorKind::Retryable,
            detail: detail.into(),
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self {
            kind: SendErrorKind::Permanent,
            detail: detail.into(),
        }
    }

    pub fn rejected(detail: impl Into<String>) -> Self {
        Self {
            kind: SendErrorKind::Rejected,
            detail: detail.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == SendErrorKind::Retryable
    }

    /// Classify a transport failure.
    ///
    /// Timeouts and connection-level io errors anywhere in the source chain are
    /// retryable. A recipient refusal code is `Rejected`. Everything else is permanent.
    pub fn classify(
        timed_out: bool,
        code: Option<u16>,
        err: &(dyn StdError + 'static),
    ) -> Self {
        let detail = err.to_string();
        if timed_out || has_network_cause(err) {
            return Self::retryable(detail);
        }
        match code {
            Some(code) if REJECTED_CODES.contains(&code) => Self::rejected(detail),
            _ => Self::permanent(detail),
        }
    }

    pub(crate) fn from_smtp(err: &lettre::transport::smtp::Error) -> Self {
        let code = err.status().and_then(|c| c.to_string().parse().ok());
        Self::classify(err.is_timeout(), code, err)
    }
}

fn has_network_cause(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            ) {
                return true;
            }
        }
        current = e.source();
    }
    false
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Smtp(String),
}

impl From<MailError> for SendError {
    fn from(err: MailError) -> Self {
        SendError::permanent(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("send failed")]
    struct Wrapped(#[source] io::Error);

    #[test]
    fn connection_reset_in_chain_is_retryable() {
        let err = Wrapped(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        assert_eq!(
            SendError::classify(false, None, &err).kind,
            SendErrorKind::Retryable
        );
    }

    #[test]
    fn timeout_flag_is_retryable() {
        let err = io::Error::new(io::ErrorKind::Other, "deadline elapsed");
        assert!(SendError::classify(true, None, &err).is_retryable());
    }

    #[test]
    fn authentication_failure_is_permanent() {
        let err = io::Error::new(io::ErrorKind::Other, "Authentication failed");
        let classified = SendError::classify(false, Some(535), &err);
        assert_eq!(classified.kind, SendErrorKind::Permanent);
        assert_eq!(classified.detail, "Authentication failed");
    }

    #[test]
    fn mailbox_unavailable_is_rejected() {
        let err = io::Error::new(io::ErrorKind::Other, "mailbox unavailable");
        assert_eq!(
            SendError::classify(false, Some(550), &err).kind,
            SendErrorKind::Rejected
        );
    }

    #[test]
    fn smtp_config_debug_hides_password() {
        let config = SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            secure: false,
            username: "me@example.com".into(),
            password: "hunter2".into(),
            from_name: None,
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
