//! Outgoing message type and conversion to a lettre [`Message`].

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::{Address, Message};

use super::{MailError, SmtpConfig};

/// A file attached to every message of a campaign.
#[derive(Debug, Clone)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

/// One fully decrypted message, ready for the transport.
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub attachments: Vec<OutgoingAttachment>,
    pub config: SmtpConfig,
}

impl OutgoingEmail {
    /// The sender mailbox: the SMTP username with the optional display name.
    pub fn from_mailbox(&self) -> Result<Mailbox, MailError> {
        let address: Address = self
            .config
            .username
            .parse()
            .map_err(|_| MailError::InvalidAddress(self.config.username.clone()))?;
        let name = self
            .config
            .from_name
            .clone()
            .filter(|name| !name.trim().is_empty());
        Ok(Mailbox::new(name, address))
    }

    /// Build a `multipart/alternative` message, wrapped in `multipart/mixed` when there
    /// are attachments.
    pub fn to_message(&self) -> Result<Message, MailError> {
        let to: Mailbox = self
            .to
            .parse()
            .map_err(|_| MailError::InvalidAddress(self.to.clone()))?;

        let alternative = MultiPart::alternative_plain_html(self.text.clone(), self.html.clone());
        let body = if self.attachments.is_empty() {
            alternative
        } else {
            let mut mixed = MultiPart::mixed().multipart(alternative);
            for attachment in &self.attachments {
                let content_type = ContentType::parse(&attachment.content_type)
                    .or_else(|_| ContentType::parse("application/octet-stream"))
                    .map_err(|e| MailError::Build(e.to_string()))?;
                mixed = mixed.singlepart(
                    Attachment::new(attachment.filename.clone())
                        .body(attachment.content.clone(), content_type),
                );
            }
            mixed
        };

        Message::builder()
            .from(self.from_mailbox()?)
            .to(to)
            .subject(&self.subject)
            .message_id(None)
            .multipart(body)
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

/// Plain-text rendition of an HTML body for the `text/plain` part.
///
/// `<style>`, `<script>` and `<head>` contents are dropped and entities decoded.
pub fn html_to_text(html: &str) -> String {
    nanohtml2text::html2text(html)
        .replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
