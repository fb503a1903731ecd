//! Best-effort personalization: guess the recipient's company from their email domain
//! and substitute it into `{{company}}` placeholders.

use std::time::Duration;

use async_trait::async_trait;

pub const PLACEHOLDER: &str = "{{company}}";

const SPACED_PLACEHOLDER: &str = "{{ company }}";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Mailbox providers whose homepage says nothing about the recipient's employer.
const FREE_MAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.com",
    "hotmail.com",
    "outlook.com",
    "live.com",
    "icloud.com",
    "me.com",
    "aol.com",
    "proton.me",
    "protonmail.com",
    "gmx.com",
    "gmx.de",
    "web.de",
    "mail.com",
];

#[async_trait]
pub trait CompanyLookup: Send + Sync + 'static {
    /// Company name for the domain of `address`, or `None` when it can't be determined.
    async fn company_for(&self, address: &str) -> Option<String>;
}

pub fn contains_placeholder(text: &str) -> bool {
    text.contains(PLACEHOLDER) || text.contains(SPACED_PLACEHOLDER)
}

/// Substitute every placeholder with `company`, or with nothing when it is `None`.
pub fn replace_placeholders(text: &str, company: Option<&str>) -> String {
    let company = company.unwrap_or("");
    text.replace(PLACEHOLDER, company)
        .replace(SPACED_PLACEHOLDER, company)
}

/// Lowercased domain part of an address.
pub fn email_domain(address: &str) -> Option<String> {
    let (_, domain) = address.trim().rsplit_once('@')?;
    let domain = domain.trim_end_matches('>').trim().to_ascii_lowercase();
    (!domain.is_empty() && domain.contains('.')).then_some(domain)
}

/// Looks the company up from the `<title>` of the domain's homepage.
#[derive(Clone)]
pub struct HttpCompanyLookup {
    http_client: reqwest::Client,
}

impl HttpCompanyLookup {
    pub fn new() -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .user_agent(concat!("postbox/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http_client })
    }

    async fn fetch_title(&self, domain: &str) -> Result<Option<String>, reqwest::Error> {
        let body = self
            .http_client
            .get(format!("https://{domain}"))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(extract_title(&body))
    }
}

#[async_trait]
impl CompanyLookup for HttpCompanyLookup {
    async fn company_for(&self, address: &str) -> Option<String> {
        let domain = email_domain(address)?;
        if FREE_MAIL_DOMAINS.contains(&domain.as_str()) {
            return None;
        }

        match self.fetch_title(&domain).await {
            Ok(title) => title,
            Err(e) => {
                tracing::debug!(%domain, error = %e, "company lookup failed");
                None
            }
        }
    }
}

/// First segment of the page title, e.g. `"Acme | Home"` gives `"Acme"`.
fn extract_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title")?;

    let title = html[start..end].trim();
    let name = title
        .split(['|', '\u{2013}', '\u{2014}', ':', '\u{b7}'])
        .next()
        .unwrap_or(title)
        .split(" - ")
        .next()
        .unwrap_or(title)
        .trim()
        .replace("&amp;", "&");

    (!name.is_empty()).then_some(name)
}
