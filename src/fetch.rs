//! Mail content fetch — retrieves full message content for a webhook event.
//!
//! The webhook only carries an external message id; the body, sender and
//! headers come from the mail provider's API. The pipeline depends on the
//! [`MailFetcher`] trait so tests can inject canned content.

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::error::FetchError;

const DEFAULT_BASE_URL: &str = "https://api.resend.com";

/// Full content of one inbound email, as returned by the mail provider.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchedEmail {
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub from: String,
    /// Providers send `to` as a string, a list of strings, or a list of
    /// `{email, name}` objects depending on the message.
    #[serde(default, deserialize_with = "deserialize_addresses")]
    pub to: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl FetchedEmail {
    /// First recipient address, if any.
    pub fn first_to(&self) -> Option<&str> {
        self.to.first().map(String::as_str)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressField {
    One(AddressValue),
    Many(Vec<AddressValue>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AddressValue {
    Plain(String),
    Object { email: String },
}

impl AddressValue {
    fn into_email(self) -> String {
        match self {
            Self::Plain(s) => s,
            Self::Object { email } => email,
        }
    }
}

fn deserialize_addresses<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let field = Option::<AddressField>::deserialize(deserializer)?;
    Ok(match field {
        None => Vec::new(),
        Some(AddressField::One(v)) => vec![v.into_email()],
        Some(AddressField::Many(vs)) => vs.into_iter().map(AddressValue::into_email).collect(),
    })
}

/// Port for fetching inbound mail content by external id.
#[async_trait]
pub trait MailFetcher: Send + Sync {
    async fn fetch(&self, email_id: &str) -> Result<FetchedEmail, FetchError>;
}

/// Resend inbound-email fetcher.
pub struct ResendFetcher {
    api_key: SecretString,
    base_url: String,
    client: reqwest::Client,
}

impl ResendFetcher {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Custom base URL, for proxies and tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl MailFetcher for ResendFetcher {
    async fn fetch(&self, email_id: &str) -> Result<FetchedEmail, FetchError> {
        let url = format!("{}/emails/receiving/{}", self.base_url, email_id);

        let resp = self
            .client
            .get(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        resp.json::<FetchedEmail>()
            .await
            .map_err(|e| FetchError::Malformed(e.to_string()))
    }
}
