use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use super::{MailMessage, Mailer};

/// Delivers mail through a transactional email HTTP API
/// (`POST {url}` with a bearer token and a JSON body).
#[derive(Clone)]
pub struct HttpMailer {
    http: Client,
    api_url: String,
    api_token: String,
    from: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
    html: &'a str,
}

impl HttpMailer {
    pub fn new(api_url: &str, api_token: &str, from: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpMailer {
            http,
            api_url: api_url.to_string(),
            api_token: api_token.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    fn name(&self) -> &str {
        "HttpMailer"
    }

    async fn send(&self, message: &MailMessage) -> Result<()> {
        let body = SendRequest {
            from: &self.from,
            to: &message.to,
            subject: &message.subject,
            text: &message.text,
            html: &message.html,
        };

        let resp = self
            .http
            .post(&self.api_url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .json(&body)
            .send()
            .await
            .context("Mail API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Mail API error {}: {}", status, body);
        }

        info!("Mail sent to {}: {}", message.to, message.subject);
        Ok(())
    }
}

/// Dry-run backend: logs every message instead of sending it
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    fn name(&self) -> &str {
        "LogMailer"
    }

    async fn send(&self, message: &MailMessage) -> Result<()> {
        info!(
            "🟡 DRY RUN mail to {} – {}\n{}",
            message.to, message.subject, message.text
        );
        Ok(())
    }
}
