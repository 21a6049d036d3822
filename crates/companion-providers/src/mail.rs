//! Outbound mail delivery for verification codes.

use async_trait::async_trait;
use companion_types::OtpAction;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail delivery failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

/// Mail delivery seam.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_otp(&self, email: &str, code: &str, action: OtpAction) -> Result<(), MailError>;
    async fn send_welcome(&self, email: &str) -> Result<(), MailError>;
}

#[derive(Debug, Clone)]
pub struct MailerConfig {
    /// Endpoint of the transactional mail API.
    pub base_url: String,
    pub api_key: String,
    pub from_address: String,
    pub request_timeout_secs: u64,
}

impl Default for MailerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            from_address: String::new(),
            request_timeout_secs: 15,
        }
    }
}

#[derive(Debug, Serialize)]
struct OutboundMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    text: &'a str,
}

/// Delivers mail through a transactional HTTP mail API.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    config: MailerConfig,
    client: reqwest::Client,
}

impl HttpMailer {
    pub fn new(config: MailerConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    async fn deliver(&self, to: &str, subject: &str, text: &str) -> Result<(), MailError> {
        let body = OutboundMail {
            from: &self.config.from_address,
            to,
            subject,
            text,
        };
        self.client
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_otp(&self, email: &str, code: &str, action: OtpAction) -> Result<(), MailError> {
        let subject = match action {
            OtpAction::Register => "Confirm your account",
            OtpAction::Login => "Your sign-in code",
        };
        let text = format!(
            "Your verification code is {code}. It expires in 10 minutes.\n\n\
             If you did not request this code, you can ignore this message."
        );
        self.deliver(email, subject, &text).await
    }

    async fn send_welcome(&self, email: &str) -> Result<(), MailError> {
        self.deliver(
            email,
            "Welcome aboard",
            "Your account is now active. Enjoy your conversations!",
        )
        .await
    }
}

/// Development mailer that logs codes instead of sending anything.
#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_otp(&self, email: &str, code: &str, action: OtpAction) -> Result<(), MailError> {
        tracing::info!(%email, %code, action = action.as_str(), "otp delivery (log only)");
        Ok(())
    }

    async fn send_welcome(&self, email: &str) -> Result<(), MailError> {
        tracing::info!(%email, "welcome mail (log only)");
        Ok(())
    }
}
