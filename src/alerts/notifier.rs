//! Notification handlers for alerts

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::config::{ChannelKind, NotificationChannel};

/// Hosts whose webhooks expect the Lark/Feishu text message shape
const LARK_HOST_SUFFIXES: &[&str] = &["feishu.cn", "larksuite.com"];

/// Port on which SMTP uses implicit TLS instead of STARTTLS
const SMTPS_PORT: u16 = 465;

const EMAIL_SUBJECT_PREFIX: &str = "[LogScout Alert]";

pub const TEST_TITLE: &str = "Test Notification";
pub const TEST_BODY: &str = "This is a test notification from LogScout.";

/// Delivers alert text to a notification channel
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, channel: &NotificationChannel, title: &str, body: &str) -> Result<(), NotifyError>;

    /// Send the fixed test message.
    async fn send_test(&self, channel: &NotificationChannel) -> Result<(), NotifyError> {
        self.send(channel, TEST_TITLE, TEST_BODY).await
    }
}

/// Webhook channel settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    /// Extra request headers
    pub headers: HashMap<String, String>,
}

/// SMTP channel settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    #[serde(alias = "smtpHost")]
    pub smtp_host: String,
    /// Accepts `"587"` or `587`
    #[serde(alias = "smtpPort", deserialize_with = "string_or_number")]
    pub smtp_port: String,
    pub username: String,
    pub password: String,
    /// Comma-separated recipients
    pub to: String,
    /// Sender address; defaults to `username`
    pub from: Option<String>,
    /// Accept invalid server certificates
    #[serde(alias = "skipVerify")]
    pub skip_verify: bool,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!("expected port, got {}", other))),
    }
}

impl EmailConfig {
    fn port(&self) -> Result<u16, NotifyError> {
        self.smtp_port
            .trim()
            .parse()
            .map_err(|_| NotifyError::Config(format!("invalid smtp_port {:?}", self.smtp_port)))
    }

    fn recipients(&self) -> Vec<&str> {
        self.to
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .collect()
    }
}

fn decode_config<T: serde::de::DeserializeOwned>(config: &Value) -> Result<T, NotifyError> {
    let doc = if config.is_null() {
        Value::Object(Default::default())
    } else {
        config.clone()
    };
    serde_json::from_value(doc).map_err(|e| NotifyError::Config(format!("invalid channel config: {}", e)))
}

/// Whether `url` points at a Lark/Feishu bot
pub fn is_lark_url(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .map(|host| LARK_HOST_SUFFIXES.iter().any(|suffix| host.ends_with(suffix)))
        .unwrap_or(false)
}

/// JSON body for a webhook POST
pub fn webhook_payload(url: &str, title: &str, body: &str, at: DateTime<Utc>) -> Value {
    let time = at.to_rfc3339_opts(SecondsFormat::Secs, true);
    if is_lark_url(url) {
        serde_json::json!({
            "msg_type": "text",
            "content": {
                "text": format!("{}\n\n{}\nTime: {}", title, body, time),
            }
        })
    } else {
        serde_json::json!({
            "title": title,
            "content": body,
            "time": time,
        })
    }
}

/// Notifier for sending alert notifications
pub struct Notifier {
    client: reqwest::Client,
    smtp_timeout: Duration,
}

impl Notifier {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Bound webhook and SMTP calls by `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default webhook client");
                reqwest::Client::new()
            });
        Self {
            client,
            smtp_timeout: timeout,
        }
    }

    async fn send_webhook(&self, config: &WebhookConfig, title: &str, body: &str) -> Result<(), NotifyError> {
        if config.url.trim().is_empty() {
            return Err(NotifyError::Config("webhook url is empty".to_string()));
        }

        let payload = webhook_payload(&config.url, title, body, Utc::now());
        let mut request = self.client.post(&config.url).json(&payload);
        for (key, value) in &config.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Webhook(format!("Failed to send webhook: {}", e)))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(NotifyError::Webhook(format!("Webhook returned status {}", status)));
        }

        tracing::debug!(url = %config.url, "Webhook notification sent");
        Ok(())
    }

    async fn send_email(&self, config: &EmailConfig, title: &str, body: &str) -> Result<(), NotifyError> {
        let message = build_email(config, title, body)?;
        let transport = self.smtp_transport(config)?;

        transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Email(format!("SMTP delivery failed: {}", e)))?;

        tracing::debug!(host = %config.smtp_host, recipients = %config.to, "Email notification sent");
        Ok(())
    }

    fn smtp_transport(&self, config: &EmailConfig) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
        let port = config.port()?;
        let host = config.smtp_host.trim();

        let tls_parameters = TlsParameters::builder(host.to_string())
            .dangerous_accept_invalid_certs(config.skip_verify)
            .build()
            .map_err(|e| NotifyError::Email(format!("TLS setup failed: {}", e)))?;

        let tls = if port == SMTPS_PORT {
            Tls::Wrapper(tls_parameters)
        } else {
            Tls::Opportunistic(tls_parameters)
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .tls(tls)
            .timeout(Some(self.smtp_timeout));

        if !config.username.is_empty() {
            builder = builder
                .credentials(Credentials::new(config.username.clone(), config.password.clone()))
                .authentication(vec![Mechanism::Login, Mechanism::Plain]);
        }

        Ok(builder.build())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Dispatcher for Notifier {
    async fn send(&self, channel: &NotificationChannel, title: &str, body: &str) -> Result<(), NotifyError> {
        match channel.kind {
            ChannelKind::Webhook => {
                let config: WebhookConfig = decode_config(&channel.config)?;
                self.send_webhook(&config, title, body).await
            }
            ChannelKind::Email => {
                let config: EmailConfig = decode_config(&channel.config)?;
                self.send_email(&config, title, body).await
            }
        }
    }
}

/// Plain-text alert email addressed to every configured recipient
pub fn build_email(config: &EmailConfig, title: &str, body: &str) -> Result<Message, NotifyError> {
    let recipients = config.recipients();
    if config.smtp_host.trim().is_empty() || config.smtp_port.trim().is_empty() || recipients.is_empty() {
        return Err(NotifyError::Config("incomplete email config".to_string()));
    }

    let from = config.from.as_deref().unwrap_or(&config.username);
    let from: Mailbox = from
        .trim()
        .parse()
        .map_err(|e| NotifyError::Config(format!("invalid sender {:?}: {}", from, e)))?;

    let mut builder = Message::builder()
        .from(from)
        .subject(format!("{} {}", EMAIL_SUBJECT_PREFIX, title))
        .header(ContentType::TEXT_PLAIN);

    for recipient in recipients {
        let mailbox: Mailbox = recipient
            .parse()
            .map_err(|e| NotifyError::Config(format!("invalid recipient {:?}: {}", recipient, e)))?;
        builder = builder.to(mailbox);
    }

    builder
        .body(body.to_string())
        .map_err(|e| NotifyError::Email(format!("Failed to build message: {}", e)))
}

/// Notifier errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Channel config error: {0}")]
    Config(String),

    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Email error: {0}")]
    Email(String),
}
