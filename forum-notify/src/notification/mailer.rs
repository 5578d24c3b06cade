//! Email delivery over SMTP.
//!
//! A [`Mailer`] makes exactly one delivery attempt per call. Retry policy, if
//! any, belongs to the caller.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{env_flag, env_parse, env_string};
use crate::{Error, Result};

/// A single outgoing email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub subject: String,
    pub recipients: Vec<String>,
    pub text_body: String,
    pub html_body: Option<String>,
    /// Explicit sender. `None` falls back to the configured default sender.
    pub sender: Option<String>,
}

impl EmailMessage {
    pub fn new(
        subject: impl Into<String>,
        recipients: Vec<String>,
        text_body: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            recipients,
            text_body: text_body.into(),
            html_body: None,
            sender: None,
        }
    }

    pub fn with_html(mut self, html_body: impl Into<String>) -> Self {
        self.html_body = Some(html_body.into());
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }
}

/// Trait for email delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Deliver the message. One attempt; failures come back as errors.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// SMTP connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub server: String,
    /// SMTP server port.
    pub port: u16,
    /// SMTP username.
    pub username: Option<String>,
    /// SMTP password.
    pub password: Option<String>,
    /// Upgrade the connection with STARTTLS.
    pub use_tls: bool,
    /// Connect with implicit TLS (SMTPS). Takes precedence over `use_tls`.
    #[serde(default)]
    pub use_ssl: bool,
    /// Sender used when a message does not name one, e.g. `Forum <noreply@example.com>`.
    pub default_sender: String,
    /// Always send from `default_sender`, ignoring explicit senders.
    #[serde(default)]
    pub force_default_sender: bool,
    /// Per-connection timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: 25,
            username: None,
            password: None,
            use_tls: false,
            use_ssl: false,
            default_sender: String::new(),
            force_default_sender: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SmtpConfig {
    /// Load SMTP settings from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `MAIL_SERVER`, `MAIL_PORT`
    /// - `MAIL_USERNAME`, `MAIL_PASSWORD`
    /// - `MAIL_USE_TLS` (STARTTLS), `MAIL_USE_SSL` (implicit TLS)
    /// - `MAIL_DEFAULT_SENDER`
    /// - `MAIL_FORCE_DEFAULT_SENDER`
    /// - `MAIL_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server: env_string("MAIL_SERVER").unwrap_or(defaults.server),
            port: env_parse("MAIL_PORT").unwrap_or(defaults.port),
            username: env_string("MAIL_USERNAME"),
            password: env_string("MAIL_PASSWORD"),
            use_tls: env_flag("MAIL_USE_TLS").unwrap_or(defaults.use_tls),
            use_ssl: env_flag("MAIL_USE_SSL").unwrap_or(defaults.use_ssl),
            default_sender: env_string("MAIL_DEFAULT_SENDER").unwrap_or_default(),
            force_default_sender: env_flag("MAIL_FORCE_DEFAULT_SENDER")
                .unwrap_or(defaults.force_default_sender),
            timeout_secs: env_parse("MAIL_TIMEOUT_SECS").unwrap_or(defaults.timeout_secs),
        }
    }

    /// How the SMTP connection is secured.
    pub fn security(&self) -> SmtpSecurity {
        if self.use_ssl {
            SmtpSecurity::Tls
        } else if self.use_tls {
            SmtpSecurity::StartTls
        } else {
            SmtpSecurity::Plain
        }
    }
}

/// Transport security of the SMTP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// Unencrypted connection.
    Plain,
    /// Plain connection upgraded with STARTTLS.
    StartTls,
    /// TLS from the first byte.
    Tls,
}

/// Mailer backed by an async SMTP transport.
pub struct SmtpMailer {
    config: SmtpConfig,
    default_sender: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Create a new SMTP mailer. Nothing is sent until the first `send`.
    pub fn new(config: SmtpConfig) -> Result<Self> {
        if config.default_sender.trim().is_empty() {
            return Err(Error::config("default sender is not configured"));
        }
        let default_sender: Mailbox = config.default_sender.parse()?;

        let mut builder = match config.security() {
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.server)?,
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)?
            }
            SmtpSecurity::Plain => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.server.as_str())
            }
        };
        debug!(
            server = %config.server,
            port = config.port,
            security = ?config.security(),
            "SMTP transport configured"
        );
        builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            default_sender,
            transport: builder.build(),
            config,
        })
    }

    /// Pick the sender for a message.
    ///
    /// An explicit sender wins unless `force_default_sender` is set.
    fn resolve_sender(&self, explicit: Option<&str>) -> Result<Mailbox> {
        match explicit {
            Some(sender) if !self.config.force_default_sender => Ok(sender.parse()?),
            Some(sender) => {
                debug!(sender, "Ignoring explicit sender, default sender is forced");
                Ok(self.default_sender.clone())
            }
            None => Ok(self.default_sender.clone()),
        }
    }

    /// Build the wire message: plain text, or text+HTML alternative.
    fn build_message(&self, message: &EmailMessage) -> Result<Message> {
        if message.recipients.is_empty() {
            return Err(Error::Other("email has no recipients".to_string()));
        }

        let mut builder = Message::builder()
            .from(self.resolve_sender(message.sender.as_deref())?)
            .subject(message.subject.clone());
        for recipient in &message.recipients {
            builder = builder.to(recipient.parse::<Mailbox>()?);
        }

        let email = match &message.html_body {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                message.text_body.clone(),
                html.clone(),
            ))?,
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(message.text_body.clone())?,
        };
        Ok(email)
    }

    /// Send a test email to check the configuration.
    pub async fn test(&self, to: &str) -> Result<()> {
        let message = EmailMessage::new(
            "forum-notify test email",
            vec![to.to_string()],
            "This is a test email sent by forum-notify.",
        );
        self.send(&message).await
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let email = self.build_message(message)?;
        self.transport.send(email).await?;
        debug!(
            subject = %message.subject,
            recipients = message.recipients.len(),
            "Email sent"
        );
        Ok(())
    }
}

/// Mailer that only logs messages. Used for dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            subject = %message.subject,
            recipients = ?message.recipients,
            "Dry run, not sending email:\n{}",
            message.text_body
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SmtpConfig {
        SmtpConfig {
            default_sender: "Forum <noreply@forum.example>".to_string(),
            ..Default::default()
        }
    }

    fn rendered(message: &Message) -> String {
        String::from_utf8_lossy(&message.formatted()).into_owned()
    }

    #[test]
    fn test_smtp_config_default() {
        let config = SmtpConfig::default();
        assert_eq!(config.server, "localhost");
        assert_eq!(config.port, 25);
        assert!(!config.use_tls);
        assert!(!config.use_ssl);
        assert_eq!(config.security(), SmtpSecurity::Plain);
        assert!(!config.force_default_sender);
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_tls_flags_select_security() {
        let starttls = SmtpConfig {
            use_tls: true,
            ..config()
        };
        assert_eq!(starttls.security(), SmtpSecurity::StartTls);

        let smtps = SmtpConfig {
            use_ssl: true,
            ..config()
        };
        assert_eq!(smtps.security(), SmtpSecurity::Tls);

        let both = SmtpConfig {
            use_tls: true,
            use_ssl: true,
            ..config()
        };
        assert_eq!(both.security(), SmtpSecurity::Tls);
    }

    #[tokio::test]
    async fn test_secured_transports_build() {
        for (use_tls, use_ssl) in [(true, false), (false, true)] {
            let mailer = SmtpMailer::new(SmtpConfig {
                server: "smtp.forum.example".to_string(),
                port: 587,
                use_tls,
                use_ssl,
                ..config()
            });
            assert!(mailer.is_ok());
        }
    }

    #[tokio::test]
    async fn test_missing_default_sender_is_rejected() {
        let result = SmtpMailer::new(SmtpConfig::default());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_explicit_sender_overrides_default() {
        let mailer = SmtpMailer::new(config()).unwrap();

        let sender = mailer.resolve_sender(Some("admin@forum.example")).unwrap();
        assert_eq!(sender.email.to_string(), "admin@forum.example");

        let sender = mailer.resolve_sender(None).unwrap();
        assert_eq!(sender.email.to_string(), "noreply@forum.example");
    }

    #[tokio::test]
    async fn test_forced_default_sender_ignores_explicit_sender() {
        let mailer = SmtpMailer::new(SmtpConfig {
            force_default_sender: true,
            ..config()
        })
        .unwrap();

        let sender = mailer.resolve_sender(Some("admin@forum.example")).unwrap();
        assert_eq!(sender.email.to_string(), "noreply@forum.example");
    }

    #[tokio::test]
    async fn test_build_plain_text_message() {
        let mailer = SmtpMailer::new(config()).unwrap();
        let message = EmailMessage::new(
            "New messages",
            vec!["a@x.com".to_string()],
            "Hello a",
        );

        let raw = rendered(&mailer.build_message(&message).unwrap());
        assert!(raw.contains("Subject: New messages"));
        assert!(raw.contains("To: a@x.com"));
        assert!(raw.contains("text/plain"));
        assert!(!raw.contains("multipart/alternative"));
    }

    #[tokio::test]
    async fn test_build_message_with_html_is_multipart() {
        let mailer = SmtpMailer::new(config()).unwrap();
        let message = EmailMessage::new("Digest", vec!["a@x.com".to_string()], "plain")
            .with_html("<p>html</p>");

        let raw = rendered(&mailer.build_message(&message).unwrap());
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("text/html"));
    }

    #[tokio::test]
    async fn test_build_message_rejects_bad_input() {
        let mailer = SmtpMailer::new(config()).unwrap();

        let no_recipients = EmailMessage::new("Digest", Vec::new(), "body");
        assert!(mailer.build_message(&no_recipients).is_err());

        let bad_recipient = EmailMessage::new("Digest", vec!["not-an-address".to_string()], "body");
        assert!(matches!(
            mailer.build_message(&bad_recipient),
            Err(Error::MailAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_log_mailer_always_succeeds() {
        let message = EmailMessage::new("Digest", vec!["a@x.com".to_string()], "body");
        assert!(LogMailer.send(&message).await.is_ok());
    }
}
