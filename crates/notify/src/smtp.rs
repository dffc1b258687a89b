use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::channel::{ChannelSender, RenderedMessage};
use crate::error::NotifyError;

/// SMTP connection settings for the email channel.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    pub host: String,
    /// Defaults to 587 (submission with STARTTLS).
    pub port: u16,
    /// Implicit TLS from the first byte (usually port 465).
    pub secure: bool,
    /// Upgrade a plain connection with STARTTLS. Ignored when `secure`.
    pub starttls: bool,
    #[serde(alias = "user")]
    pub username: Option<String>,
    #[serde(alias = "pass")]
    pub password: Option<String>,
    /// `From` address on outgoing alerts.
    pub from: String,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("starttls", &self.starttls)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("from", &self.from)
            .finish()
    }
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 587,
            secure: false,
            starttls: true,
            username: None,
            password: None,
            from: "noreply@courier.local".to_owned(),
        }
    }
}

impl SmtpSettings {
    pub fn new(host: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            from: from.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Plain connection without TLS, for local relays and tests.
    #[must_use]
    pub fn insecure(mut self) -> Self {
        self.secure = false;
        self.starttls = false;
        self
    }
}

/// Email [`ChannelSender`] backed by an SMTP relay.
pub struct SmtpEmailSender {
    settings: SmtpSettings,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for SmtpEmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpEmailSender")
            .field("settings", &self.settings)
            .field("transport", &"<AsyncSmtpTransport>")
            .finish()
    }
}

impl SmtpEmailSender {
    pub fn new(settings: SmtpSettings) -> Result<Self, NotifyError> {
        let transport = build_transport(&settings)?;
        Ok(Self { settings, transport })
    }

    pub fn settings(&self) -> &SmtpSettings {
        &self.settings
    }

    /// Send one message to every recipient, surfacing the SMTP error.
    #[instrument(skip_all, fields(recipients = recipients.len()))]
    pub async fn deliver(
        &self,
        recipients: &[String],
        message: &RenderedMessage,
    ) -> Result<(), NotifyError> {
        let email = build_message(&self.settings.from, recipients, message)?;
        debug!(host = %self.settings.host, "sending alert email");
        self.transport.send(email).await.map_err(|e| {
            error!(error = %e, "SMTP send failed");
            map_smtp_error(&e)
        })?;
        info!("alert email sent");
        Ok(())
    }
}

#[async_trait]
impl ChannelSender for SmtpEmailSender {
    async fn send(&self, recipients: &[String], message: &RenderedMessage) -> bool {
        self.deliver(recipients, message).await.is_ok()
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address
        .parse()
        .map_err(|e| NotifyError::Address(format!("{address}: {e}")))
}

fn build_message(
    from: &str,
    recipients: &[String],
    message: &RenderedMessage,
) -> Result<Message, NotifyError> {
    if recipients.is_empty() {
        return Err(NotifyError::Address("no recipients".to_owned()));
    }

    let mut builder = Message::builder()
        .from(parse_mailbox(from)?)
        .subject(message.subject.as_deref().unwrap_or_default());
    for recipient in recipients {
        builder = builder.to(parse_mailbox(recipient)?);
    }

    let content_type = if message.is_html() {
        ContentType::TEXT_HTML
    } else {
        ContentType::TEXT_PLAIN
    };
    builder
        .singlepart(
            SinglePart::builder()
                .header(content_type)
                .body(message.body.clone()),
        )
        .map_err(|e| NotifyError::Smtp(format!("failed to build email: {e}")))
}

fn build_transport(
    settings: &SmtpSettings,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, NotifyError> {
    let builder = if settings.secure {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
            .map_err(|e| NotifyError::Configuration(format!("SMTP TLS relay error: {e}")))?
    } else if settings.starttls {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| NotifyError::Configuration(format!("SMTP STARTTLS relay error: {e}")))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
    };

    let builder = builder.port(settings.port);
    let builder = if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
        builder.credentials(Credentials::new(user.clone(), pass.clone()))
    } else {
        builder
    };

    Ok(builder.build())
}

fn map_smtp_error(error: &lettre::transport::smtp::Error) -> NotifyError {
    let message = error.to_string();
    if error.is_permanent() {
        NotifyError::Smtp(format!("permanent failure: {message}"))
    } else {
        NotifyError::SmtpTransient(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipients() -> Vec<String> {
        vec!["ops@example.com".to_owned(), "dev@example.com".to_owned()]
    }

    #[test]
    fn builds_plain_text_message() {
        let message = RenderedMessage::new("orders failed").with_subject("[courier] orders failed");
        let email = build_message("alerts@example.com", &recipients(), &message).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject: [courier] orders failed"));
        assert!(raw.contains("ops@example.com"));
        assert!(raw.contains("dev@example.com"));
        assert!(raw.contains("text/plain"));
    }

    #[test]
    fn markup_bodies_are_sent_as_html() {
        let message = RenderedMessage::new("<p>failed</p>");
        let email = build_message("alerts@example.com", &recipients(), &message).unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("text/html"));
    }

    #[test]
    fn bad_addresses_are_rejected() {
        let message = RenderedMessage::new("x");
        let err = build_message("not-valid", &recipients(), &message).unwrap_err();
        assert!(matches!(err, NotifyError::Address(_)));

        let err = build_message("alerts@example.com", &["nope".to_owned()], &message).unwrap_err();
        assert!(matches!(err, NotifyError::Address(_)));

        let err = build_message("alerts@example.com", &[], &message).unwrap_err();
        assert!(matches!(err, NotifyError::Address(_)));
    }

    #[tokio::test]
    async fn transport_builds_for_each_tls_mode() {
        let plain = SmtpSettings::new("localhost", "a@example.com").insecure().with_port(2525);
        assert!(SmtpEmailSender::new(plain).is_ok());

        let starttls = SmtpSettings::new("smtp.example.com", "a@example.com")
            .with_credentials("user", "pass");
        assert!(SmtpEmailSender::new(starttls).is_ok());

        let implicit = SmtpSettings::new("smtp.example.com", "a@example.com")
            .with_secure(true)
            .with_port(465);
        assert!(SmtpEmailSender::new(implicit).is_ok());
    }

    #[test]
    fn debug_redacts_password() {
        let settings = SmtpSettings::default().with_credentials("user", "hunter2");
        let debug = format!("{settings:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }
}
