// SMTP email transport, using lettre

use crate::core::{ChannelConfig, ChannelType, Message, SendResult, Settings, TestResult};
use crate::error::{DispatchError, Result};
use crate::formatting::{render_template, Escape, HtmlFormatter, PlainTextFormatter, TextFormatter};
use crate::plugin::{Capability, TransportPlugin};
use crate::schema::{settings, validate_by_schema};
use crate::transports::http::request_timeout;
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message as Email, Tokio1Executor};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const DEFAULT_SUBJECT_PREFIX: &str = "[AlertRelay]";

type Mailer = AsyncSmtpTransport<Tokio1Executor>;

/// Connection security for the SMTP session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    None,
    StartTls,
    /// Implicit TLS (SMTPS).
    Tls,
}

impl Encryption {
    fn from_settings(settings: &Settings) -> Self {
        match settings::str(settings, "encryption") {
            Some("none") => Encryption::None,
            Some("tls") => Encryption::Tls,
            _ => Encryption::StartTls,
        }
    }

    fn default_port(self) -> u16 {
        match self {
            Encryption::None => 25,
            Encryption::StartTls => 587,
            Encryption::Tls => 465,
        }
    }
}

fn mailbox(field: &str, raw: &str) -> Result<Mailbox> {
    raw.parse::<Mailbox>()
        .map_err(|e| DispatchError::config(field, format!("invalid address '{}': {}", raw, e)))
}

fn classify(err: lettre::transport::smtp::Error) -> DispatchError {
    // 530/534/535 are the SMTP AUTH rejections.
    let auth_rejected = err
        .status()
        .map(|code| code.to_string())
        .is_some_and(|code| matches!(code.as_str(), "530" | "534" | "535"));
    if auth_rejected {
        DispatchError::Authentication(err.to_string())
    } else {
        DispatchError::transport(err)
    }
}

/// Email subject: `<prefix> [PRIORITY] <title>`.
pub fn subject(settings: &Settings, message: &Message) -> String {
    format!(
        "{} [{}] {}",
        settings::str(settings, "subject_prefix").unwrap_or(DEFAULT_SUBJECT_PREFIX),
        message.priority.as_str().to_uppercase(),
        message.title
    )
}

/// Renders the HTML part, or `None` when the message should go out as plain
/// text only.
pub fn html_body(settings: &Settings, message: &Message) -> Option<String> {
    if !settings::bool(settings, "html").unwrap_or(false) {
        return None;
    }
    match settings::str(settings, "html_template") {
        Some(template) => match render_template(template, message, Escape::Html) {
            Ok(html) => Some(html),
            Err(e) => {
                warn!(error = %e, "HTML template failed, sending plain text");
                None
            }
        },
        None => Some(HtmlFormatter.format(message)),
    }
}

/// Builds the MIME message: multipart/alternative when HTML is enabled and
/// renders, plain text otherwise.
pub fn build_email(settings: &Settings, message: &Message) -> Result<Email> {
    let from = mailbox("from", settings::str(settings, "from").unwrap_or_default())?;
    let mut builder = Email::builder().from(from).subject(subject(settings, message));
    for (i, to) in settings::strings(settings, "to").iter().enumerate() {
        builder = builder.to(mailbox(&format!("to[{}]", i), to)?);
    }

    let text = PlainTextFormatter.format(message);
    let built = match html_body(settings, message) {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(text, html)),
        None => builder.body(text),
    };
    built.map_err(|e| DispatchError::config("to", e))
}

fn smtp_transport(settings: &Settings, timeout: Duration) -> Result<Mailer> {
    let host = settings::str(settings, "smtp_host").unwrap_or_default();
    let encryption = Encryption::from_settings(settings);
    let mut builder = match encryption {
        Encryption::None => Mailer::builder_dangerous(host),
        Encryption::StartTls => {
            Mailer::starttls_relay(host).map_err(|e| DispatchError::config("smtp_host", e))?
        }
        Encryption::Tls => Mailer::relay(host).map_err(|e| DispatchError::config("smtp_host", e))?,
    };

    let port = settings::u64(settings, "smtp_port")
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or_else(|| encryption.default_port());
    builder = builder.port(port).timeout(Some(timeout));

    if let (Some(username), Some(password)) = (
        settings::str(settings, "username"),
        settings::str(settings, "password"),
    ) {
        builder = builder.credentials(Credentials::new(username.to_string(), password.to_string()));
    }
    Ok(builder.build())
}

/// Races an SMTP exchange against `cancel`. On cancellation the exchange is
/// dropped, which closes its connection before the message is committed.
async fn until_cancelled<T>(cancel: &CancellationToken, exchange: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DispatchError::Cancelled),
        result = exchange => result,
    }
}

/// Email alert transport. Failures are reported, never retried here.
pub struct EmailPlugin {
    started: AtomicBool,
}

impl Default for EmailPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl EmailPlugin {
    pub fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
        }
    }

    async fn connection_test(&self, config: &ChannelConfig, cancel: &CancellationToken) -> Result<()> {
        self.validate_config(&config.settings)?;
        let transport = smtp_transport(&config.settings, request_timeout(config))?;
        until_cancelled(cancel, async {
            match transport.test_connection().await {
                Ok(true) => Ok(()),
                Ok(false) => Err(DispatchError::transport("SMTP server did not accept NOOP")),
                Err(e) => Err(classify(e)),
            }
        })
        .await
    }
}

#[async_trait]
impl TransportPlugin for EmailPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn name(&self) -> &str {
        "Email"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> &str {
        "SMTP email with plain text or HTML bodies"
    }

    fn config_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "smtp_host": { "type": "string", "minLength": 1 },
                "smtp_port": { "type": "integer", "minimum": 1, "maximum": 65535 },
                "username": { "type": "string" },
                "password": { "type": "string" },
                "from": { "type": "string", "minLength": 3 },
                "to": { "type": "array", "items": { "type": "string", "minLength": 3 } },
                "encryption": { "type": "string", "enum": ["none", "starttls", "tls"], "default": "starttls" },
                "html": { "type": "boolean", "default": false },
                "subject_prefix": { "type": "string", "maxLength": 64 },
                "html_template": { "type": "string" },
                "timeout": { "type": "integer", "minimum": 1, "maximum": 300, "default": 30 }
            },
            "required": ["smtp_host", "from", "to"]
        })
    }

    async fn initialize(&self, _options: &Settings) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self, config: &ChannelConfig) -> Result<()> {
        self.connection_test(config, &CancellationToken::new()).await
    }

    fn validate_config(&self, settings: &Settings) -> Result<()> {
        validate_by_schema(settings, &self.config_schema())?;

        mailbox("from", settings::str(settings, "from").unwrap_or_default())?;
        let recipients = settings::strings(settings, "to");
        if recipients.is_empty() {
            return Err(DispatchError::config("to", "at least one recipient is required"));
        }
        for (i, to) in recipients.iter().enumerate() {
            mailbox(&format!("to[{}]", i), to)?;
        }

        match (
            settings::str(settings, "username"),
            settings::str(settings, "password"),
        ) {
            (Some(_), None) => Err(DispatchError::config("password", "required when username is set")),
            (None, Some(_)) => Err(DispatchError::config("username", "required when password is set")),
            _ => Ok(()),
        }
    }

    #[instrument(skip_all, fields(message_id = %message.id))]
    async fn send_message(
        &self,
        config: &ChannelConfig,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<SendResult> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(DispatchError::lifecycle("email", "send", "plugin is not started"));
        }
        self.validate_config(&config.settings)?;
        if cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        let email = build_email(&config.settings, message)?;
        let transport = smtp_transport(&config.settings, request_timeout(config))?;
        let recipients = settings::strings(&config.settings, "to").len();

        let started = Instant::now();
        let sent = until_cancelled(cancel, async { transport.send(email).await.map_err(classify) }).await;
        let latency = started.elapsed();

        match sent {
            Ok(response) => {
                info!(recipients, "Email accepted by SMTP server");
                Ok(SendResult::delivered()
                    .with_message_id(message.id.clone())
                    .with_latency(latency)
                    .with_metadata("smtp_code", response.code().to_string())
                    .with_metadata("recipients", recipients))
            }
            Err(DispatchError::Cancelled) => Err(DispatchError::Cancelled),
            Err(e) => {
                warn!(error = %e, "Failed to send email");
                Ok(SendResult::failed(e.to_string()).with_latency(latency))
            }
        }
    }

    async fn test_connection(&self, config: &ChannelConfig, cancel: &CancellationToken) -> Result<TestResult> {
        let started = Instant::now();
        match self.connection_test(config, cancel).await {
            Ok(()) => Ok(TestResult::passed("SMTP server accepted the connection", started.elapsed())),
            Err(DispatchError::Cancelled) => Err(DispatchError::Cancelled),
            Err(e @ DispatchError::Config { .. }) => Err(e),
            Err(e) => Ok(TestResult::failed(e.to_string(), started.elapsed())
                .with_detail("smtp_host", settings::str(&config.settings, "smtp_host").unwrap_or_default())),
        }
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::TextMessage,
            Capability::HtmlMessage,
            Capability::Templates,
            Capability::HealthCheck,
        ]
    }
}
