use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use crate::config::EmailConfig;
use crate::message::{Message, Status};
use crate::report::{Channel, ChannelError};

const DEFAULT_SMTP_PORT: u16 = 25;

/// Sends reports as plain-text e-mail over SMTP with STARTTLS.
///
/// Subject is the message summary, body the long-form text. CRITICAL
/// reports go to `to_addr_critical` when one is configured.
pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Address the message is sent to.
    pub fn recipient(&self, message: &Message) -> &str {
        match self.config.to_addr_critical.as_deref() {
            Some(critical) if message.status() == Status::Critical && !critical.is_empty() => {
                critical
            }
            _ => &self.config.to_addr,
        }
    }

    /// Assemble the MIME message without sending it.
    pub fn build_email(&self, message: &Message) -> Result<lettre::Message, ChannelError> {
        let from = parse_mailbox(&self.config.from_addr)?;
        let to = parse_mailbox(self.recipient(message))?;
        lettre::Message::builder()
            .from(from)
            .to(to)
            .subject(message.message())
            .date_now()
            .header(ContentType::TEXT_PLAIN)
            .body(message.body())
            .map_err(|e| ChannelError::Build(e.to_string()))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, ChannelError> {
        let (host, port) = split_server(&self.config.smtp_server)?;
        let credentials = Credentials::new(
            self.config.smtp_login.clone(),
            self.config.smtp_password.clone(),
        );
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| ChannelError::Config(format!("smtp server '{host}': {e}")))?
            .port(port)
            .credentials(credentials)
            .build();
        Ok(transport)
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, message: &Message) -> Result<(), ChannelError> {
        let email = self.build_email(message)?;
        let transport = self.transport()?;
        tracing::debug!(
            server = %self.config.smtp_server,
            to = self.recipient(message),
            "sending report e-mail"
        );
        transport
            .send(email)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(())
    }
}

impl std::fmt::Debug for EmailChannel {
    // Keeps the SMTP password out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailChannel")
            .field("smtp_server", &self.config.smtp_server)
            .field("smtp_login", &self.config.smtp_login)
            .field("to_addr", &self.config.to_addr)
            .field("from_addr", &self.config.from_addr)
            .finish()
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox, ChannelError> {
    addr.parse()
        .map_err(|e| ChannelError::Address(format!("'{addr}': {e}")))
}

/// Split `host[:port]` (or `[v6-host]:port`); the port defaults to 25.
///
/// A string with more than one colon and no brackets is a bare IPv6
/// address.
fn split_server(server: &str) -> Result<(&str, u16), ChannelError> {
    let invalid_port = || ChannelError::Config(format!("invalid smtp port in '{server}'"));

    if let Some(rest) = server.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| ChannelError::Config(format!("unclosed '[' in '{server}'")))?;
        return match tail.strip_prefix(':') {
            Some(port) => Ok((host, port.parse().map_err(|_| invalid_port())?)),
            None if tail.is_empty() => Ok((host, DEFAULT_SMTP_PORT)),
            None => Err(invalid_port()),
        };
    }

    match server.split_once(':') {
        Some((host, port)) if !port.contains(':') => {
            Ok((host, port.parse().map_err(|_| invalid_port())?))
        }
        _ => Ok((server, DEFAULT_SMTP_PORT)),
    }
}
