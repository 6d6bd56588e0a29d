//! Fan-out of one [`Message`] to every registered notification channel.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::channels::{BeepChannel, EmailChannel, IcingaChannel};
use crate::config::Config;
use crate::message::{Message, MessageParams, ValidationError};

/// Delivery failure inside a channel. Never escapes [`Channel::report`].
#[derive(Debug)]
pub enum ChannelError {
    /// The channel's settings are unusable (bad certificate, bad server string).
    Config(String),
    /// An e-mail address could not be parsed.
    Address(String),
    /// The outgoing request or e-mail could not be assembled.
    Build(String),
    /// The remote end could not be reached or refused the delivery.
    Transport(String),
    /// The remote end answered with a non-success HTTP status.
    Http { status: u16, body: String },
    Io(std::io::Error),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Config(msg) => write!(f, "invalid channel configuration: {msg}"),
            ChannelError::Address(msg) => write!(f, "invalid address: {msg}"),
            ChannelError::Build(msg) => write!(f, "failed to build request: {msg}"),
            ChannelError::Transport(msg) => write!(f, "delivery failed: {msg}"),
            ChannelError::Http { status, body } => {
                write!(f, "remote answered HTTP {status}: {body}")
            }
            ChannelError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChannelError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(e: std::io::Error) -> Self {
        ChannelError::Io(e)
    }
}

/// A notification backend.
///
/// Implementors provide [`Channel::send`]; callers use [`Channel::report`],
/// which logs and swallows any delivery failure so that one broken
/// backend never keeps a message from the others.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Short name for logs, e.g. `"email"`.
    fn name(&self) -> &str;

    /// Deliver the message.
    async fn send(&self, message: &Message) -> Result<(), ChannelError>;

    /// Deliver the message, logging instead of returning failures.
    async fn report(&self, message: &Message) {
        match self.send(message).await {
            Ok(()) => debug!(channel = self.name(), "message delivered"),
            Err(e) => warn!(channel = self.name(), error = %e, "channel delivery failed"),
        }
    }
}

/// Ordered set of channels.
///
/// Built once at session start and handed to the [`Watch`](crate::Watch).
#[derive(Default)]
pub struct Reporter {
    channels: Vec<Box<dyn Channel>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every channel the configuration enables: e-mail, Icinga,
    /// then beep (only when activated and a `beep` executable exists).
    pub fn from_config(config: &Config, service_display_name: Option<&str>) -> Self {
        let mut reporter = Self::new();

        if let Some(ref email) = config.email {
            reporter.add_channel(EmailChannel::new(email.clone()));
        }

        if let Some(ref icinga) = config.icinga {
            match IcingaChannel::new(icinga.clone(), service_display_name) {
                Ok(channel) => reporter.add_channel(channel),
                Err(e) => warn!(error = %e, "icinga channel disabled"),
            }
        }

        if config.beep.as_ref().is_some_and(|b| b.activated) {
            match BeepChannel::detect() {
                Some(channel) => reporter.add_channel(channel),
                None => debug!("beep activated but no beep executable on PATH"),
            }
        }

        reporter
    }

    pub fn add_channel(&mut self, channel: impl Channel + 'static) {
        debug!(channel = channel.name(), "registered report channel");
        self.channels.push(Box::new(channel));
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Build one message from `params` and hand it to every channel in
    /// registration order.
    pub async fn report(&self, params: MessageParams) -> Result<Message, ValidationError> {
        let message = Message::new(params)?;
        for channel in &self.channels {
            channel.report(&message).await;
        }
        Ok(message)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FailingChannel, RecordingChannel};
    use super::*;
    use crate::config::{BeepConfig, EmailConfig};

    #[tokio::test]
    async fn test_report_reaches_every_channel() {
        let first = RecordingChannel::new();
        let second = RecordingChannel::new();
        let mut reporter = Reporter::new();
        reporter.add_channel(first.clone());
        reporter.add_channel(second.clone());

        let message = reporter
            .report(MessageParams {
                status: Some(1),
                custom_message: Some("disk almost full".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(first.messages(), vec![message.clone()]);
        assert_eq!(second.messages(), vec![message]);
    }

    #[tokio::test]
    async fn test_failing_channel_does_not_block_others() {
        let failing = FailingChannel::new();
        let recording = RecordingChannel::new();
        let mut reporter = Reporter::new();
        reporter.add_channel(failing.clone());
        reporter.add_channel(recording.clone());

        let message = reporter
            .report(MessageParams {
                status: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(failing.attempts(), 1);
        assert_eq!(recording.messages(), vec![message]);
    }

    #[tokio::test]
    async fn test_invalid_status_reaches_no_channel() {
        let recording = RecordingChannel::new();
        let mut reporter = Reporter::new();
        reporter.add_channel(recording.clone());

        let err = reporter
            .report(MessageParams {
                status: Some(7),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidStatus(7));
        assert!(recording.messages().is_empty());
    }

    #[tokio::test]
    async fn test_empty_reporter_still_returns_message() {
        let reporter = Reporter::new();
        assert!(reporter.is_empty());
        let message = reporter.report(MessageParams::default()).await.unwrap();
        assert_eq!(message.status_text(), "OK");
    }

    #[test]
    fn test_from_config_registers_configured_channels() {
        let config = Config {
            email: Some(EmailConfig {
                smtp_server: "smtp.example.com:587".to_string(),
                smtp_login: "Login".to_string(),
                smtp_password: "Password".to_string(),
                to_addr: "to@example.com".to_string(),
                from_addr: "from@example.com".to_string(),
                to_addr_critical: None,
            }),
            icinga: None,
            beep: Some(BeepConfig { activated: false }),
        };
        let reporter = Reporter::from_config(&config, None);
        assert_eq!(reporter.channel_names(), vec!["email"]);

        let reporter = Reporter::from_config(&Config::default(), None);
        assert!(reporter.is_empty());
    }
}
