//! Live email outreach over SMTP via lettre.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::SmtpConfig;
use crate::error::DispatchError;
use crate::leads::model::Lead;
use crate::outreach::ChannelSender;
use crate::pipeline::types::{Channel, MessageSet};

const CHANNEL: &str = "email";

/// Sends email variation A to the lead's address over a STARTTLS relay.
pub struct SmtpEmailSender {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(config: &SmtpConfig) -> Result<Self, DispatchError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::starttls_relay(&config.host)
            .map_err(|e| DispatchError::SendFailed {
                channel: CHANNEL.into(),
                reason: format!("SMTP relay error: {e}"),
            })?
            .port(config.port)
            .credentials(creds)
            .build();

        let from = config
            .from_address
            .parse()
            .map_err(|e| DispatchError::InvalidAddress {
                channel: CHANNEL.into(),
                reason: format!("Invalid from address: {e}"),
            })?;

        Ok(Self { transport, from })
    }

    fn build_message(&self, lead: &Lead, messages: &MessageSet) -> Result<Message, DispatchError> {
        let to: Mailbox = lead
            .intake
            .email
            .parse()
            .map_err(|e| DispatchError::InvalidAddress {
                channel: CHANNEL.into(),
                reason: format!("Invalid to address {}: {e}", lead.intake.email),
            })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(messages.email_a.subject.clone())
            .body(messages.email_a.body.clone())
            .map_err(|e| DispatchError::SendFailed {
                channel: CHANNEL.into(),
                reason: format!("Failed to build email: {e}"),
            })
    }
}

#[async_trait]
impl ChannelSender for SmtpEmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, lead: &Lead, messages: &MessageSet) -> Result<String, DispatchError> {
        let email = self.build_message(lead, messages)?;
        let transport = self.transport.clone();

        // lettre's SmtpTransport is blocking
        let response = tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| DispatchError::SendFailed {
                channel: CHANNEL.into(),
                reason: format!("SMTP task failed: {e}"),
            })?
            .map_err(|e| DispatchError::SendFailed {
                channel: CHANNEL.into(),
                reason: format!("SMTP send failed: {e}"),
            })?;

        tracing::info!(lead_id = lead.id, to = %lead.intake.email, "Email sent");
        Ok(format!(
            "Email sent to {} ({})",
            lead.intake.email,
            response.code()
        ))
    }
}
