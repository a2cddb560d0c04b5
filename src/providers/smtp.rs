//! SMTP provider implementation.
//!
//! This module provides a [`DeliveryProvider`] that submits messages directly
//! to an SMTP server via `lettre`'s connection client.
//!
//! # Protocol Details
//!
//! - STARTTLS when [`SmtpConfig::tls`] is set, plaintext otherwise
//! - Authentication with the account email and credential
//! - One connection per run: [`open`](DeliveryProvider::open) connects and
//!   logs in, every message goes through that connection, and
//!   [`close`](DeliverySession::close) sends `QUIT`
//! - A refused recipient or message is answered with `RSET`, so the
//!   connection stays usable for the rest of the run

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::{Credentials, DEFAULT_MECHANISMS};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Rcpt, Rset};
use lettre::transport::smtp::extension::{ClientId, Extension, MailBodyParameter, MailParameter};
use lettre::transport::smtp::response::Response;
use lettre::Message;

use super::{ConnectionError, DeliveryProvider, DeliverySession, OutgoingMessage, SendError};
use crate::config::{ProviderKind, SmtpConfig};

type SmtpError = lettre::transport::smtp::Error;

/// SMTP delivery provider.
///
/// # Example
///
/// ```ignore
/// use mailshot::config::SmtpConfig;
/// use mailshot::providers::{DeliveryProvider, SmtpProvider};
///
/// let config = SmtpConfig::starttls("smtp.example.com", "me@example.com", "app-password");
/// let provider = SmtpProvider::new(config, Duration::from_secs(30));
/// let mut session = provider.open().await?;
/// ```
pub struct SmtpProvider {
    /// Server configuration.
    config: SmtpConfig,
    /// Network timeout for connecting and for each message.
    timeout: Duration,
}

impl SmtpProvider {
    /// Creates a provider. No connection is made until [`open`](DeliveryProvider::open).
    pub fn new(config: SmtpConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    fn sender(&self) -> Result<Mailbox, ConnectionError> {
        self.config.account_email.trim().parse().map_err(|e| {
            ConnectionError::Configuration(format!(
                "invalid account email {:?}: {}",
                self.config.account_email, e
            ))
        })
    }

    /// Connects, upgrades with STARTTLS when configured, and logs in.
    async fn connect(&self) -> Result<AsyncSmtpConnection, ConnectionError> {
        let server = self.config.server.trim();
        let hello = ClientId::default();

        let mut connection = AsyncSmtpConnection::connect_tokio1(
            (server, self.config.port),
            Some(self.timeout),
            &hello,
            None,
            None,
        )
        .await
        .map_err(|e| {
            ConnectionError::Connection(format!("{}:{}: {}", server, self.config.port, e))
        })?;

        if self.config.tls {
            let tls = TlsParameters::new(server.to_string())
                .map_err(|e| ConnectionError::Configuration(format!("TLS setup failed: {}", e)))?;
            connection
                .starttls(tls, &hello)
                .await
                .map_err(|e| ConnectionError::Connection(format!("STARTTLS failed: {}", e)))?;
        }

        let credentials = Credentials::new(
            self.config.account_email.trim().to_string(),
            self.config.credential.clone(),
        );
        if let Err(e) = connection.auth(DEFAULT_MECHANISMS, &credentials).await {
            connection.abort().await;
            return Err(classify_auth_error(&e));
        }

        Ok(connection)
    }
}

#[async_trait]
impl DeliveryProvider for SmtpProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Smtp
    }

    async fn open(&self) -> Result<Box<dyn DeliverySession>, ConnectionError> {
        let sender = self.sender()?;
        let connection = within(self.timeout, self.connect())
            .await
            .ok_or_else(|| {
                ConnectionError::Connection(format!(
                    "{}:{} timed out during login",
                    self.config.server, self.config.port
                ))
            })??;

        tracing::info!(
            server = %self.config.server,
            port = self.config.port,
            tls = self.config.tls,
            encrypted = connection.is_encrypted(),
            "SMTP session opened"
        );

        Ok(Box::new(SmtpSession {
            connection: Some(connection),
            sender,
            timeout: self.timeout,
        }))
    }
}

/// The authenticated SMTP connection for one run.
pub struct SmtpSession {
    /// `None` once closed or after the connection was lost.
    connection: Option<AsyncSmtpConnection>,
    sender: Mailbox,
    timeout: Duration,
}

impl SmtpSession {
    fn build_message(&self, message: &OutgoingMessage) -> Result<Message, SendError> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| SendError::InvalidAddress(format!("{}: {}", message.to, e)))?;

        Message::builder()
            .from(self.sender.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| SendError::InvalidAddress(format!("{}: {}", message.to, e)))
    }
}

/// Outcome of one mail transaction.
enum Transaction {
    Accepted(Response),
    /// The server answered with an error; the connection is still in sync.
    Refused(SmtpError),
    /// The message was not sent and the server could not be asked.
    NotSent(SendError),
    /// I/O or protocol failure; the connection cannot be reused.
    Broken(SmtpError),
}

async fn transact(
    connection: &mut AsyncSmtpConnection,
    envelope: &Envelope,
    body: &[u8],
) -> Transaction {
    let mut parameters = Vec::new();

    let ascii_addresses = envelope
        .to()
        .iter()
        .chain(envelope.from())
        .all(|address| address.to_string().is_ascii());
    if !ascii_addresses {
        if !connection.server_info().supports_feature(Extension::SmtpUtfEight) {
            return Transaction::NotSent(SendError::InvalidAddress(
                "non-ASCII address but the server does not support SMTPUTF8".to_string(),
            ));
        }
        parameters.push(MailParameter::SmtpUtfEight);
    }
    if !body.is_ascii() {
        if !connection.server_info().supports_feature(Extension::EightBitMime) {
            return Transaction::NotSent(SendError::Rejected(
                "8-bit content but the server does not support 8BITMIME".to_string(),
            ));
        }
        parameters.push(MailParameter::Body(MailBodyParameter::EightBitMime));
    }

    let result = async {
        connection
            .command(Mail::new(envelope.from().cloned(), parameters))
            .await?;
        for to in envelope.to() {
            connection.command(Rcpt::new(to.clone(), Vec::new())).await?;
        }
        connection.command(Data).await?;
        connection.message(body).await
    }
    .await;

    match result {
        Ok(response) => Transaction::Accepted(response),
        Err(e) if e.is_permanent() || e.is_transient() => Transaction::Refused(e),
        Err(e) => Transaction::Broken(e),
    }
}

#[async_trait]
impl DeliverySession for SmtpSession {
    async fn send(&mut self, message: &OutgoingMessage) -> Result<Option<String>, SendError> {
        let email = self.build_message(message)?;
        let body = email.formatted();
        let timeout = self.timeout;
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| SendError::Transport("session is closed".to_string()))?;

        let outcome = within(timeout, transact(connection, email.envelope(), &body)).await;
        match outcome {
            Some(Transaction::Accepted(response)) => {
                let message_id = response.message().next().map(|s| s.to_string());
                tracing::debug!(to = %message.to, code = %response.code(), "Email sent via SMTP");
                Ok(message_id)
            }
            Some(Transaction::Refused(e)) => {
                // Clears the refused transaction so the next message starts clean.
                if let Err(rset) = connection.command(Rset).await {
                    tracing::warn!(error = %rset, "SMTP reset failed, dropping connection");
                    self.connection = None;
                }
                Err(classify_send_error(&e))
            }
            Some(Transaction::NotSent(e)) => Err(e),
            Some(Transaction::Broken(e)) => {
                tracing::warn!(error = %e, "SMTP connection lost");
                self.connection = None;
                Err(SendError::Transport(e.to_string()))
            }
            None => {
                tracing::warn!(to = %message.to, "SMTP send timed out, dropping connection");
                self.connection = None;
                Err(SendError::Transport(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                )))
            }
        }
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        let Some(mut connection) = self.connection.take() else {
            return Ok(());
        };

        match within(self.timeout, connection.quit()).await {
            Some(Ok(_)) => {
                tracing::info!("SMTP session closed");
                Ok(())
            }
            Some(Err(e)) => Err(ConnectionError::Connection(format!("QUIT failed: {}", e))),
            None => {
                connection.abort().await;
                Err(ConnectionError::Connection("QUIT timed out".to_string()))
            }
        }
    }
}

/// Runs `future`, giving up after `timeout`.
async fn within<F: Future>(timeout: Duration, future: F) -> Option<F::Output> {
    tokio::time::timeout(timeout, future).await.ok()
}

fn classify_auth_error(error: &SmtpError) -> ConnectionError {
    if error.is_permanent() || error.is_client() {
        ConnectionError::Authentication(error.to_string())
    } else {
        ConnectionError::Connection(error.to_string())
    }
}

fn classify_send_error(error: &SmtpError) -> SendError {
    if error.is_permanent() {
        SendError::Rejected(error.to_string())
    } else if error.is_transient() {
        SendError::Deferred(error.to_string())
    } else {
        SendError::Transport(error.to_string())
    }
}
