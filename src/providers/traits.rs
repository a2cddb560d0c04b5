//! Delivery provider trait definitions.
//!
//! This module defines the [`DeliveryProvider`] / [`DeliverySession`] pair which
//! abstracts over different delivery backends (direct SMTP, cloud email API).
//! The dispatcher only talks to these traits and never learns which backend
//! is active.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderKind;

/// Errors that prevent a session from being opened. These are fatal for a run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Credentials were rejected or the request signature was invalid.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The backend could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// The provider configuration cannot be turned into a client.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Errors for a single message. These are recorded and the run continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The recipient address could not be used.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The provider refused the message permanently.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The provider refused the message because of a quota or rate limit.
    #[error("throttled: {0}")]
    Throttled(String),

    /// The provider reported a temporary failure.
    #[error("deferred: {0}")]
    Deferred(String),

    /// The message could not be handed to the provider.
    #[error("transport error: {0}")]
    Transport(String),
}

/// A rendered message addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
}

/// Factory for delivery sessions.
///
/// # Example
///
/// ```ignore
/// use mailshot::providers::{DeliveryProvider, OutgoingMessage};
///
/// async fn send_one(provider: &dyn DeliveryProvider, message: &OutgoingMessage) {
///     let mut session = provider.open().await.expect("failed to connect");
///     let result = session.send(message).await;
///     session.close().await.ok();
///     println!("{result:?}");
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryProvider: Send + Sync {
    /// Returns the backend this provider talks to.
    fn kind(&self) -> ProviderKind;

    /// Opens a session for the duration of one dispatch run.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the backend is unreachable or rejects
    /// the supplied credentials.
    async fn open(&self) -> Result<Box<dyn DeliverySession>, ConnectionError>;
}

/// An open connection to a delivery backend.
///
/// Messages are sent strictly one at a time. [`close`](Self::close) must be
/// called once the run is finished, whatever the outcome of the sends.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliverySession: Send {
    /// Sends one message.
    ///
    /// # Returns
    ///
    /// The message ID assigned by the provider, if it reports one.
    async fn send(&mut self, message: &OutgoingMessage) -> Result<Option<String>, SendError>;

    /// Releases the session.
    async fn close(&mut self) -> Result<(), ConnectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_display() {
        let err = ConnectionError::Authentication("535 bad credentials".to_string());
        assert_eq!(err.to_string(), "authentication failed: 535 bad credentials");

        let err = ConnectionError::Connection("refused".to_string());
        assert!(err.to_string().starts_with("connection error"));
    }

    #[test]
    fn send_error_display() {
        let err = SendError::Rejected("MessageRejected: address blacklisted".to_string());
        assert!(err.to_string().starts_with("rejected:"));

        let err = SendError::Throttled("daily quota".to_string());
        assert!(err.to_string().contains("daily quota"));
    }

    #[test]
    fn outgoing_message_serialization() {
        let message = OutgoingMessage {
            to: "john@x.com".to_string(),
            subject: "Hi John".to_string(),
            body: "Hello".to_string(),
        };
        let json = serde_json::to_string(&message).unwrap();
        let back: OutgoingMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }
}
