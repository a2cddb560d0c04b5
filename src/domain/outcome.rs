//! Per-recipient send outcomes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Recipient;

/// Whether a send attempt was accepted by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    /// The provider accepted the message.
    Success,
    /// The provider or transport rejected the message.
    Failure,
}

/// Result of one attempted send. Produced once per attempted recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    /// The recipient the message was addressed to.
    pub recipient: Recipient,
    /// Whether the attempt succeeded.
    pub status: SendStatus,
    /// Provider error text for failed attempts.
    pub error_detail: Option<String>,
    /// Provider-assigned message ID for successful attempts, when reported.
    pub message_id: Option<String>,
    /// When the attempt finished.
    pub attempted_at: DateTime<Utc>,
}

impl SendOutcome {
    /// Records an accepted message.
    pub fn success(recipient: Recipient, message_id: Option<String>) -> Self {
        Self {
            recipient,
            status: SendStatus::Success,
            error_detail: None,
            message_id,
            attempted_at: Utc::now(),
        }
    }

    /// Records a rejected message.
    pub fn failure(recipient: Recipient, error_detail: impl Into<String>) -> Self {
        Self {
            recipient,
            status: SendStatus::Failure,
            error_detail: Some(error_detail.into()),
            message_id: None,
            attempted_at: Utc::now(),
        }
    }

    /// Returns true if the provider accepted the message.
    pub fn is_success(&self) -> bool {
        self.status == SendStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Recipient {
        Recipient::new("a@example.com", "A", "Z").unwrap()
    }

    #[test]
    fn success_has_no_error() {
        let outcome = SendOutcome::success(recipient(), Some("<id@x>".to_string()));
        assert!(outcome.is_success());
        assert!(outcome.error_detail.is_none());
        assert_eq!(outcome.message_id.as_deref(), Some("<id@x>"));
    }

    #[test]
    fn failure_carries_detail() {
        let outcome = SendOutcome::failure(recipient(), "550 mailbox unavailable");
        assert!(!outcome.is_success());
        assert_eq!(outcome.status, SendStatus::Failure);
        assert_eq!(
            outcome.error_detail.as_deref(),
            Some("550 mailbox unavailable")
        );
    }

    #[test]
    fn status_serialization() {
        let json = serde_json::to_string(&SendStatus::Failure).unwrap();
        assert_eq!(json, "\"failure\"");
    }
}
