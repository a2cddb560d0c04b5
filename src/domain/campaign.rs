//! Campaign domain types.
//!
//! A [`Campaign`] holds the subject and body templates shared by every
//! recipient of a dispatch run.

use serde::{Deserialize, Serialize};

/// Greeting line prepended to the body when [`Campaign::greeting`] is set.
pub const GREETING_TEMPLATE: &str = "Dear {first_name} {last_name},\n\n";

/// Subject and body templates for one dispatch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    /// Subject line template.
    pub subject_template: String,
    /// Plain text body template.
    pub body_template: String,
    /// Whether to open the body with [`GREETING_TEMPLATE`].
    #[serde(default)]
    pub greeting: bool,
}

impl Campaign {
    /// Creates a campaign without a greeting line.
    pub fn new(subject_template: impl Into<String>, body_template: impl Into<String>) -> Self {
        Self {
            subject_template: subject_template.into(),
            body_template: body_template.into(),
            greeting: false,
        }
    }

    /// Enables or disables the greeting line.
    pub fn with_greeting(mut self, greeting: bool) -> Self {
        self.greeting = greeting;
        self
    }
}

/// Subject and body rendered for a single recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    /// Rendered subject line.
    pub subject: String,
    /// Rendered body.
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_has_no_greeting() {
        let c = Campaign::new("Hi", "Body");
        assert!(!c.greeting);
        assert!(c.with_greeting(true).greeting);
    }

    #[test]
    fn greeting_defaults_to_false_when_absent() {
        let c: Campaign =
            serde_json::from_str(r#"{"subject_template":"S","body_template":"B"}"#).unwrap();
        assert_eq!(c, Campaign::new("S", "B"));
    }
}
