//! Recipient domain types.
//!
//! A [`Recipient`] is one validated destination for a message. It can only be
//! built through [`Recipient::new`], which rejects malformed addresses, so any
//! `Recipient` value in the program carries a well-formed email.

use std::collections::BTreeMap;

use serde::Serialize;

/// Reason an address was rejected by [`is_valid_email`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid email address: {0:?}")]
pub struct InvalidEmail(pub String);

/// A validated message recipient with personalization fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    email: String,
    first_name: String,
    last_name: String,
    /// Source columns other than the three personalization fields.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    extra: BTreeMap<String, String>,
}

impl Recipient {
    /// Creates a recipient, trimming every field.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEmail`] if the trimmed address fails [`is_valid_email`].
    pub fn new(
        email: impl AsRef<str>,
        first_name: impl AsRef<str>,
        last_name: impl AsRef<str>,
    ) -> Result<Self, InvalidEmail> {
        let email = email.as_ref().trim();
        if !is_valid_email(email) {
            return Err(InvalidEmail(email.to_string()));
        }

        Ok(Self {
            email: email.to_string(),
            first_name: first_name.as_ref().trim().to_string(),
            last_name: last_name.as_ref().trim().to_string(),
            extra: BTreeMap::new(),
        })
    }

    /// Attaches passthrough columns from the source row.
    pub fn with_extra(mut self, extra: BTreeMap<String, String>) -> Self {
        self.extra = extra;
        self
    }

    /// The recipient's email address.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// The recipient's first name (may be empty).
    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    /// The recipient's last name (may be empty).
    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    /// Passthrough columns keyed by their original header.
    pub fn extra(&self) -> &BTreeMap<String, String> {
        &self.extra
    }
}

/// Why a source row did not produce a [`Recipient`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SkipReason {
    /// The email cell was empty.
    MissingEmail,
    /// The email cell failed [`is_valid_email`].
    InvalidEmail(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingEmail => write!(f, "missing email"),
            Self::InvalidEmail(value) => write!(f, "invalid email {value:?}"),
        }
    }
}

/// A source row that was skipped during loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowSkip {
    /// 1-based data row number (the header row is not counted).
    pub row: usize,
    /// Why the row was skipped.
    pub reason: SkipReason,
}

/// Conservative syntactic check of an email address.
///
/// Accepts `local@domain` where there is exactly one `@`, the local part is
/// non-empty, and the domain contains a `.` that is neither its first nor last
/// character. Whitespace anywhere is rejected.
pub fn is_valid_email(value: &str) -> bool {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return false;
    }
    domain.contains('.')
}
