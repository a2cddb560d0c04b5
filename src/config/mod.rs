//! Configuration and settings management.
//!
//! This module provides the provider configuration and scheduler settings a
//! dispatch run consumes. Settings are read from the user's config directory
//! as JSON.

mod settings;

pub use settings::{
    CloudConfig, ConfigError, DispatchSettings, ProviderConfig, ProviderKind, Settings,
    SmtpConfig, ValidationError,
};
