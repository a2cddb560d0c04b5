//! Delivery provider implementations.
//!
//! This module contains the [`DeliveryProvider`] trait and implementations for
//! the supported delivery backends:
//!
//! - [`SmtpProvider`] - direct SMTP submission with STARTTLS
//! - [`SesProvider`] - Amazon SES v2 HTTP API
//!
//! # Architecture
//!
//! A provider is a factory for a [`DeliverySession`]. The dispatcher opens one
//! session per run, sends every message through it in order, and closes it on
//! every exit path. Errors are split by scope: [`ConnectionError`] ends the run
//! before anything is sent, [`SendError`] affects one recipient only.

mod ses;
mod sigv4;
mod smtp;
mod traits;

use crate::config::{DispatchSettings, ProviderConfig};

pub use ses::{SesProvider, SesSession};
pub use sigv4::{sign, signing_key, RequestParts, SignedRequest, SigningError, SigningScope};
pub use smtp::{SmtpProvider, SmtpSession};
pub use traits::{ConnectionError, DeliveryProvider, DeliverySession, OutgoingMessage, SendError};

#[cfg(test)]
pub use traits::{MockDeliveryProvider, MockDeliverySession};

/// Builds the provider selected by `config`.
pub fn from_config(
    config: &ProviderConfig,
    settings: &DispatchSettings,
) -> Box<dyn DeliveryProvider> {
    match config {
        ProviderConfig::Smtp(smtp) => Box::new(SmtpProvider::new(smtp.clone(), settings.timeout)),
        ProviderConfig::Cloud(cloud) => Box::new(SesProvider::new(cloud.clone(), settings.timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CloudConfig, ProviderKind, SmtpConfig};

    #[test]
    fn from_config_selects_variant() {
        let settings = DispatchSettings::default();

        let smtp = ProviderConfig::Smtp(SmtpConfig::starttls("smtp.example.com", "a@b.io", "pw"));
        assert_eq!(from_config(&smtp, &settings).kind(), ProviderKind::Smtp);

        let cloud = ProviderConfig::Cloud(CloudConfig {
            access_key: "AKIAFAKE".to_string(),
            secret_key: "secret".to_string(),
            region: "us-east-1".to_string(),
            sender_email: "a@b.io".to_string(),
            endpoint: None,
        });
        assert_eq!(from_config(&cloud, &settings).kind(), ProviderKind::Cloud);
    }
}
