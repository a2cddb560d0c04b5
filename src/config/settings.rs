//! Dispatch settings and provider configuration types.
//!
//! Settings are read from `<config dir>/mailshot/settings.json` (or an explicit
//! path) once per run. The core never writes them back.
//!
//! Two file shapes are accepted: the current one with a tagged `provider`
//! object, and the flat file written by earlier desktop releases, where
//! `provider` is the string `"smtp"` or `"ses"` and both backends' fields sit
//! side by side at the top level.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::is_valid_email;

/// Errors raised while reading a settings file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file could not be read.
    #[error("failed to read settings from {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON for [`Settings`].
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    /// No platform config directory could be determined.
    #[error("no configuration directory available on this platform")]
    NoConfigDir,
}

/// Problems found by [`ProviderConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required field is empty.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// The sender address is not a valid email.
    #[error("invalid sender email format: {0:?}")]
    InvalidSenderEmail(String),

    /// The SMTP port is zero.
    #[error("SMTP port must be non-zero")]
    InvalidPort,
}

/// Top-level settings for a dispatch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Delivery backend configuration.
    pub provider: ProviderConfig,
    /// Scheduler behaviour.
    #[serde(default)]
    pub dispatch: DispatchSettings,
}

impl Settings {
    /// Default settings file location for the current user.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        directories::ProjectDirs::from("", "", "mailshot")
            .map(|dirs| dirs.config_dir().join("settings.json"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Reads settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json(&raw)?;
        tracing::debug!(path = %path.display(), provider = ?settings.provider.kind(), "Loaded settings");
        Ok(settings)
    }

    /// Parses settings from a JSON string in either file shape.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if value.get("provider").is_some_and(serde_json::Value::is_string) {
            let flat: FlatSettings = serde_json::from_value(value)?;
            return Ok(flat.into_settings());
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// The flat settings file of earlier desktop releases.
#[derive(Deserialize)]
#[serde(default)]
struct FlatSettings {
    provider: String,
    smtp_server: String,
    smtp_port: u16,
    use_tls: bool,
    sender_email: String,
    sender_password: String,
    aws_access_key: String,
    aws_secret_key: String,
    aws_region: String,
    ses_sender_email: String,
    dispatch: DispatchSettings,
}

impl Default for FlatSettings {
    fn default() -> Self {
        Self {
            provider: "smtp".to_string(),
            smtp_server: String::new(),
            smtp_port: default_smtp_port(),
            use_tls: default_tls(),
            sender_email: String::new(),
            sender_password: String::new(),
            aws_access_key: String::new(),
            aws_secret_key: String::new(),
            aws_region: default_region(),
            ses_sender_email: String::new(),
            dispatch: DispatchSettings::default(),
        }
    }
}

impl FlatSettings {
    /// Keeps only the selected backend. Any selector other than SES means SMTP.
    fn into_settings(self) -> Settings {
        let provider = match self.provider.trim().to_ascii_lowercase().as_str() {
            "ses" | "cloud" => ProviderConfig::Cloud(CloudConfig {
                access_key: self.aws_access_key,
                secret_key: self.aws_secret_key,
                region: if self.aws_region.trim().is_empty() {
                    default_region()
                } else {
                    self.aws_region
                },
                sender_email: self.ses_sender_email,
                endpoint: None,
            }),
            other => {
                if other != "smtp" {
                    tracing::warn!(provider = other, "Unknown provider in settings, using SMTP");
                }
                ProviderConfig::Smtp(SmtpConfig {
                    server: self.smtp_server,
                    port: self.smtp_port,
                    tls: self.use_tls,
                    account_email: self.sender_email,
                    credential: self.sender_password,
                })
            }
        };

        Settings {
            provider,
            dispatch: self.dispatch,
        }
    }
}

/// Scheduler behaviour for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Fixed delay between consecutive send attempts.
    #[serde(rename = "throttle_ms", with = "millis_serde")]
    pub throttle: Duration,
    /// Network timeout applied by the delivery providers.
    #[serde(rename = "timeout_secs", with = "secs_serde")]
    pub timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Which delivery backend a [`ProviderConfig`] selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Direct SMTP submission.
    Smtp,
    /// Cloud email API.
    Cloud,
}

/// Delivery backend configuration. Exactly one variant is active per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Direct SMTP submission.
    Smtp(SmtpConfig),
    /// Cloud email API (Amazon SES).
    #[serde(alias = "ses")]
    Cloud(CloudConfig),
}

impl ProviderConfig {
    /// Returns the backend this configuration selects.
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Smtp(_) => ProviderKind::Smtp,
            Self::Cloud(_) => ProviderKind::Cloud,
        }
    }

    /// Address messages are sent from.
    pub fn sender_email(&self) -> &str {
        match self {
            Self::Smtp(config) => &config.account_email,
            Self::Cloud(config) => &config.sender_email,
        }
    }

    /// Checks that every field a connection needs is present and well-formed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Smtp(config) => {
                require("server", &config.server)?;
                if config.port == 0 {
                    return Err(ValidationError::InvalidPort);
                }
                require("account_email", &config.account_email)?;
                require_email(&config.account_email)?;
                require("credential", &config.credential)
            }
            Self::Cloud(config) => {
                require("access_key", &config.access_key)?;
                require("secret_key", &config.secret_key)?;
                require("region", &config.region)?;
                require("sender_email", &config.sender_email)?;
                require_email(&config.sender_email)
            }
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field))
    } else {
        Ok(())
    }
}

fn require_email(value: &str) -> Result<(), ValidationError> {
    if is_valid_email(value.trim()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidSenderEmail(value.to_string()))
    }
}

/// SMTP server configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server hostname.
    #[serde(alias = "smtp_server")]
    pub server: String,
    /// SMTP server port (typically 587 for STARTTLS).
    #[serde(alias = "smtp_port", default = "default_smtp_port")]
    pub port: u16,
    /// Whether to upgrade the connection with STARTTLS.
    #[serde(alias = "use_tls", default = "default_tls")]
    pub tls: bool,
    /// Account used to authenticate and as the sender address.
    #[serde(alias = "sender_email")]
    pub account_email: String,
    /// Password or app-specific password.
    #[serde(alias = "sender_password")]
    pub credential: String,
}

impl SmtpConfig {
    /// Creates a STARTTLS configuration on port 587.
    pub fn starttls(
        server: impl Into<String>,
        account_email: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            port: default_smtp_port(),
            tls: true,
            account_email: account_email.into(),
            credential: credential.into(),
        }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("account_email", &self.account_email)
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Amazon SES configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Access key ID.
    #[serde(alias = "aws_access_key")]
    pub access_key: String,
    /// Secret access key.
    #[serde(alias = "aws_secret_key")]
    pub secret_key: String,
    /// Region hosting the API endpoint.
    #[serde(alias = "aws_region", default = "default_region")]
    pub region: String,
    /// Verified sender address.
    #[serde(alias = "ses_sender_email")]
    pub sender_email: String,
    /// Overrides the regional endpoint (`https://email.<region>.amazonaws.com`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl CloudConfig {
    /// Base URL for API requests.
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) if !endpoint.trim().is_empty() => {
                endpoint.trim().trim_end_matches('/').to_string()
            }
            _ => format!("https://email.{}.amazonaws.com", self.region.trim()),
        }
    }
}

impl fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("region", &self.region)
            .field("sender_email", &self.sender_email)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_tls() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod secs_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn smtp() -> SmtpConfig {
        SmtpConfig::starttls("smtp.example.com", "me@example.com", "hunter2")
    }

    fn cloud() -> CloudConfig {
        CloudConfig {
            access_key: "AKIAEXAMPLE".to_string(),
            secret_key: "secret".to_string(),
            region: "eu-west-1".to_string(),
            sender_email: "news@example.com".to_string(),
            endpoint: None,
        }
    }

    #[test]
    fn dispatch_defaults() {
        let settings = DispatchSettings::default();
        assert_eq!(settings.throttle, Duration::from_millis(500));
        assert_eq!(settings.timeout, Duration::from_secs(30));
    }

    #[test]
    fn smtp_settings_from_json_with_defaults() {
        let settings = Settings::from_json(
            r#"{
                "provider": {
                    "type": "smtp",
                    "server": "smtp.example.com",
                    "account_email": "me@example.com",
                    "credential": "hunter2"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.provider, ProviderConfig::Smtp(smtp()));
        assert_eq!(settings.dispatch, DispatchSettings::default());
        assert_eq!(settings.provider.kind(), ProviderKind::Smtp);
    }

    #[test]
    fn legacy_keys_are_accepted() {
        let settings = Settings::from_json(
            r#"{
                "provider": {
                    "type": "smtp",
                    "smtp_server": "smtp.example.com",
                    "smtp_port": 465,
                    "use_tls": false,
                    "sender_email": "me@example.com",
                    "sender_password": "hunter2"
                },
                "dispatch": {"throttle_ms": 250, "timeout_secs": 5}
            }"#,
        )
        .unwrap();

        let ProviderConfig::Smtp(config) = &settings.provider else {
            panic!("Expected Smtp config");
        };
        assert_eq!(config.port, 465);
        assert!(!config.tls);
        assert_eq!(settings.dispatch.throttle, Duration::from_millis(250));
        assert_eq!(settings.dispatch.timeout, Duration::from_secs(5));
    }

    #[test]
    fn cloud_settings_accept_ses_tag_and_aws_keys() {
        let settings = Settings::from_json(
            r#"{
                "provider": {
                    "type": "ses",
                    "aws_access_key": "AKIAEXAMPLE",
                    "aws_secret_key": "secret",
                    "ses_sender_email": "news@example.com"
                }
            }"#,
        )
        .unwrap();

        let ProviderConfig::Cloud(config) = &settings.provider else {
            panic!("Expected Cloud config");
        };
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.endpoint_url(), "https://email.us-east-1.amazonaws.com");
        assert_eq!(settings.provider.sender_email(), "news@example.com");
    }

    /// Both backends filled in, as the desktop release saved them.
    fn flat_file(provider: &str) -> String {
        format!(
            r#"{{
  "provider": "{}",
  "smtp_server": "smtp.gmail.com",
  "smtp_port": 587,
  "use_tls": true,
  "sender_email": "me@example.com",
  "sender_password": "hunter2",
  "aws_access_key": "AKIAEXAMPLE",
  "aws_secret_key": "secret",
  "aws_region": "",
  "ses_sender_email": "news@example.com"
}}"#,
            provider
        )
    }

    #[test]
    fn flat_file_selecting_smtp() {
        let settings = Settings::from_json(&flat_file("smtp")).unwrap();

        assert_eq!(
            settings.provider,
            ProviderConfig::Smtp(SmtpConfig::starttls(
                "smtp.gmail.com",
                "me@example.com",
                "hunter2"
            ))
        );
        assert_eq!(settings.dispatch, DispatchSettings::default());
        assert_eq!(settings.provider.validate(), Ok(()));
    }

    #[test]
    fn flat_file_selecting_ses() {
        let settings = Settings::from_json(&flat_file("ses")).unwrap();

        let ProviderConfig::Cloud(config) = &settings.provider else {
            panic!("Expected Cloud config");
        };
        assert_eq!(config.access_key, "AKIAEXAMPLE");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(settings.provider.sender_email(), "news@example.com");
        assert_eq!(settings.provider.validate(), Ok(()));
    }

    #[test]
    fn flat_file_with_unknown_selector_uses_smtp() {
        let settings = Settings::from_json(r#"{"provider": "", "smtp_server": "mx.local"}"#).unwrap();
        let ProviderConfig::Smtp(config) = &settings.provider else {
            panic!("Expected Smtp config");
        };
        assert_eq!(config.server, "mx.local");
        assert_eq!(config.port, 587);
        assert!(config.tls);
    }

    #[test]
    fn cloud_roundtrip() {
        let config = ProviderConfig::Cloud(cloud());
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"type\":\"cloud\""));
        assert!(!json.contains("endpoint"));

        let back: ProviderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn endpoint_override_is_trimmed() {
        let mut config = cloud();
        config.endpoint = Some("http://127.0.0.1:4566/".to_string());
        assert_eq!(config.endpoint_url(), "http://127.0.0.1:4566");
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?} {:?}", smtp(), cloud());
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("\"secret\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn validate_accepts_complete_configs() {
        assert_eq!(ProviderConfig::Smtp(smtp()).validate(), Ok(()));
        assert_eq!(ProviderConfig::Cloud(cloud()).validate(), Ok(()));
    }

    #[test]
    fn validate_reports_first_problem() {
        let mut config = smtp();
        config.server = "  ".to_string();
        assert_eq!(
            ProviderConfig::Smtp(config).validate(),
            Err(ValidationError::MissingField("server"))
        );

        let mut config = smtp();
        config.port = 0;
        assert_eq!(
            ProviderConfig::Smtp(config).validate(),
            Err(ValidationError::InvalidPort)
        );

        let mut config = smtp();
        config.account_email = "me-at-example".to_string();
        assert_eq!(
            ProviderConfig::Smtp(config).validate(),
            Err(ValidationError::InvalidSenderEmail("me-at-example".to_string()))
        );

        let mut config = cloud();
        config.secret_key.clear();
        assert_eq!(
            ProviderConfig::Cloud(config).validate(),
            Err(ValidationError::MissingField("secret_key"))
        );
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let settings = Settings {
            provider: ProviderConfig::Cloud(cloud()),
            dispatch: DispatchSettings::default(),
        };
        write!(file, "{}", serde_json::to_string_pretty(&settings).unwrap()).unwrap();

        let loaded = Settings::load(file.path()).unwrap();
        assert_eq!(loaded.provider, settings.provider);
        assert_eq!(loaded.dispatch, settings.dispatch);
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Settings::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn unknown_provider_type_is_parse_error() {
        let err = Settings::from_json(r#"{"provider": {"type": "carrier-pigeon"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
