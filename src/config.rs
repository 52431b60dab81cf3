//! Adapter configuration from command-line flags and environment variables
//!
//! Flags use kebab-case; the camelCase names older adapter deployments pass
//! are accepted as aliases. Platform-injected environment variables
//! (`CB_SYSTEM_KEY`, `CB_SERVICE_ACCOUNT`, ...) fill in anything not given on
//! the command line.

use crate::adapter::credentials::{CredentialStore, Credentials};
use crate::platform::http::parse_platform_url;
use crate::platform::mqtt::parse_messaging_addr;
use crate::platform::PlatformAddrs;
use clap::Args;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_PLATFORM_URL: &str = "http://localhost:9000";
pub const DEFAULT_MESSAGING_URL: &str = "localhost:1883";
pub const DEFAULT_ADAPTER_CONFIG_COLLECTION: &str = "adapter_config";
pub const DEFAULT_ADAPTER_NAME: &str = env!("CARGO_PKG_NAME");

/// Identity, backend and behavior settings for one adapter process
#[derive(Debug, Clone, Args, Serialize, Deserialize, PartialEq)]
pub struct AdapterArgs {
    /// System key (required)
    #[arg(long, visible_alias = "systemKey", env = "CB_SYSTEM_KEY", default_value = "")]
    pub system_key: String,

    /// System secret
    #[arg(long, visible_alias = "systemSecret", env = "CB_SYSTEM_SECRET", default_value = "")]
    pub system_secret: String,

    /// Name of the device this adapter runs as
    #[arg(
        long,
        visible_alias = "deviceName",
        env = "CB_DEVICE_NAME",
        default_value = DEFAULT_ADAPTER_NAME
    )]
    pub device_name: String,

    /// Password (active key) for device authentication; required without a service account
    #[arg(long = "password", env = "CB_DEVICE_PASSWORD")]
    pub active_key: Option<String>,

    /// Device service account name
    #[arg(long, visible_alias = "serviceAccount", env = "CB_SERVICE_ACCOUNT")]
    pub service_account: Option<String>,

    /// Device service account token
    #[arg(long, visible_alias = "serviceAccountToken", env = "CB_SERVICE_ACCOUNT_TOKEN")]
    pub service_account_token: Option<String>,

    /// Name of the edge this adapter runs on, if any
    #[arg(long, visible_alias = "edgeName", env = "CB_EDGE_NAME")]
    pub edge_name: Option<String>,

    /// Platform REST URL
    #[arg(
        long,
        visible_alias = "platformURL",
        env = "CB_PLATFORM_URL",
        default_value = DEFAULT_PLATFORM_URL
    )]
    pub platform_url: String,

    /// Messaging broker address
    #[arg(
        long,
        visible_alias = "messagingURL",
        env = "CB_MESSAGING_URL",
        default_value = DEFAULT_MESSAGING_URL
    )]
    pub messaging_url: String,

    /// Logging level: debug, info, warn, error or fatal
    #[arg(long, visible_alias = "logLevel", env = "LOG_LEVEL", default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Collection holding adapter configuration rows
    #[arg(
        long,
        visible_alias = "adapterConfigCollection",
        env = "CB_ADAPTER_CONFIG_COLLECTION",
        default_value = DEFAULT_ADAPTER_CONFIG_COLLECTION
    )]
    pub adapter_config_collection: String,

    /// Exit the adapter when the messaging connection is lost
    #[arg(
        long,
        visible_alias = "fatalOnDisconnect",
        env = "CB_FATAL_ON_DISCONNECT",
        default_value = "false",
        action = clap::ArgAction::Set,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub fatal_on_disconnect: bool,

    /// Give up when the broker has not completed the handshake after this many seconds
    #[arg(long, env = "CB_HANDSHAKE_TIMEOUT_SECS")]
    pub handshake_timeout_secs: Option<u64>,
}

impl Default for AdapterArgs {
    fn default() -> Self {
        Self {
            system_key: String::new(),
            system_secret: String::new(),
            device_name: DEFAULT_ADAPTER_NAME.to_string(),
            active_key: None,
            service_account: None,
            service_account_token: None,
            edge_name: None,
            platform_url: DEFAULT_PLATFORM_URL.to_string(),
            messaging_url: DEFAULT_MESSAGING_URL.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            adapter_config_collection: DEFAULT_ADAPTER_CONFIG_COLLECTION.to_string(),
            fatal_on_disconnect: false,
            handshake_timeout_secs: None,
        }
    }
}

/// Configuration errors, reported once at startup
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("System Key is required, can be supplied with --system-key or CB_SYSTEM_KEY")]
    MissingSystemKey,
    #[error("Device Password is required when not using a Service Account, can be supplied with --password")]
    MissingDevicePassword,
    #[error("Service Account Token is required when a Service Account is specified")]
    MissingServiceAccountToken,
    #[error("Device name must not be empty")]
    EmptyDeviceName,
    #[error("Invalid platform URL '{0}', expected http(s)://host[:port]")]
    InvalidPlatformUrl(String),
    #[error("Invalid messaging URL '{0}', expected host:port or tcp|ssl://host[:port]")]
    InvalidMessagingUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl AdapterArgs {
    /// Check required fields and backend addresses
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system_key.is_empty() {
            return Err(ConfigError::MissingSystemKey);
        }
        if self.device_name.is_empty() {
            return Err(ConfigError::EmptyDeviceName);
        }
        if non_empty(&self.active_key).is_none() && non_empty(&self.service_account).is_none() {
            return Err(ConfigError::MissingDevicePassword);
        }
        if non_empty(&self.service_account).is_some()
            && non_empty(&self.service_account_token).is_none()
        {
            return Err(ConfigError::MissingServiceAccountToken);
        }
        if self.adapter_config_collection.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "adapter config collection must not be empty".to_string(),
            ));
        }
        // A bad address never fixes itself, so it must not reach the retry loops
        parse_platform_url(&self.platform_url)
            .map_err(|_| ConfigError::InvalidPlatformUrl(self.platform_url.clone()))?;
        parse_messaging_addr(&self.messaging_url)
            .map_err(|_| ConfigError::InvalidMessagingUrl(self.messaging_url.clone()))?;
        Ok(())
    }

    /// Validate and resolve the immutable identity for this process
    ///
    /// A service account takes precedence over a device password.
    pub fn credential_store(&self) -> Result<CredentialStore, ConfigError> {
        self.validate()?;

        let credentials = match (
            non_empty(&self.service_account),
            non_empty(&self.service_account_token),
            non_empty(&self.active_key),
        ) {
            (Some(account_id), Some(token), _) => Credentials::ServiceAccount {
                account_id: account_id.to_string(),
                token: token.to_string(),
            },
            (None, _, Some(active_key)) => Credentials::Device {
                name: self.device_name.clone(),
                active_key: active_key.to_string(),
            },
            _ => return Err(ConfigError::MissingDevicePassword),
        };

        Ok(CredentialStore::new(
            self.device_name.clone(),
            credentials,
            PlatformAddrs {
                platform_url: self.platform_url.clone(),
                messaging_url: self.messaging_url.clone(),
                system_key: self.system_key.clone(),
                system_secret: self.system_secret.clone(),
            },
        ))
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_secs.map(Duration::from_secs)
    }

    /// Copy with every secret replaced, for display
    pub fn redacted(&self) -> Self {
        let mask = |value: &str| {
            if value.is_empty() {
                String::new()
            } else {
                "***".to_string()
            }
        };
        Self {
            system_secret: mask(&self.system_secret),
            active_key: self.active_key.as_deref().map(mask),
            service_account_token: self.service_account_token.as_deref().map(mask),
            ..self.clone()
        }
    }
}

/// Fixed retry delays used by the startup components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Between device authentication attempts
    pub auth_retry_delay: Duration,
    /// Between configuration query attempts
    pub config_retry_delay: Duration,
    /// Between transient subscribe failures
    pub subscribe_retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            auth_retry_delay: Duration::from_secs(60),
            config_retry_delay: Duration::from_secs(30),
            subscribe_retry_delay: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::credentials::IdentityKind;

    fn device_args() -> AdapterArgs {
        AdapterArgs {
            system_key: "sys-key".to_string(),
            active_key: Some("secret".to_string()),
            device_name: "pump-7".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_system_key_required() {
        let args = AdapterArgs {
            system_key: String::new(),
            ..device_args()
        };
        assert_eq!(args.validate(), Err(ConfigError::MissingSystemKey));
    }

    #[test]
    fn test_malformed_addresses_rejected_at_startup() {
        let args = AdapterArgs {
            platform_url: "localhost:9000".to_string(),
            ..device_args()
        };
        assert_eq!(
            args.validate(),
            Err(ConfigError::InvalidPlatformUrl("localhost:9000".to_string()))
        );

        let args = AdapterArgs {
            messaging_url: "ftp://broker:21".to_string(),
            ..device_args()
        };
        assert_eq!(
            args.validate(),
            Err(ConfigError::InvalidMessagingUrl("ftp://broker:21".to_string()))
        );
    }

    #[test]
    fn test_password_or_service_account_required() {
        let args = AdapterArgs {
            active_key: None,
            ..device_args()
        };
        assert_eq!(args.validate(), Err(ConfigError::MissingDevicePassword));

        let args = AdapterArgs {
            active_key: Some(String::new()),
            ..device_args()
        };
        assert_eq!(args.validate(), Err(ConfigError::MissingDevicePassword));
    }

    #[test]
    fn test_service_account_requires_token() {
        let args = AdapterArgs {
            active_key: None,
            service_account: Some("svc-pumps".to_string()),
            ..device_args()
        };
        assert_eq!(args.validate(), Err(ConfigError::MissingServiceAccountToken));
    }

    #[test]
    fn test_device_credentials_resolved() {
        let store = device_args().credential_store().unwrap();
        assert_eq!(store.identity(), IdentityKind::Device);
        assert_eq!(store.device_name(), "pump-7");
        assert_eq!(store.addrs().platform_url, DEFAULT_PLATFORM_URL);
        assert_eq!(store.addrs().messaging_url, DEFAULT_MESSAGING_URL);
    }

    #[test]
    fn test_service_account_wins_over_password() {
        let args = AdapterArgs {
            service_account: Some("svc-pumps".to_string()),
            service_account_token: Some("tok".to_string()),
            ..device_args()
        };
        let store = args.credential_store().unwrap();
        assert_eq!(store.identity(), IdentityKind::ServiceAccount);
        assert_eq!(store.config_lookup_name(), "svc-pumps");
    }

    #[test]
    fn test_redacted_masks_secrets_only() {
        let args = AdapterArgs {
            system_secret: "s3cr3t".to_string(),
            service_account: Some("svc-pumps".to_string()),
            service_account_token: Some("tok".to_string()),
            ..device_args()
        };
        let redacted = args.redacted();
        assert_eq!(redacted.system_secret, "***");
        assert_eq!(redacted.active_key.as_deref(), Some("***"));
        assert_eq!(redacted.service_account_token.as_deref(), Some("***"));
        assert_eq!(redacted.service_account.as_deref(), Some("svc-pumps"));
        assert_eq!(redacted.system_key, "sys-key");
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.auth_retry_delay, Duration::from_secs(60));
        assert_eq!(policy.config_retry_delay, Duration::from_secs(30));
        assert_eq!(policy.subscribe_retry_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_args_serialize_to_toml() {
        let rendered = toml::to_string_pretty(&device_args().redacted()).unwrap();
        assert!(rendered.contains("device_name = \"pump-7\""));
        assert!(!rendered.contains("secret\""));
    }
}
