//! Error taxonomy for the adapter connectivity core
//!
//! Transient failures never surface here: the retrying components absorb
//! them. What remains are configuration errors, reported once at startup,
//! and fatal-by-policy conditions that must stop the process so an external
//! supervisor can restart it with fresh authentication.

use crate::platform::PlatformError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

const MAX_STATUS_MESSAGE_LEN: usize = 500;

/// Main error type for adapter operations
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Service account authentication failed for {account_id}")]
    ServiceAccountAuth {
        account_id: String,
        #[source]
        source: PlatformError,
    },

    #[error("Failed to initialize messaging connection")]
    SessionInit(#[source] PlatformError),

    #[error("No handshake from the messaging broker within {secs}s")]
    HandshakeTimeout { secs: u64 },

    #[error("Messaging connection lost: {reason}")]
    ConnectionLost {
        reason: String,
        device_identity: bool,
    },

    #[error("Missing subscribe permission on topic {topic}")]
    SubscribePermission {
        topic: String,
        #[source]
        source: PlatformError,
    },

    #[error("Failed to publish to {topic}")]
    Publish {
        topic: String,
        #[source]
        source: PlatformError,
    },

    #[error("Status serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

impl AdapterError {
    /// Whether this error must stop the process (fatal by policy)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AdapterError::Config(_)
                | AdapterError::ServiceAccountAuth { .. }
                | AdapterError::SessionInit(_)
                | AdapterError::HandshakeTimeout { .. }
                | AdapterError::ConnectionLost { .. }
                | AdapterError::SubscribePermission { .. }
        )
    }

    /// Operator hint logged next to a terminal error
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            AdapterError::ConnectionLost {
                device_identity: true,
                ..
            } => Some(
                "Stopping adapter to force device reauthentication (use a device service account to avoid this)",
            ),
            AdapterError::SubscribePermission { .. } => {
                Some("Ensure the device has subscribe permissions on the topic")
            }
            AdapterError::ServiceAccountAuth { .. } => {
                Some("Check the service account name and token, then redeploy")
            }
            _ => None,
        }
    }

    /// Full error text including sources, for logs
    pub fn detailed(&self) -> String {
        let mut text = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            text.push_str(": ");
            text.push_str(&err.to_string());
            source = err.source();
        }
        text
    }
}

/// Sanitize error text before it leaves the process in a status payload
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    if sanitized.len() > MAX_STATUS_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_STATUS_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}

/// Result type for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;
