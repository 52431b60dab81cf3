//! Status payload adapters publish about themselves

use crate::error::sanitize_error_message;
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

pub const STATUS_RUNNING: &str = "Running";
pub const STATUS_STOPPED: &str = "Stopped";
pub const STATUS_ERROR: &str = "Error";

/// `{status, error_message?, timestamp}` as published on a status topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// RFC3339, UTC
    pub timestamp: String,
}

impl ConnectionStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            error_message: None,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn running() -> Self {
        Self::new(STATUS_RUNNING)
    }

    pub fn stopped() -> Self {
        Self::new(STATUS_STOPPED)
    }

    /// Error status; the message is sanitized before it leaves the process
    pub fn error(message: &str) -> Self {
        Self::new(STATUS_ERROR).with_error_message(message)
    }

    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = Some(sanitize_error_message(message));
        self
    }

    pub fn to_payload(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}
