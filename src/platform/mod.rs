//! Abstract platform client
//!
//! The connectivity core talks to the backend exclusively through the
//! [`Platform`] and [`Session`] traits. The backend's wire protocols stay behind
//! these seams so the lifecycle logic can be driven by mocks in tests and by
//! [`remote::RemotePlatform`] in production.
//!
//! # Architecture
//!
//! - [`http`] - REST calls: device authentication and collection queries
//! - [`mqtt`] - messaging session on top of the rumqttc event loop
//! - [`remote`] - glues both halves into a [`Platform`] implementation
//! - [`topics`] - pure topic helpers (filter matching, joining)

pub mod http;
pub mod mqtt;
pub mod remote;
pub mod topics;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use remote::{RemotePlatform, RemoteSession};

/// A configuration row returned by a collection query
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Backend addresses together with the system identity they belong to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformAddrs {
    pub platform_url: String,
    pub messaging_url: String,
    pub system_key: String,
    pub system_secret: String,
}

/// Delivery guarantee tier for publish and subscribe requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Inbound message delivered on a subscription channel
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload rendered as text for logging
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Connection events emitted by the messaging session
///
/// These stand in for the `onConnect` / `onConnectionLost` callbacks: the
/// session delivers them on its own background task, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake completed, the session is usable
    Connected,
    /// A previously established connection dropped
    ConnectionLost(String),
}

/// Completion handle returned by [`Session::publish_with_ack`]
#[derive(Debug)]
pub struct DeliveryToken {
    rx: oneshot::Receiver<Result<(), PlatformError>>,
}

impl DeliveryToken {
    /// Token whose outcome is reported later through the returned sender
    pub fn pending() -> (oneshot::Sender<Result<(), PlatformError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    /// Token that already carries its outcome
    pub fn completed(outcome: Result<(), PlatformError>) -> Self {
        let (tx, token) = Self::pending();
        let _ = tx.send(outcome);
        token
    }

    /// Wait for the delivery outcome
    pub async fn wait(self) -> Result<(), PlatformError> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(PlatformError::Other("delivery token abandoned".to_string())))
    }
}

/// Errors reported by the platform client
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Connection lost before Subscribe completed")]
    ConnectionLostBeforeSubscribe,
    #[error("Messaging session not initialized")]
    NotConnected,
    #[error("Invalid platform address: {0}")]
    InvalidAddress(String),
    #[error("Platform request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected platform response: {0}")]
    UnexpectedResponse(String),
    #[error("Messaging transport error: {0}")]
    Transport(String),
    #[error("{0}")]
    Other(String),
}

/// Entry point of the abstract client: exchanges credentials for a session
#[async_trait]
pub trait Platform: Send + Sync {
    type Session: Session;

    /// Authenticate with a device name and active key
    async fn authenticate_device(
        &self,
        name: &str,
        active_key: &str,
        addrs: &PlatformAddrs,
    ) -> Result<Self::Session, PlatformError>;

    /// Authenticate with a pre-provisioned service account token
    async fn authenticate_service_account(
        &self,
        account_id: &str,
        token: &str,
        addrs: &PlatformAddrs,
    ) -> Result<Self::Session, PlatformError>;
}

/// Authenticated client session
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Start the persistent messaging session
    ///
    /// Returns once the session is set up; the handshake outcome arrives later
    /// on `events`. Synchronous failures (bad parameters) are returned directly.
    /// `events` is unbounded so the messaging client never waits on its consumer.
    async fn initialize_messaging(
        &self,
        client_id: &str,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(), PlatformError>;

    /// Subscribe to a topic filter, returning its inbound message channel
    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
    ) -> Result<mpsc::Receiver<Message>, PlatformError>;

    /// Fire-and-forget publish
    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), PlatformError>;

    /// Publish and hand back a token that resolves on delivery
    async fn publish_with_ack(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<DeliveryToken, PlatformError>;

    /// Single-key equality query against a collection
    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Row>, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_lost_before_subscribe_text() {
        // Classification of subscribe failures relies on this exact wording
        assert_eq!(
            PlatformError::ConnectionLostBeforeSubscribe.to_string(),
            "Connection lost before Subscribe completed"
        );
    }

    #[test]
    fn test_message_payload_lossy() {
        let message = Message::new("site/a", &b"hello"[..]);
        assert_eq!(message.payload_lossy(), "hello");
        assert_eq!(message.topic, "site/a");
    }

    #[test]
    fn test_qos_defaults_to_at_most_once() {
        assert_eq!(QoS::default(), QoS::AtMostOnce);
    }

    #[tokio::test]
    async fn test_completed_token_resolves() {
        let token = DeliveryToken::completed(Ok(()));
        assert!(token.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_pending_token_reports_failure() {
        let (tx, token) = DeliveryToken::pending();
        tx.send(Err(PlatformError::NotConnected)).unwrap();
        assert!(matches!(token.wait().await, Err(PlatformError::NotConnected)));
    }

    #[tokio::test]
    async fn test_abandoned_token_is_an_error() {
        let (tx, token) = DeliveryToken::pending();
        drop(tx);
        let err = token.wait().await.unwrap_err();
        assert!(err.to_string().contains("abandoned"));
    }
}
