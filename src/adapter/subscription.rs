//! Topic subscription with permission-failure detection
//!
//! A subscribe that fails because the broker dropped the connection
//! mid-request is how a missing subscribe permission shows up on this
//! platform. That case is terminal; any other failure is retried.

use crate::error::{AdapterError, AdapterResult};
use crate::platform::{Message, PlatformError, QoS, Session};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, Instrument};

/// Error text the messaging client reports when the connection drops during a subscribe
pub const CONNECTION_LOST_BEFORE_SUBSCRIBE: &str = "Connection lost before Subscribe completed";

/// A topic paired with its inbound message channel
#[derive(Debug)]
pub struct Subscription {
    pub topic: String,
    pub receiver: mpsc::Receiver<Message>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, receiver: mpsc::Receiver<Message>) -> Self {
        Self {
            topic: topic.into(),
            receiver,
        }
    }
}

/// How a failed subscribe is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeFailure {
    /// The identity lacks subscribe rights; retrying cannot succeed
    Permission,
    /// Retry after the fixed delay
    Transient,
}

impl SubscribeFailure {
    /// Classify a subscribe error (pure function)
    ///
    /// Structured kinds are checked first. Clients that only report text are
    /// matched on [`CONNECTION_LOST_BEFORE_SUBSCRIBE`], which breaks if the
    /// client changes its wording.
    pub fn classify(err: &PlatformError) -> Self {
        match err {
            PlatformError::PermissionDenied(_) | PlatformError::ConnectionLostBeforeSubscribe => {
                SubscribeFailure::Permission
            }
            other if other.to_string().contains(CONNECTION_LOST_BEFORE_SUBSCRIBE) => {
                SubscribeFailure::Permission
            }
            _ => SubscribeFailure::Transient,
        }
    }
}

/// Subscribes to topics at QoS 0, retrying transient failures forever
#[derive(Debug, Clone)]
pub struct SubscriptionManager {
    retry_delay: Duration,
}

impl SubscriptionManager {
    pub fn new(retry_delay: Duration) -> Self {
        Self { retry_delay }
    }

    /// Subscribe to `topic` on an established session
    ///
    /// Returns only on success or on a permission failure, which is terminal.
    pub async fn subscribe<S: Session>(
        &self,
        session: &S,
        topic: &str,
    ) -> AdapterResult<Subscription> {
        async {
            loop {
                info!("Subscribing to topic {}", topic);
                match session.subscribe(topic, QoS::AtMostOnce).await {
                    Ok(receiver) => {
                        info!("Subscribed to topic {}", topic);
                        return Ok(Subscription::new(topic, receiver));
                    }
                    Err(e) => match SubscribeFailure::classify(&e) {
                        SubscribeFailure::Permission => {
                            error!(
                                severity = "fatal",
                                "Subscribe to {} failed: {}. Ensure the device has subscribe permissions on the topic",
                                topic, e
                            );
                            return Err(AdapterError::SubscribePermission {
                                topic: topic.to_string(),
                                source: e,
                            });
                        }
                        SubscribeFailure::Transient => {
                            error!(
                                "Failed to subscribe to topic {}: {}. Retrying in {:?}",
                                topic, e, self.retry_delay
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                    },
                }
            }
        }
        .instrument(crate::mqtt_span!(operation = "subscribe", topic = %topic))
        .await
    }
}
