//! Drains a subscription channel into the user's message handler

use crate::adapter::subscription::Subscription;
use crate::platform::Message;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Callback invoked once per inbound message, in receipt order
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

pub struct MessageDispatcher;

impl MessageDispatcher {
    /// Invoke `handler` for every message until the channel closes
    ///
    /// Does not restart itself; a fresh subscription after reconnect starts a
    /// new dispatcher.
    pub async fn run(subscription: Subscription, handler: MessageHandler) {
        let Subscription { topic, mut receiver } = subscription;
        let mut delivered: u64 = 0;

        while let Some(message) = receiver.recv().await {
            debug!("Message received on {}", message.topic);
            handler(message);
            delivered += 1;
        }

        info!(
            "Subscription channel for {} closed after {} messages",
            topic, delivered
        );
    }

    /// Run the dispatcher as a background task
    pub fn spawn(subscription: Subscription, handler: MessageHandler) -> JoinHandle<()> {
        tokio::spawn(Self::run(subscription, handler))
    }
}
