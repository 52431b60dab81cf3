//! Connection lifecycle state
//!
//! One [`StateTracker`] exists per adapter instance. Components report
//! transitions through it and observers read the current state from a watch
//! channel.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Lifecycle state of the adapter's platform connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Authenticating,
    ConfigFetching,
    HandshakePending,
    Connected,
    SubscriptionPending,
    Listening,
    /// Terminal: the process must stop so it can be restarted externally
    Failed,
}

impl ConnectionState {
    /// Whether the messaging session is usable in this state (pure function)
    pub fn is_online(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected
                | ConnectionState::SubscriptionPending
                | ConnectionState::Listening
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Failed
    }
}

/// Single owner of the adapter's [`ConnectionState`]; clones share the state
#[derive(Debug, Clone)]
pub struct StateTracker {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `next`; once failed, the state never changes again
    pub fn transition(&self, next: ConnectionState) {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            log_state_transition(*current, next);
            *current = next;
            true
        });
    }
}

/// Log connection state transition (pure logging function)
fn log_state_transition(from: ConnectionState, to: ConnectionState) {
    match (from, to) {
        (_, ConnectionState::Failed) => {
            error!(severity = "fatal", "Connection state: {:?} -> Failed", from);
        }
        (
            ConnectionState::Listening | ConnectionState::Connected,
            ConnectionState::Disconnected,
        ) => {
            warn!("Connection to platform lost");
        }
        (ConnectionState::HandshakePending, ConnectionState::Connected) => {
            info!("Platform messaging connection established");
        }
        _ => {
            info!("Connection state: {:?} -> {:?}", from, to);
        }
    }
}
