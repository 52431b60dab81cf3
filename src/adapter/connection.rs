//! Persistent messaging connection
//!
//! [`ConnectionManager::connect`] starts the messaging session and waits for
//! the broker handshake. Session events are handled on a background task:
//! the first `Connected` releases the waiting caller, every `Connected`
//! (re)subscribes the configured topic, and `ConnectionLost` goes through the
//! [`DisconnectPolicy`].
//!
//! Subscribing runs on its own task per handshake, so a subscribe stuck in
//! its retry loop never delays handling of a connection loss.
//!
//! Conditions that must stop the process are never handled here. They are
//! sent to the receiver returned by [`ConnectionManager::terminal_errors`] for
//! the application to act on.

use crate::adapter::credentials::{CredentialStore, IdentityKind};
use crate::adapter::dispatcher::{MessageDispatcher, MessageHandler};
use crate::adapter::state::{ConnectionState, StateTracker};
use crate::adapter::status::ConnectionStatus;
use crate::adapter::subscription::SubscriptionManager;
use crate::error::{AdapterError, AdapterResult};
use crate::platform::{DeliveryToken, PlatformError, QoS, Session, SessionEvent};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

const CLIENT_ID_SUFFIX_LEN: usize = 8;

/// Tunables for [`ConnectionManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Treat every connection loss as terminal
    pub fatal_on_disconnect: bool,
    /// Give up waiting for the handshake after this long; `None` waits forever
    pub handshake_timeout: Option<Duration>,
    /// Delay between transient subscribe failures
    pub subscribe_retry_delay: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            fatal_on_disconnect: false,
            handshake_timeout: None,
            subscribe_retry_delay: Duration::from_secs(30),
        }
    }
}

/// One-shot handshake signal shared between `connect` and the event task
///
/// Only the first [`fire`](Self::fire) reaches the waiting caller; later
/// calls, including concurrent ones, are no-ops.
#[derive(Debug)]
pub struct HandshakeSignal {
    slot: Mutex<Option<oneshot::Sender<()>>>,
}

impl HandshakeSignal {
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Release the waiter; returns whether this call was the one that did
    pub fn fire(&self) -> bool {
        let sender = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Outcome of a connection loss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    /// Stop the process so it can be restarted with fresh authentication
    Terminate,
    /// Log and wait for the client to reconnect
    Continue,
}

/// What to do when an established connection drops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectPolicy {
    pub fatal_on_disconnect: bool,
    pub identity: IdentityKind,
}

impl DisconnectPolicy {
    /// Decide the outcome of a connection loss (pure function)
    ///
    /// Device sessions cannot be re-established without a new device
    /// authentication, so a device identity always terminates.
    pub fn decide(&self) -> DisconnectAction {
        if self.fatal_on_disconnect || self.identity == IdentityKind::Device {
            DisconnectAction::Terminate
        } else {
            DisconnectAction::Continue
        }
    }
}

/// Client id for one messaging session: device name plus a random suffix
pub fn generate_client_id(device_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", device_name, &suffix[..CLIENT_ID_SUFFIX_LEN])
}

/// State shared by the manager and its event task
struct ConnectionContext<S: Session> {
    session: Arc<S>,
    device_name: String,
    policy: DisconnectPolicy,
    subscriptions: SubscriptionManager,
    state: StateTracker,
    terminal_tx: mpsc::UnboundedSender<AdapterError>,
    dispatchers: Mutex<HashMap<String, JoinHandle<()>>>,
    subscribe_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Session> ConnectionContext<S> {
    fn raise_terminal(&self, err: AdapterError) {
        self.state.transition(ConnectionState::Failed);
        if self.terminal_tx.send(err).is_err() {
            warn!("Terminal error raised with nobody listening");
        }
    }

    /// Start a dispatcher for `topic`, stopping the one it replaces
    fn install_dispatcher(&self, topic: &str, handle: JoinHandle<()>) {
        let mut dispatchers = match self.dispatchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = dispatchers.insert(topic.to_string(), handle) {
            debug!("Replacing dispatcher for {}", topic);
            previous.abort();
        }
    }

    /// Track the subscribe attempt for the current connection, aborting any
    /// earlier one still retrying
    fn replace_subscribe_task(&self, handle: Option<JoinHandle<()>>) {
        let previous = match self.subscribe_task.lock() {
            Ok(mut task) => std::mem::replace(&mut *task, handle),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), handle),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn stop_dispatchers(&self) {
        self.replace_subscribe_task(None);
        let mut dispatchers = match self.dispatchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, handle) in dispatchers.drain() {
            handle.abort();
        }
    }

    fn on_connect(
        self: &Arc<Self>,
        signal: &HandshakeSignal,
        topic: Option<&str>,
        handler: Option<&MessageHandler>,
    ) {
        info!("Connected to platform messaging broker");
        self.state.transition(ConnectionState::Connected);
        if !signal.fire() {
            debug!("Handshake already signalled, treating as reconnect");
        }

        let (Some(topic), Some(handler)) = (topic, handler) else {
            info!("No topic or message handler supplied, not subscribing to any topics");
            return;
        };

        self.state.transition(ConnectionState::SubscriptionPending);
        let ctx = Arc::clone(self);
        let topic = topic.to_string();
        let handler = handler.clone();
        let handle = tokio::spawn(
            async move {
                match ctx.subscriptions.subscribe(ctx.session.as_ref(), &topic).await {
                    Ok(subscription) => {
                        let handle = MessageDispatcher::spawn(subscription, handler);
                        ctx.install_dispatcher(&topic, handle);
                        ctx.state.transition(ConnectionState::Listening);
                    }
                    Err(e) => ctx.raise_terminal(e),
                }
            }
            .in_current_span(),
        );
        self.replace_subscribe_task(Some(handle));
    }

    fn on_connection_lost(&self, reason: String) {
        error!("Connection to messaging broker was lost: {}", reason);
        // A subscribe still retrying belongs to the dropped connection
        self.replace_subscribe_task(None);

        match self.policy.decide() {
            DisconnectAction::Terminate => {
                let device_identity = self.policy.identity == IdentityKind::Device;
                if device_identity {
                    error!(
                        severity = "fatal",
                        "Messaging connection lost while using device credentials for {}",
                        self.device_name
                    );
                }
                self.raise_terminal(AdapterError::ConnectionLost {
                    reason,
                    device_identity,
                });
            }
            DisconnectAction::Continue => {
                self.state.transition(ConnectionState::Disconnected);
            }
        }
    }
}

/// Owns the authenticated session and the messaging connection built on it
pub struct ConnectionManager<S: Session> {
    ctx: Arc<ConnectionContext<S>>,
    handshake_timeout: Option<Duration>,
    terminal_rx: Mutex<Option<mpsc::UnboundedReceiver<AdapterError>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl<S: Session> ConnectionManager<S> {
    pub fn new(
        session: S,
        store: &CredentialStore,
        options: ConnectOptions,
        state: StateTracker,
    ) -> Self {
        let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();
        let ctx = ConnectionContext {
            session: Arc::new(session),
            device_name: store.device_name().to_string(),
            policy: DisconnectPolicy {
                fatal_on_disconnect: options.fatal_on_disconnect,
                identity: store.identity(),
            },
            subscriptions: SubscriptionManager::new(options.subscribe_retry_delay),
            state,
            terminal_tx,
            dispatchers: Mutex::new(HashMap::new()),
            subscribe_task: Mutex::new(None),
        };

        Self {
            ctx: Arc::new(ctx),
            handshake_timeout: options.handshake_timeout,
            terminal_rx: Mutex::new(Some(terminal_rx)),
            event_task: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &S {
        &self.ctx.session
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.state.current()
    }

    /// Receiver for terminal errors raised on background tasks
    ///
    /// Yields the receiver once; later calls return `None`.
    pub fn terminal_errors(&self) -> Option<mpsc::UnboundedReceiver<AdapterError>> {
        match self.terminal_rx.lock() {
            Ok(mut rx) => rx.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Connect to the broker and wait for the handshake
    ///
    /// With a topic and handler, the topic is subscribed after every handshake
    /// and its messages are dispatched to `handler` in the background.
    /// Returns an error only when the session cannot be started or, if a
    /// handshake timeout is configured, when it expires.
    pub async fn connect(
        &self,
        topic: Option<&str>,
        handler: Option<MessageHandler>,
    ) -> AdapterResult<()> {
        let client_id = generate_client_id(&self.ctx.device_name);
        let span = crate::mqtt_span!(operation = "connect", client_id = %client_id);

        async {
            info!("Initializing messaging connection");
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (signal, handshake_rx) = HandshakeSignal::new();

            // Event handling is in place before the session can emit anything
            self.spawn_event_task(events_rx, signal, topic.map(str::to_string), handler);
            self.ctx.state.transition(ConnectionState::HandshakePending);

            if let Err(e) = self.ctx.session.initialize_messaging(&client_id, events_tx).await {
                self.abort_event_task();
                self.ctx.state.transition(ConnectionState::Failed);
                return Err(AdapterError::SessionInit(e));
            }

            self.wait_for_handshake(handshake_rx).await
        }
        .instrument(span)
        .await
    }

    async fn wait_for_handshake(&self, handshake_rx: oneshot::Receiver<()>) -> AdapterResult<()> {
        let outcome = match self.handshake_timeout {
            None => handshake_rx.await,
            Some(limit) => match tokio::time::timeout(limit, handshake_rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.ctx.state.transition(ConnectionState::Failed);
                    return Err(AdapterError::HandshakeTimeout {
                        secs: limit.as_secs(),
                    });
                }
            },
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(_) => {
                self.ctx.state.transition(ConnectionState::Failed);
                Err(AdapterError::SessionInit(PlatformError::Other(
                    "messaging session closed before the handshake completed".to_string(),
                )))
            }
        }
    }

    fn spawn_event_task(
        &self,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        signal: HandshakeSignal,
        topic: Option<String>,
        handler: Option<MessageHandler>,
    ) {
        let ctx = self.ctx.clone();
        let handle = tokio::spawn(
            async move {
                while let Some(event) = events.recv().await {
                    match event {
                        SessionEvent::Connected => {
                            ctx.on_connect(&signal, topic.as_deref(), handler.as_ref())
                        }
                        SessionEvent::ConnectionLost(reason) => ctx.on_connection_lost(reason),
                    }
                }
                debug!("Session event stream ended");
            }
            .in_current_span(),
        );

        let previous = match self.event_task.lock() {
            Ok(mut task) => task.replace(handle),
            Err(poisoned) => poisoned.into_inner().replace(handle),
        };
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    fn abort_event_task(&self) {
        let task = match self.event_task.lock() {
            Ok(mut task) => task.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
    }

    /// Fire-and-forget publish at QoS 0
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> AdapterResult<()> {
        self.ctx
            .session
            .publish(topic, payload.into(), QoS::AtMostOnce)
            .await
            .map_err(|source| AdapterError::Publish {
                topic: topic.to_string(),
                source,
            })
    }

    /// Publish at QoS 0 and return the delivery token
    pub async fn publish_with_ack(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
    ) -> AdapterResult<DeliveryToken> {
        self.ctx
            .session
            .publish_with_ack(topic, payload.into(), QoS::AtMostOnce)
            .await
            .map_err(|source| AdapterError::Publish {
                topic: topic.to_string(),
                source,
            })
    }

    /// Publish a [`ConnectionStatus`] to `topic`
    pub async fn publish_status(
        &self,
        topic: &str,
        status: &ConnectionStatus,
    ) -> AdapterResult<DeliveryToken> {
        info!("Setting status {} on topic {}", status.status, topic);
        let payload = status.to_payload()?;

        match self.publish_with_ack(topic, payload).await {
            Ok(token) => {
                debug!("Sent status message to topic {}", topic);
                Ok(token)
            }
            Err(e) => {
                error!("Failed to publish status to topic {}: {}", topic, e.detailed());
                Err(e)
            }
        }
    }
}

impl<S: Session> Drop for ConnectionManager<S> {
    fn drop(&mut self) {
        self.abort_event_task();
        self.ctx.stop_dispatchers();
    }
}
