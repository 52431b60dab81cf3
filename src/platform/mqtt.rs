//! Messaging half of the platform client
//!
//! Owns the rumqttc client and drives its event loop on a background task.
//! The event loop translates broker traffic into [`SessionEvent`]s, resolves
//! pending subscribe requests on SubAck and routes inbound publishes to the
//! subscription channel whose filter matches.

use super::topics::{is_valid_filter, topic_matches};
use super::{Message, PlatformAddrs, PlatformError, QoS, SessionEvent};
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::mqttbytes::QoS as MqttQoS;
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Keep-alive interval negotiated with the broker
pub const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Delay between event loop polls after a connection error
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

const REQUEST_CAPACITY: usize = 10;
const SUBSCRIPTION_CAPACITY: usize = 100;

type SubAckWaiter = oneshot::Sender<Result<(), PlatformError>>;

impl From<QoS> for MqttQoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => MqttQoS::AtMostOnce,
            QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
            QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
        }
    }
}

/// Broker endpoint extracted from the messaging URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Parse a messaging address (pure function)
///
/// Accepts bare `host:port` as well as `tcp://`, `mqtt://`, `ssl://`,
/// `tls://` and `mqtts://` URLs.
pub fn parse_messaging_addr(addr: &str) -> Result<BrokerEndpoint, PlatformError> {
    let invalid = || PlatformError::InvalidAddress(addr.to_string());
    let normalized = if addr.contains("://") {
        addr.to_string()
    } else {
        format!("tcp://{addr}")
    };

    let url = Url::parse(&normalized).map_err(|_| invalid())?;
    let tls = match url.scheme() {
        "tcp" | "mqtt" => false,
        "ssl" | "tls" | "mqtts" => true,
        _ => return Err(invalid()),
    };
    let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Configure MQTT options for an authenticated session (pure function)
///
/// The platform authenticates MQTT clients with the session token as
/// username and the system key as password.
pub fn configure_mqtt_options(
    client_id: &str,
    addrs: &PlatformAddrs,
    token: &str,
) -> Result<MqttOptions, PlatformError> {
    if client_id.is_empty() {
        return Err(PlatformError::Other("client id must not be empty".to_string()));
    }

    let endpoint = parse_messaging_addr(&addrs.messaging_url)?;
    let mut options = MqttOptions::new(client_id, endpoint.host, endpoint.port);

    if endpoint.tls {
        options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    options.set_credentials(token, &addrs.system_key);
    options.set_keep_alive(KEEP_ALIVE);

    Ok(options)
}

struct Route {
    filter: String,
    sender: mpsc::Sender<Message>,
}

/// State shared between the link handle and its event loop task
#[derive(Default)]
struct LinkShared {
    routes: Mutex<Vec<Route>>,
    pending_subacks: Mutex<VecDeque<SubAckWaiter>>,
}

impl LinkShared {
    fn add_route(&self, filter: &str, sender: mpsc::Sender<Message>) {
        let mut routes = lock(&self.routes);
        // Replacing the sender closes the previous channel for this filter
        routes.retain(|route| route.filter != filter);
        routes.push(Route {
            filter: filter.to_string(),
            sender,
        });
    }

    fn remove_route(&self, filter: &str) {
        lock(&self.routes).retain(|route| route.filter != filter);
    }

    async fn route_message(&self, message: Message) {
        let targets: Vec<mpsc::Sender<Message>> = lock(&self.routes)
            .iter()
            .filter(|route| topic_matches(&route.filter, &message.topic))
            .map(|route| route.sender.clone())
            .collect();

        if targets.is_empty() {
            debug!(target: "mqtt_transport", "No subscription for topic: {}", message.topic);
        }

        for sender in targets {
            if sender.send(message.clone()).await.is_err() {
                lock(&self.routes).retain(|route| !route.sender.same_channel(&sender));
            }
        }
    }

    fn resolve_suback(&self, codes: &[SubscribeReasonCode]) {
        match lock(&self.pending_subacks).pop_front() {
            Some(waiter) => {
                let _ = waiter.send(suback_outcome(codes));
            }
            None => warn!("SubAck received with no pending subscribe"),
        }
    }

    /// Tear down everything tied to the dropped connection
    fn connection_dropped(&self) {
        for waiter in lock(&self.pending_subacks).drain(..) {
            let _ = waiter.send(Err(PlatformError::ConnectionLostBeforeSubscribe));
        }
        // Dropping the senders closes every subscription channel
        lock(&self.routes).clear();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Interpret SubAck reason codes (pure function)
fn suback_outcome(codes: &[SubscribeReasonCode]) -> Result<(), PlatformError> {
    for code in codes {
        match code {
            SubscribeReasonCode::Success(_) => {}
            SubscribeReasonCode::NotAuthorized => {
                return Err(PlatformError::PermissionDenied(
                    "broker refused subscription: not authorized".to_string(),
                ));
            }
            other => {
                return Err(PlatformError::Transport(format!(
                    "broker refused subscription: {other:?}"
                )));
            }
        }
    }
    Ok(())
}

/// Live MQTT connection owned by a session
pub struct MqttLink {
    client: AsyncClient,
    shared: Arc<LinkShared>,
    event_loop_handle: JoinHandle<()>,
}

impl MqttLink {
    /// Create the client and spawn its event loop
    pub fn start(
        client_id: &str,
        addrs: &PlatformAddrs,
        token: &str,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self, PlatformError> {
        let options = configure_mqtt_options(client_id, addrs, token)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let shared = Arc::new(LinkShared::default());

        info!("Starting MQTT event loop for client: {}", client_id);
        let event_loop_handle = tokio::spawn(run_event_loop(event_loop, shared.clone(), events));

        Ok(Self {
            client,
            shared,
            event_loop_handle,
        })
    }

    /// Subscribe and wait for the broker's SubAck
    pub async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
    ) -> Result<mpsc::Receiver<Message>, PlatformError> {
        if !is_valid_filter(topic) {
            return Err(PlatformError::Other(format!("invalid topic filter: {topic}")));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let (ack_tx, ack_rx) = oneshot::channel();

        // Route first so nothing published right after the SubAck is lost
        self.shared.add_route(topic, tx);
        {
            let mut pending = lock(&self.shared.pending_subacks);
            if let Err(e) = self.client.try_subscribe(topic, qos.into()) {
                drop(pending);
                self.shared.remove_route(topic);
                return Err(PlatformError::Transport(e.to_string()));
            }
            pending.push_back(ack_tx);
        }

        let outcome = ack_rx
            .await
            .unwrap_or(Err(PlatformError::ConnectionLostBeforeSubscribe));
        if let Err(e) = outcome {
            self.shared.remove_route(topic);
            return Err(e);
        }

        debug!(target: "mqtt_transport", "Subscription confirmed: {}", topic);
        Ok(rx)
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<(), PlatformError> {
        self.client
            .publish(topic, qos.into(), false, payload)
            .await
            .map_err(|e| PlatformError::Transport(e.to_string()))
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.event_loop_handle.abort();
    }
}

/// Poll the event loop until the link is dropped
async fn run_event_loop(
    mut event_loop: EventLoop,
    shared: Arc<LinkShared>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let mut connected = false;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT client connected successfully");
                connected = true;
                let _ = events.send(SessionEvent::Connected);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let topic = String::from_utf8_lossy(&publish.topic).into_owned();
                shared.route_message(Message::new(topic, publish.payload)).await;
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                shared.resolve_suback(&suback.return_codes);
            }
            Ok(Event::Incoming(Packet::Disconnect(_))) => {
                shared.connection_dropped();
                if connected {
                    connected = false;
                    let reason = "broker closed the connection".to_string();
                    let _ = events.send(SessionEvent::ConnectionLost(reason));
                }
            }
            Ok(other) => {
                debug!(target: "mqtt_transport", "MQTT event: {:?}", other);
            }
            Err(e) => {
                shared.connection_dropped();
                if connected {
                    connected = false;
                    error!("MQTT event loop error: {}", e);
                    let _ = events.send(SessionEvent::ConnectionLost(e.to_string()));
                } else {
                    warn!("MQTT connection attempt failed: {}", e);
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
