//! Production [`Platform`] implementation
//!
//! Authentication and configuration queries go over REST; messaging runs on
//! an [`MqttLink`] created by [`Session::initialize_messaging`].

use super::http::RestClient;
use super::mqtt::{parse_messaging_addr, MqttLink};
use super::{
    DeliveryToken, Message, Platform, PlatformAddrs, PlatformError, QoS, Row, Session,
    SessionEvent,
};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

/// Platform client backed by the REST API and MQTT broker
#[derive(Debug, Default)]
pub struct RemotePlatform;

impl RemotePlatform {
    pub fn new() -> Self {
        Self
    }

    fn rest_client(addrs: &PlatformAddrs) -> Result<RestClient, PlatformError> {
        // Both addresses must be usable before a session is handed out
        parse_messaging_addr(&addrs.messaging_url)?;
        RestClient::new(addrs.clone())
    }
}

#[async_trait]
impl Platform for RemotePlatform {
    type Session = RemoteSession;

    async fn authenticate_device(
        &self,
        name: &str,
        active_key: &str,
        addrs: &PlatformAddrs,
    ) -> Result<RemoteSession, PlatformError> {
        let rest = Self::rest_client(addrs)?;
        let token = rest.authenticate_device(name, active_key).await?;
        info!("Device {} authenticated", name);
        Ok(RemoteSession::new(rest, token))
    }

    async fn authenticate_service_account(
        &self,
        account_id: &str,
        token: &str,
        addrs: &PlatformAddrs,
    ) -> Result<RemoteSession, PlatformError> {
        if token.is_empty() {
            return Err(PlatformError::AuthenticationFailed(format!(
                "service account {account_id} has no token"
            )));
        }
        let rest = Self::rest_client(addrs)?;
        debug!("Using service account token for {}", account_id);
        Ok(RemoteSession::new(rest, token.to_string()))
    }
}

/// Authenticated session holding the platform token
pub struct RemoteSession {
    rest: RestClient,
    token: String,
    link: RwLock<Option<MqttLink>>,
}

impl RemoteSession {
    fn new(rest: RestClient, token: String) -> Self {
        Self {
            rest,
            token,
            link: RwLock::new(None),
        }
    }
}

#[async_trait]
impl Session for RemoteSession {
    async fn initialize_messaging(
        &self,
        client_id: &str,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(), PlatformError> {
        let link = MqttLink::start(client_id, self.rest.addrs(), &self.token, events)?;
        // A previous link (and its event loop) is dropped here
        *self.link.write().await = Some(link);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: QoS,
    ) -> Result<mpsc::Receiver<Message>, PlatformError> {
        let link = self.link.read().await;
        link.as_ref()
            .ok_or(PlatformError::NotConnected)?
            .subscribe(topic, qos)
            .await
    }

    async fn publish(&self, topic: &str, payload: Bytes, qos: QoS) -> Result<(), PlatformError> {
        let link = self.link.read().await;
        link.as_ref()
            .ok_or(PlatformError::NotConnected)?
            .publish(topic, payload, qos)
            .await
    }

    async fn publish_with_ack(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<DeliveryToken, PlatformError> {
        // The client accepting the request is the strongest confirmation at QoS 0
        self.publish(topic, payload, qos).await?;
        Ok(DeliveryToken::completed(Ok(())))
    }

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Row>, PlatformError> {
        self.rest
            .query_by_field(&self.token, collection, field, value)
            .await
    }
}
