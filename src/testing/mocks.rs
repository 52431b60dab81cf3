//! Mock implementations for testing
//!
//! [`MockPlatform`] and [`MockSession`] stand in for the platform client so the
//! lifecycle can be driven without a backend or broker. Every mock session
//! handed out by a `MockPlatform` shares state with [`MockPlatform::session`],
//! letting a test script failures up front and inject session events later.

use crate::platform::{
    DeliveryToken, Message, Platform, PlatformAddrs, PlatformError, QoS, Row, Session,
    SessionEvent,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

const MOCK_CHANNEL_BUFFER: usize = 64;

pub type PublishedMessage = (String, Bytes);
pub type RecordedQuery = (String, String, String);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mock platform handing out [`MockSession`]s
#[derive(Debug, Default)]
pub struct MockPlatform {
    session: MockSession,
    auth_failures_remaining: AtomicUsize,
    auth_attempts: AtomicUsize,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle sharing state with every session this platform returns
    pub fn session(&self) -> MockSession {
        self.session.clone()
    }

    /// Fail the next `times` authentication attempts
    pub fn fail_auth_times(&self, times: usize) {
        self.auth_failures_remaining.store(times, Ordering::SeqCst);
    }

    pub fn auth_attempts(&self) -> usize {
        self.auth_attempts.load(Ordering::SeqCst)
    }

    fn attempt_auth(&self) -> Result<MockSession, PlatformError> {
        self.auth_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .auth_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(PlatformError::AuthenticationFailed(
                "mock authentication failure".to_string(),
            ))
        } else {
            Ok(self.session.clone())
        }
    }
}

#[async_trait]
impl Platform for MockPlatform {
    type Session = MockSession;

    async fn authenticate_device(
        &self,
        _name: &str,
        _active_key: &str,
        _addrs: &PlatformAddrs,
    ) -> Result<MockSession, PlatformError> {
        self.attempt_auth()
    }

    async fn authenticate_service_account(
        &self,
        _account_id: &str,
        _token: &str,
        _addrs: &PlatformAddrs,
    ) -> Result<MockSession, PlatformError> {
        self.attempt_auth()
    }
}

#[derive(Debug)]
struct MockSessionState {
    auto_connect: AtomicBool,
    fail_init: AtomicBool,
    fail_publish: AtomicBool,
    query_failures_remaining: AtomicUsize,
    query_rows: Mutex<Vec<Row>>,
    queries: Mutex<Vec<RecordedQuery>>,
    subscribe_errors: Mutex<VecDeque<PlatformError>>,
    subscribe_attempts: AtomicUsize,
    subscriptions: Mutex<HashMap<String, mpsc::Sender<Message>>>,
    events: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    client_ids: Mutex<Vec<String>>,
    published: Mutex<Vec<PublishedMessage>>,
}

impl Default for MockSessionState {
    fn default() -> Self {
        Self {
            auto_connect: AtomicBool::new(true),
            fail_init: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            query_failures_remaining: AtomicUsize::new(0),
            query_rows: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            subscribe_errors: Mutex::new(VecDeque::new()),
            subscribe_attempts: AtomicUsize::new(0),
            subscriptions: Mutex::new(HashMap::new()),
            events: Mutex::new(None),
            client_ids: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        }
    }
}

/// Scriptable session; clones share state
#[derive(Debug, Clone, Default)]
pub struct MockSession {
    state: Arc<MockSessionState>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set (the default), the handshake completes as soon as messaging is initialized
    pub fn set_auto_connect(&self, enabled: bool) {
        self.state.auto_connect.store(enabled, Ordering::SeqCst);
    }

    /// Make `initialize_messaging` fail synchronously
    pub fn fail_initialize(&self) {
        self.state.fail_init.store(true, Ordering::SeqCst);
    }

    pub fn fail_publishes(&self) {
        self.state.fail_publish.store(true, Ordering::SeqCst);
    }

    /// Fail the next `times` configuration queries
    pub fn fail_queries_times(&self, times: usize) {
        self.state
            .query_failures_remaining
            .store(times, Ordering::SeqCst);
    }

    pub fn set_query_rows(&self, rows: Vec<Row>) {
        *lock(&self.state.query_rows) = rows;
    }

    pub fn query_attempts(&self) -> usize {
        lock(&self.state.queries).len()
    }

    /// Every query issued, as (collection, field, value)
    pub fn queries(&self) -> Vec<RecordedQuery> {
        lock(&self.state.queries).clone()
    }

    /// Errors returned by the next subscribe attempts, in order
    pub fn script_subscribe_errors(&self, errors: Vec<PlatformError>) {
        lock(&self.state.subscribe_errors).extend(errors);
    }

    pub fn subscribe_attempts(&self) -> usize {
        self.state.subscribe_attempts.load(Ordering::SeqCst)
    }

    pub fn client_ids(&self) -> Vec<String> {
        lock(&self.state.client_ids).clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state.published).clone()
    }

    pub fn is_messaging_initialized(&self) -> bool {
        lock(&self.state.events).is_some()
    }

    /// Deliver a session event as the messaging client would
    pub async fn emit(&self, event: SessionEvent) -> bool {
        let sender = lock(&self.state.events).clone();
        match sender {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn emit_connected(&self) -> bool {
        self.emit(SessionEvent::Connected).await
    }

    pub async fn emit_connection_lost(&self, reason: &str) -> bool {
        self.emit(SessionEvent::ConnectionLost(reason.to_string()))
            .await
    }

    /// Deliver an inbound message on the subscription for `filter`
    pub async fn deliver(&self, filter: &str, message: Message) -> bool {
        let sender = lock(&self.state.subscriptions).get(filter).cloned();
        match sender {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        }
    }

    /// Close every subscription channel, as a dropped connection does
    pub fn close_subscriptions(&self) {
        lock(&self.state.subscriptions).clear();
    }

    pub fn has_subscription(&self, filter: &str) -> bool {
        lock(&self.state.subscriptions).contains_key(filter)
    }
}

#[async_trait]
impl Session for MockSession {
    async fn initialize_messaging(
        &self,
        client_id: &str,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(), PlatformError> {
        if self.state.fail_init.load(Ordering::SeqCst) {
            return Err(PlatformError::InvalidAddress(
                "mock session initialization failure".to_string(),
            ));
        }

        lock(&self.state.client_ids).push(client_id.to_string());
        if self.state.auto_connect.load(Ordering::SeqCst) {
            let _ = events.send(SessionEvent::Connected);
        }
        *lock(&self.state.events) = Some(events);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        _qos: QoS,
    ) -> Result<mpsc::Receiver<Message>, PlatformError> {
        self.state.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.state.subscribe_errors).pop_front() {
            return Err(err);
        }

        let (tx, rx) = mpsc::channel(MOCK_CHANNEL_BUFFER);
        lock(&self.state.subscriptions).insert(topic.to_string(), tx);
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: Bytes, _qos: QoS) -> Result<(), PlatformError> {
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(PlatformError::NotConnected);
        }
        lock(&self.state.published).push((topic.to_string(), payload));
        Ok(())
    }

    async fn publish_with_ack(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<DeliveryToken, PlatformError> {
        self.publish(topic, payload, qos).await?;
        Ok(DeliveryToken::completed(Ok(())))
    }

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Row>, PlatformError> {
        lock(&self.state.queries).push((
            collection.to_string(),
            field.to_string(),
            value.to_string(),
        ));

        let failing = self
            .state
            .query_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PlatformError::Transport("mock query failure".to_string()));
        }
        Ok(lock(&self.state.query_rows).clone())
    }
}
