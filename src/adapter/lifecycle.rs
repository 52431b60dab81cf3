//! Adapter startup sequence
//!
//! authenticate -> fetch config -> (caller) connect. Each stage moves the
//! shared [`StateTracker`] forward; nothing touches the platform before
//! authentication produced a session.

use crate::adapter::authenticator::Authenticator;
use crate::adapter::config_fetcher::{AdapterConfig, ConfigFetcher};
use crate::adapter::connection::{ConnectOptions, ConnectionManager};
use crate::adapter::credentials::CredentialStore;
use crate::adapter::dispatcher::MessageHandler;
use crate::adapter::state::{ConnectionState, StateTracker};
use crate::config::{AdapterArgs, RetryPolicy, DEFAULT_ADAPTER_CONFIG_COLLECTION};
use crate::error::{AdapterError, AdapterResult};
use crate::platform::Platform;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Settings for [`Adapter::initialize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterOptions {
    pub config_collection: String,
    pub fatal_on_disconnect: bool,
    pub handshake_timeout: Option<std::time::Duration>,
    pub retry: RetryPolicy,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            config_collection: DEFAULT_ADAPTER_CONFIG_COLLECTION.to_string(),
            fatal_on_disconnect: false,
            handshake_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl AdapterOptions {
    pub fn from_args(args: &AdapterArgs) -> Self {
        Self {
            config_collection: args.adapter_config_collection.clone(),
            fatal_on_disconnect: args.fatal_on_disconnect,
            handshake_timeout: args.handshake_timeout(),
            retry: RetryPolicy::default(),
        }
    }
}

/// An authenticated, configured adapter ready to connect
pub struct Adapter<P: Platform> {
    store: CredentialStore,
    config: AdapterConfig,
    state: StateTracker,
    connection: ConnectionManager<P::Session>,
}

impl<P: Platform> Adapter<P> {
    /// Authenticate and fetch this adapter's configuration
    ///
    /// Fails only for a rejected service account; device authentication and
    /// configuration queries retry until they succeed.
    pub async fn initialize(
        platform: Arc<P>,
        store: CredentialStore,
        options: AdapterOptions,
    ) -> AdapterResult<Self> {
        let state = StateTracker::new();

        state.transition(ConnectionState::Authenticating);
        let authenticator = Authenticator::new(platform, options.retry.auth_retry_delay);
        let session = match authenticator
            .authenticate(store.credentials(), store.addrs())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                state.transition(ConnectionState::Failed);
                return Err(e);
            }
        };

        state.transition(ConnectionState::ConfigFetching);
        let fetcher = ConfigFetcher::new(
            options.config_collection.clone(),
            options.retry.config_retry_delay,
        );
        let config = fetcher
            .fetch(&session, store.config_lookup_name(), store.device_name())
            .await;
        info!(
            topic_root = %config.topic_root,
            "Adapter configuration loaded"
        );

        let connection = ConnectionManager::new(
            session,
            &store,
            ConnectOptions {
                fatal_on_disconnect: options.fatal_on_disconnect,
                handshake_timeout: options.handshake_timeout,
                subscribe_retry_delay: options.retry.subscribe_retry_delay,
            },
            state.clone(),
        );

        Ok(Self {
            store,
            config,
            state,
            connection,
        })
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Watch lifecycle state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn connection(&self) -> &ConnectionManager<P::Session> {
        &self.connection
    }

    /// Connect, subscribing `topic` with `handler` after each handshake
    pub async fn connect(&self, topic: &str, handler: MessageHandler) -> AdapterResult<()> {
        self.connection.connect(Some(topic), Some(handler)).await
    }

    /// Connect for publishing only
    pub async fn connect_without_subscription(&self) -> AdapterResult<()> {
        self.connection.connect(None, None).await
    }

    /// Terminal errors raised after startup; yields the receiver once
    pub fn terminal_errors(&self) -> Option<mpsc::UnboundedReceiver<AdapterError>> {
        self.connection.terminal_errors()
    }
}
