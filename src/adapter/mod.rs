//! Connectivity lifecycle for an edge adapter
//!
//! # Architecture
//!
//! - [`authenticator`] - credentials to session, with the device retry loop
//! - [`config_fetcher`] - the adapter's configuration row, with defaults
//! - [`connection`] - messaging session, handshake wait and disconnect policy
//! - [`subscription`] - topic subscription and permission-failure detection
//! - [`dispatcher`] - drains inbound messages into the user's handler
//! - [`lifecycle`] - ties the stages together behind [`Adapter`]

pub mod authenticator;
pub mod config_fetcher;
pub mod connection;
pub mod credentials;
pub mod dispatcher;
pub mod lifecycle;
pub mod state;
pub mod status;
pub mod subscription;

pub use authenticator::Authenticator;
pub use config_fetcher::{AdapterConfig, ConfigFetcher};
pub use connection::{
    ConnectOptions, ConnectionManager, DisconnectAction, DisconnectPolicy, HandshakeSignal,
};
pub use credentials::{CredentialStore, Credentials, IdentityKind};
pub use dispatcher::{MessageDispatcher, MessageHandler};
pub use lifecycle::{Adapter, AdapterOptions};
pub use state::{ConnectionState, StateTracker};
pub use status::ConnectionStatus;
pub use subscription::{SubscribeFailure, Subscription, SubscriptionManager};
