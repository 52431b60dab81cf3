//! Edge Adapter - connectivity core for platform edge adapters
//!
//! An adapter process authenticates to the platform, loads its own
//! configuration row, and then keeps a messaging session alive for as long as
//! it runs.
//!
//! # Overview
//!
//! - Device or service-account authentication, with device retries
//! - Configuration lookup with defaults when no row exists
//! - MQTT session with a blocking handshake and a disconnect policy
//! - Topic subscription with permission-failure detection
//! - Background dispatch of inbound messages to a handler
//! - Status publishing
//!
//! Conditions that must stop the process are returned as terminal
//! [`AdapterError`]s; the application decides how to exit.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use edge_adapter::adapter::{Adapter, AdapterOptions, ConnectionStatus, MessageHandler};
//! use edge_adapter::platform::RemotePlatform;
//! use edge_adapter::AdapterArgs;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let args = AdapterArgs {
//!     system_key: "system-key".to_string(),
//!     device_name: "pump-7".to_string(),
//!     active_key: Some("device-password".to_string()),
//!     ..Default::default()
//! };
//! let store = args.credential_store()?;
//! let adapter = Adapter::initialize(
//!     Arc::new(RemotePlatform::new()),
//!     store,
//!     AdapterOptions::from_args(&args),
//! )
//! .await?;
//!
//! let handler: MessageHandler = Arc::new(|message| {
//!     println!("{}: {}", message.topic, message.payload_lossy());
//! });
//! let root = adapter.config().topic_root.clone();
//! adapter.connect(&format!("{root}/command/#"), handler).await?;
//! adapter
//!     .connection()
//!     .publish_status(&format!("{root}/status"), &ConnectionStatus::running())
//!     .await?;
//! # Ok::<(), edge_adapter::AdapterError>(())
//! # }).unwrap();
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod observability;
pub mod platform;
pub mod testing;

pub use adapter::{Adapter, AdapterConfig, AdapterOptions, ConnectionState, ConnectionStatus};
pub use config::{AdapterArgs, ConfigError, RetryPolicy};
pub use error::{AdapterError, AdapterResult};
pub use platform::{Message, Platform, PlatformError, Session};
