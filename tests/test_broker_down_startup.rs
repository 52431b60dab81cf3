//! Integration tests for adapter startup when the broker is down
//!
//! The messaging session keeps retrying in the background; without a
//! handshake `connect` never returns unless a handshake timeout is set.

use edge_adapter::adapter::{
    ConnectOptions, ConnectionManager, ConnectionState, CredentialStore, Credentials, StateTracker,
};
use edge_adapter::error::AdapterError;
use edge_adapter::platform::{Platform, PlatformAddrs, RemotePlatform, RemoteSession};
use std::time::Duration;
use tokio::time::timeout;

fn unreachable_broker_store() -> CredentialStore {
    CredentialStore::new(
        "pump-7",
        Credentials::ServiceAccount {
            account_id: "svc-pumps".to_string(),
            token: "svc-token".to_string(),
        },
        PlatformAddrs {
            platform_url: "http://localhost:9000".to_string(),
            // Non-existent broker
            messaging_url: "tcp://127.0.0.1:9".to_string(),
            system_key: "sys-key".to_string(),
            system_secret: String::new(),
        },
    )
}

async fn manager(options: ConnectOptions) -> ConnectionManager<RemoteSession> {
    let store = unreachable_broker_store();
    let session = RemotePlatform::new()
        .authenticate_service_account("svc-pumps", "svc-token", store.addrs())
        .await
        .expect("service account session needs no network");
    ConnectionManager::new(session, &store, options, StateTracker::new())
}

#[tokio::test]
async fn test_connect_waits_while_broker_unavailable() {
    // Arrange
    let manager = manager(ConnectOptions::default()).await;

    // Act: no handshake ever arrives
    let result = timeout(Duration::from_secs(2), manager.connect(None, None)).await;

    // Assert: still blocked, still waiting on the handshake
    assert!(result.is_err(), "connect should block without a handshake");
    assert_eq!(manager.state(), ConnectionState::HandshakePending);
}

#[tokio::test]
async fn test_handshake_timeout_reports_terminal_error() {
    let manager = manager(ConnectOptions {
        handshake_timeout: Some(Duration::from_secs(1)),
        ..Default::default()
    })
    .await;

    let err = manager.connect(None, None).await.unwrap_err();

    assert!(matches!(err, AdapterError::HandshakeTimeout { secs: 1 }));
    assert!(err.is_terminal());
    assert_eq!(manager.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_publish_before_handshake_does_not_hang() {
    let manager = manager(ConnectOptions::default()).await;

    // Nothing initialized yet: the session reports it is not connected
    let result = timeout(
        Duration::from_secs(2),
        manager.publish("pump-7/status", &b"{}"[..]),
    )
    .await
    .expect("publish must not block");

    assert!(matches!(result, Err(AdapterError::Publish { .. })));
}
