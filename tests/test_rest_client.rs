//! Integration tests for the platform REST client
//!
//! Tests the HTTP half of the concrete platform client against a mock server:
//! - Device authentication request shape and token extraction
//! - Collection queries with the equality filter
//! - Mapping of HTTP failures onto platform error kinds

use edge_adapter::platform::http::{RestClient, DEVICE_TOKEN_HEADER, SYSTEM_KEY_HEADER};
use edge_adapter::platform::{Platform, PlatformAddrs, PlatformError, RemotePlatform, Session};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ADAPTER_QUERY: &str = r#"{"FILTERS":[[{"EQ":[{"adapter_name":"pump-7"}]}]]}"#;

fn test_addrs(platform_url: &str) -> PlatformAddrs {
    PlatformAddrs {
        platform_url: platform_url.to_string(),
        messaging_url: "localhost:1883".to_string(),
        system_key: "sys-key".to_string(),
        system_secret: "sys-secret".to_string(),
    }
}

#[tokio::test]
async fn test_device_auth_returns_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v/2/devices/sys-key/auth"))
        .and(header(SYSTEM_KEY_HEADER, "sys-key"))
        .and(body_json(json!({"deviceName": "pump-7", "activeKey": "secret"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"deviceToken": "dev-token"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = RestClient::new(test_addrs(&mock_server.uri())).unwrap();
    let token = client.authenticate_device("pump-7", "secret").await.unwrap();

    assert_eq!(token, "dev-token");
}

#[tokio::test]
async fn test_device_auth_rejected_maps_to_authentication_failed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v/2/devices/sys-key/auth"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
        .mount(&mock_server)
        .await;

    let client = RestClient::new(test_addrs(&mock_server.uri())).unwrap();
    let result = client.authenticate_device("pump-7", "wrong").await;

    match result {
        Err(PlatformError::AuthenticationFailed(body)) => {
            assert!(body.contains("invalid credentials"))
        }
        other => panic!("expected authentication failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_query_sends_equality_filter_and_reads_rows() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v/1/collection/sys-key/adapter_config"))
        .and(header(DEVICE_TOKEN_HEADER, "dev-token"))
        .and(query_param("query", ADAPTER_QUERY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "DATA": [{"adapter_name": "pump-7", "topic_root": "site/pumps"}],
            "TOTAL": 1
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = RestClient::new(test_addrs(&mock_server.uri())).unwrap();
    let rows = client
        .query_by_field("dev-token", "adapter_config", "adapter_name", "pump-7")
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["topic_root"], "site/pumps");
}

#[tokio::test]
async fn test_query_without_data_returns_no_rows() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v/1/collection/sys-key/adapter_config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"TOTAL": 0})))
        .mount(&mock_server)
        .await;

    let client = RestClient::new(test_addrs(&mock_server.uri())).unwrap();
    let rows = client
        .query_by_field("dev-token", "adapter_config", "adapter_name", "pump-7")
        .await
        .unwrap();

    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_query_forbidden_maps_to_permission_denied() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v/1/collection/sys-key/adapter_config"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let client = RestClient::new(test_addrs(&mock_server.uri())).unwrap();
    let result = client
        .query_by_field("dev-token", "adapter_config", "adapter_name", "pump-7")
        .await;

    assert!(matches!(result, Err(PlatformError::PermissionDenied(_))));
}

#[tokio::test]
async fn test_server_error_is_unexpected_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v/1/collection/sys-key/adapter_config"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&mock_server)
        .await;

    let client = RestClient::new(test_addrs(&mock_server.uri())).unwrap();
    let result = client
        .query_by_field("dev-token", "adapter_config", "adapter_name", "pump-7")
        .await;

    match result {
        Err(PlatformError::UnexpectedResponse(text)) => assert!(text.contains("boom")),
        other => panic!("expected unexpected response, got {other:?}"),
    }
}

#[tokio::test]
async fn test_remote_platform_device_session_queries_with_device_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v/2/devices/sys-key/auth"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"deviceToken": "dev-token"})))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v/1/collection/sys-key/adapter_config"))
        .and(header(DEVICE_TOKEN_HEADER, "dev-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"DATA": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let platform = RemotePlatform::new();
    let session = platform
        .authenticate_device("pump-7", "secret", &test_addrs(&mock_server.uri()))
        .await
        .unwrap();
    let rows = session
        .query_by_field("adapter_config", "adapter_name", "pump-7")
        .await
        .unwrap();

    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_remote_platform_service_account_uses_supplied_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v/1/collection/sys-key/adapter_config"))
        .and(header(DEVICE_TOKEN_HEADER, "svc-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"DATA": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let platform = RemotePlatform::new();
    let session = platform
        .authenticate_service_account("svc-pumps", "svc-token", &test_addrs(&mock_server.uri()))
        .await
        .unwrap();

    assert!(session
        .query_by_field("adapter_config", "adapter_name", "svc-pumps")
        .await
        .is_ok());
}
