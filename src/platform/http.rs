//! REST half of the platform client
//!
//! Device authentication and collection queries over the platform's HTTP API.

use super::{PlatformAddrs, PlatformError, Row};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const SYSTEM_KEY_HEADER: &str = "ClearBlade-SystemKey";
pub const SYSTEM_SECRET_HEADER: &str = "ClearBlade-SystemSecret";
pub const DEVICE_TOKEN_HEADER: &str = "ClearBlade-DeviceToken";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct DeviceAuthResponse {
    #[serde(rename = "deviceToken")]
    device_token: String,
}

#[derive(Debug, Deserialize)]
struct CollectionPage {
    #[serde(rename = "DATA", default)]
    data: Option<Vec<Row>>,
}

/// HTTP client bound to one platform system
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    addrs: PlatformAddrs,
}

impl RestClient {
    pub fn new(addrs: PlatformAddrs) -> Result<Self, PlatformError> {
        // Fail early on a platform URL we could never reach
        endpoint(&addrs.platform_url, &[])?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { http, addrs })
    }

    pub fn addrs(&self) -> &PlatformAddrs {
        &self.addrs
    }

    /// Exchange a device name and active key for a device token
    pub async fn authenticate_device(
        &self,
        name: &str,
        active_key: &str,
    ) -> Result<String, PlatformError> {
        let url = endpoint(
            &self.addrs.platform_url,
            &["api", "v", "2", "devices", &self.addrs.system_key, "auth"],
        )?;
        debug!("Authenticating device {} against {}", name, url);

        let response = self
            .http
            .post(url)
            .header(SYSTEM_KEY_HEADER, &self.addrs.system_key)
            .header(SYSTEM_SECRET_HEADER, &self.addrs.system_secret)
            .json(&json!({ "deviceName": name, "activeKey": active_key }))
            .send()
            .await?;

        let auth: DeviceAuthResponse = check_status(response).await?.json().await?;
        if auth.device_token.is_empty() {
            return Err(PlatformError::AuthenticationFailed(
                "platform returned an empty device token".to_string(),
            ));
        }
        Ok(auth.device_token)
    }

    /// Fetch all rows of `collection` whose `field` equals `value`
    pub async fn query_by_field(
        &self,
        token: &str,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Row>, PlatformError> {
        let url = endpoint(
            &self.addrs.platform_url,
            &["api", "v", "1", "collection", &self.addrs.system_key, collection],
        )?;
        let query = Self::equality_query(field, value);
        debug!("Querying collection {} with {}", collection, query);

        let response = self
            .http
            .get(url)
            .header(DEVICE_TOKEN_HEADER, token)
            .query(&[("query", query.to_string())])
            .send()
            .await?;

        let page: CollectionPage = check_status(response).await?.json().await?;
        Ok(page.data.unwrap_or_default())
    }

    /// Build the platform's single-filter equality query (pure function)
    pub fn equality_query(field: &str, value: &str) -> Value {
        json!({ "FILTERS": [[{ "EQ": [{ field: value }] }]] })
    }
}

/// Check that `base` is a usable platform REST address
pub fn parse_platform_url(base: &str) -> Result<Url, PlatformError> {
    endpoint(base, &[])
}

/// Append path segments to a base URL
fn endpoint(base: &str, segments: &[&str]) -> Result<Url, PlatformError> {
    let invalid = || PlatformError::InvalidAddress(base.to_string());
    let mut url = Url::parse(base).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Map HTTP failure statuses onto platform error kinds
async fn check_status(response: Response) -> Result<Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => PlatformError::AuthenticationFailed(body),
        StatusCode::FORBIDDEN => PlatformError::PermissionDenied(body),
        other => PlatformError::UnexpectedResponse(format!("{other}: {body}")),
    })
}
