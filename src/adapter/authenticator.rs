//! Exchanges credentials for an authenticated platform session
//!
//! Device credentials are retried forever at a fixed delay since a device
//! password becomes usable again once the network recovers. A service account
//! gets exactly one attempt: a bad account or token cannot heal by waiting.

use crate::adapter::credentials::Credentials;
use crate::error::{AdapterError, AdapterResult};
use crate::platform::{Platform, PlatformAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Instrument};

pub struct Authenticator<P: Platform> {
    platform: Arc<P>,
    retry_delay: Duration,
}

impl<P: Platform> Authenticator<P> {
    pub fn new(platform: Arc<P>, retry_delay: Duration) -> Self {
        Self {
            platform,
            retry_delay,
        }
    }

    /// Authenticate, returning the session all later stages use
    ///
    /// Only fails for service accounts; the device path blocks until the
    /// platform accepts the credentials.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
        addrs: &PlatformAddrs,
    ) -> AdapterResult<P::Session> {
        match credentials {
            Credentials::ServiceAccount { account_id, token } => {
                self.authenticate_service_account(account_id, token, addrs)
                    .instrument(crate::adapter_span!(
                        stage = "authenticate",
                        identity = "service_account"
                    ))
                    .await
            }
            Credentials::Device { name, active_key } => Ok(self
                .authenticate_device(name, active_key, addrs)
                .instrument(crate::adapter_span!(stage = "authenticate", identity = "device"))
                .await),
        }
    }

    async fn authenticate_service_account(
        &self,
        account_id: &str,
        token: &str,
        addrs: &PlatformAddrs,
    ) -> AdapterResult<P::Session> {
        info!("Authenticating to platform with device service account {}", account_id);
        self.platform
            .authenticate_service_account(account_id, token, addrs)
            .await
            .map_err(|source| AdapterError::ServiceAccountAuth {
                account_id: account_id.to_string(),
                source,
            })
    }

    async fn authenticate_device(
        &self,
        name: &str,
        active_key: &str,
        addrs: &PlatformAddrs,
    ) -> P::Session {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            info!("Authenticating to platform as device {} (attempt {})", name, attempt);

            match self
                .platform
                .authenticate_device(name, active_key, addrs)
                .await
            {
                Ok(session) => {
                    info!("Device {} authenticated", name);
                    return session;
                }
                Err(e) => {
                    error!(
                        "Failed to authenticate device {}: {}. Retrying in {:?}",
                        name, e, self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}
