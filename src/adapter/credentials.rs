//! Resolved identity of this adapter process
//!
//! Built once at startup from validated arguments and never mutated.

use crate::platform::PlatformAddrs;
use std::fmt;

/// The identity used to authenticate; exactly one variant is active
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Device { name: String, active_key: String },
    ServiceAccount { account_id: String, token: String },
}

/// Which kind of identity is in use, without the secrets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Device,
    ServiceAccount,
}

impl Credentials {
    pub fn kind(&self) -> IdentityKind {
        match self {
            Credentials::Device { .. } => IdentityKind::Device,
            Credentials::ServiceAccount { .. } => IdentityKind::ServiceAccount,
        }
    }
}

// Secrets never reach the logs through Debug
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Device { name, .. } => f
                .debug_struct("Device")
                .field("name", name)
                .field("active_key", &"***")
                .finish(),
            Credentials::ServiceAccount { account_id, .. } => f
                .debug_struct("ServiceAccount")
                .field("account_id", account_id)
                .field("token", &"***")
                .finish(),
        }
    }
}

/// Credentials plus the backend they are valid for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStore {
    device_name: String,
    credentials: Credentials,
    addrs: PlatformAddrs,
}

impl CredentialStore {
    pub fn new(
        device_name: impl Into<String>,
        credentials: Credentials,
        addrs: PlatformAddrs,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            credentials,
            addrs,
        }
    }

    /// Name of the device this adapter runs as
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn identity(&self) -> IdentityKind {
        self.credentials.kind()
    }

    pub fn addrs(&self) -> &PlatformAddrs {
        &self.addrs
    }

    /// Key used to look up this adapter's configuration row
    ///
    /// Service accounts are looked up by account id, devices by name.
    pub fn config_lookup_name(&self) -> &str {
        match &self.credentials {
            Credentials::ServiceAccount { account_id, .. } => account_id,
            Credentials::Device { .. } => &self.device_name,
        }
    }
}
