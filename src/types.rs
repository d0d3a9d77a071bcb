//! Core data types shared across the crate: keys, server entries, and credentials.

use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";
pub const DEFAULT_TENANT: &str = "DEFAULT_TENANT";

/// The three-part identity of a config item: `(tenant, group, dataId)`.
///
/// Two keys are equal iff all three components match byte-for-byte. `group`
/// and `tenant` default to the sentinel values above when omitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub tenant: String,
    pub group: String,
    pub data_id: String,
}

impl Key {
    pub fn new(data_id: impl Into<String>, group: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            data_id: data_id.into(),
            group: group.into(),
            tenant: tenant.into(),
        }
    }

    /// Build a key using the default group and tenant sentinels.
    pub fn simple(data_id: impl Into<String>, group: impl Into<String>) -> Self {
        Self::new(data_id, group, DEFAULT_TENANT)
    }

    /// A key's `dataId` is *ciphered* iff it starts with the cipher prefix.
    pub fn is_ciphered(&self) -> bool {
        self.data_id.starts_with(super::kms::CIPHER_PREFIX)
    }
}

/// Uninterpreted content bytes. The empty string is valid and distinct from "absent".
pub type Content = String;

/// One control-plane host in the server pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl ServerEntry {
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Short-lived or static request-signing credential.
///
/// Sourced either from static configuration (`expiry = None`, never refreshed)
/// or from the RAM/STS oracle (refreshed by the caller before `expiry`).
#[derive(Debug, Clone)]
pub struct Credential {
    pub ak: String,
    pub sk: String,
    pub security_token: Option<String>,
    pub expiry: Option<chrono::DateTime<chrono::Utc>>,
}

impl Credential {
    pub fn static_credential(ak: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            ak: ak.into(),
            sk: sk.into(),
            security_token: None,
            expiry: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expiry {
            Some(exp) => exp <= chrono::Utc::now(),
            None => false,
        }
    }
}

/// Opaque handle identifying a single registered callback.
///
/// `remove_watcher` matches by handle equality rather than function equality,
/// sidestepping the need for closures to be comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(u64);

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

impl CallbackHandle {
    pub(crate) fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}
