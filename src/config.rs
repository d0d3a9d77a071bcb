//! Client-wide configuration, with documented defaults for every tunable.

use std::time::Duration;

/// Configuration for a [`crate::client::ConfigClient`].
///
/// A plain struct with a `Default` impl carrying every documented default;
/// no builder crate.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Control-plane endpoint. In address-server mode, `host[:port]` of the
    /// address server; otherwise `host[:port]` of the control plane directly.
    pub endpoint: String,

    /// Tenant (namespace) this client operates in. Used as the default for
    /// any [`crate::types::Key`] built with [`crate::types::Key::simple`]'s
    /// sibling constructors and as the scope for [`crate::client::ConfigClient::list_all`].
    pub tenant: String,

    /// Whether `endpoint` points at an address server that resolves a set of
    /// control-plane hosts, re-resolved every 30s.
    pub address_server_enabled: bool,

    /// Use `https://` for all outbound requests.
    pub tls_enabled: bool,

    /// Sign every outbound request with the configured credential.
    pub auth_enabled: bool,

    /// Default per-request timeout when the caller doesn't specify one.
    pub default_timeout: Duration,

    /// Long-poll hold time requested of the server.
    pub pulling_timeout: Duration,

    /// Number of subscriptions per poller shard before rolling to the next shard.
    pub pulling_config_size: usize,

    /// Size of the fixed callback-dispatch worker pool.
    pub callback_thread_num: usize,

    /// Read-only overlay directory, consulted before any network fetch.
    pub failover_base: std::path::PathBuf,

    /// Writable local cache directory, populated by every successful fetch.
    pub snapshot_base: std::path::PathBuf,

    /// Sent as the `appName` form field on publish/remove.
    pub app_name: String,

    /// If true, `get` never falls back to the snapshot cache on transport failure.
    pub no_snapshot: bool,

    /// Enable transparent KMS envelope encryption for `cipher-` prefixed keys.
    pub kms_enabled: bool,

    pub region_id: Option<String>,
    pub kms_ak: Option<String>,
    pub kms_secret: Option<String>,
    pub key_id: Option<String>,

    /// RAM role to assume when sourcing credentials from the STS oracle via
    /// [`crate::credential::RamCredentialProvider`], instead of a static
    /// [`crate::types::Credential`]. `None` means static credentials.
    pub ram_role_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            tenant: crate::types::DEFAULT_TENANT.to_string(),
            address_server_enabled: true,
            tls_enabled: false,
            auth_enabled: true,
            default_timeout: Duration::from_secs(3),
            pulling_timeout: Duration::from_secs(30),
            pulling_config_size: 3000,
            callback_thread_num: 10,
            failover_base: std::path::PathBuf::from("/tmp/acm/failover"),
            snapshot_base: std::path::PathBuf::from("/tmp/acm/snapshot"),
            app_name: "ACM-SDK".to_string(),
            no_snapshot: false,
            kms_enabled: false,
            region_id: None,
            kms_ak: None,
            kms_secret: None,
            key_id: None,
            ram_role_name: None,
        }
    }
}

/// Cadence at which the server pool re-runs address-server discovery.
pub const ADDRESS_SERVER_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Extra slack added to the HTTP request timeout for a long-poll call, on
/// top of the requested `pulling_timeout`.
pub const LONG_POLL_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// Initial backoff for a poller shard after a transient failure.
pub const POLLER_BACKOFF_INITIAL: Duration = Duration::from_secs(1);

/// Backoff ceiling for a poller shard.
pub const POLLER_BACKOFF_MAX: Duration = Duration::from_secs(60);
