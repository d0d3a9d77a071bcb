//! Server-address pool: discovery via an optional address server, and
//! rotation on failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, ADDRESS_SERVER_REFRESH_INTERVAL};
use crate::error::{ClientError, Result};
use crate::types::ServerEntry;

struct Inner {
    servers: Vec<ServerEntry>,
    current: usize,
    last_failure: Option<(usize, Instant)>,
}

/// Resolves and rotates the list of control-plane hosts.
///
/// Cheap to clone: all state lives behind an `Arc<Mutex<..>>`, matching the
/// `states: Mutex<HashMap<..>>` pattern used for the router-style component
/// elsewhere in this codebase.
#[derive(Clone)]
pub struct ServerPool {
    inner: Arc<Mutex<Inner>>,
    http: reqwest::Client,
    tls_enabled: bool,
    discovery_endpoint: Option<(String, u16)>,
}

impl ServerPool {
    /// Build a pool from client configuration. If address-server mode is
    /// enabled, discovery runs lazily on first use (see [`ServerPool::ensure_initialized`])
    /// and is refreshed every 30s by [`ServerPool::spawn_refresher`].
    pub fn new(config: &ClientConfig, http: reqwest::Client) -> Self {
        if config.address_server_enabled {
            let (host, port) = split_host_port(&config.endpoint, 8080);
            Self {
                inner: Arc::new(Mutex::new(Inner {
                    servers: Vec::new(),
                    current: 0,
                    last_failure: None,
                })),
                http,
                tls_enabled: config.tls_enabled,
                discovery_endpoint: Some((host, port)),
            }
        } else {
            let (host, port) = split_host_port(&config.endpoint, 8080);
            let entry = ServerEntry {
                host,
                port,
                tls: config.tls_enabled,
            };
            Self::with_static_servers(vec![entry], http)
        }
    }

    /// Build a pool from a caller-supplied, already-known list of hosts —
    /// no address-server discovery is ever attempted.
    pub fn with_static_servers(servers: Vec<ServerEntry>, http: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                servers,
                current: 0,
                last_failure: None,
            })),
            http,
            tls_enabled: false,
            discovery_endpoint: None,
        }
    }

    /// Run address-server discovery once and replace the server list if the
    /// response was non-empty.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Result<()> {
        let Some((host, port)) = &self.discovery_endpoint else {
            return Ok(());
        };

        let url = format!("http://{host}:{port}/diamond-server/diamond");
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "address server discovery failed");
            return Ok(());
        }
        let body = resp.text().await?;

        let servers = parse_discovery_hosts(&body, 8080, self.tls_enabled);

        if servers.is_empty() {
            tracing::debug!("address server discovery returned zero hosts; retaining previous list");
            return Ok(());
        }

        let mut inner = self.inner.lock();
        inner.servers = servers;
        inner.current = 0;
        Ok(())
    }

    /// Discover the server list if it hasn't been populated yet.
    pub async fn ensure_initialized(&self) -> Result<()> {
        let needs_init = {
            let inner = self.inner.lock();
            inner.servers.is_empty()
        };
        if needs_init && self.discovery_endpoint.is_some() {
            self.refresh().await?;
        }
        Ok(())
    }

    /// Spawn the periodic discovery refresh task. Cancel `token` to stop it.
    pub fn spawn_refresher(&self, token: CancellationToken) -> Option<tokio::task::JoinHandle<()>> {
        self.discovery_endpoint.as_ref()?;
        let pool = self.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(ADDRESS_SERVER_REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = pool.refresh().await {
                            tracing::warn!(error = %e, "address server refresh failed");
                        }
                    }
                    _ = token.cancelled() => {
                        tracing::debug!("address server refresher stopping");
                        break;
                    }
                }
            }
        }))
    }

    /// The entry at the current index.
    pub fn current(&self) -> Result<ServerEntry> {
        let inner = self.inner.lock();
        inner
            .servers
            .get(inner.current)
            .cloned()
            .ok_or(ClientError::NoServerAvailable)
    }

    /// Advance the current index by one (mod length) and record the failure
    /// for diagnostics.
    pub fn rotate(&self) {
        let mut inner = self.inner.lock();
        if inner.servers.is_empty() {
            return;
        }
        let failed = inner.current;
        let failed_host = inner.servers[failed].host.clone();
        inner.current = (inner.current + 1) % inner.servers.len();
        inner.last_failure = Some((failed, Instant::now()));
        tracing::debug!(host = %failed_host, next = inner.current, "rotating to next server");
    }

    /// The index and time of the last server that failed, if any.
    pub fn last_failure(&self) -> Option<(usize, Instant)> {
        self.inner.lock().last_failure
    }

    /// Number of distinct servers currently in the pool.
    pub fn len(&self) -> usize {
        self.inner.lock().servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn split_host_port(endpoint: &str, default_port: u16) -> (String, u16) {
    match endpoint.rsplit_once(':') {
        Some((host, port)) => port
            .parse()
            .map(|p| (host.to_string(), p))
            .unwrap_or_else(|_| (endpoint.to_string(), default_port)),
        None => (endpoint.to_string(), default_port),
    }
}

/// Parse an address-server discovery response: one host per line, blank
/// lines and surrounding whitespace ignored, every entry sharing the same
/// data port and TLS setting.
fn parse_discovery_hosts(body: &str, port: u16, tls: bool) -> Vec<ServerEntry> {
    body.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|host| ServerEntry {
            host: host.to_string(),
            port,
            tls,
        })
        .collect()
}
