//! RAM/STS credential refresh.
//!
//! The RAM role service itself is never modeled directly: this module only
//! captures its interface as an opaque `FetchCredential() -> (ak, sk, token,
//! expiry)` oracle, exactly as the KMS service is modeled as an opaque
//! `encrypt`/`decrypt` oracle in [`crate::kms`]. Production embedders supply
//! their own [`CredentialOracle`] backed by whatever RAM/STS client their
//! deployment uses; this crate only owns the refresh-before-expiry
//! scheduling around it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::signer::CredentialProvider;
use crate::types::Credential;

/// Minimum time-to-live left on a cached credential before
/// [`RamCredentialProvider`]'s background task proactively refreshes it.
const REFRESH_SLACK: chrono::Duration = chrono::Duration::seconds(30);

/// How often the background task checks whether a refresh is due, when the
/// oracle hasn't supplied an expiry to schedule against directly.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// The opaque RAM/STS oracle: `FetchCredential() -> (ak, sk, token, expiry)`.
#[async_trait]
pub trait CredentialOracle: Send + Sync {
    async fn fetch(&self) -> Result<Credential>;
}

/// A [`CredentialProvider`] backed by a [`CredentialOracle`], refreshed
/// before its cached credential expires.
///
/// Grounded in [`crate::server_pool::ServerPool`]'s own lazy-init-then-
/// periodic-refresh shape: a cached value behind a `parking_lot::Mutex`,
/// read synchronously by [`CredentialProvider::current`], kept fresh by a
/// `tokio::spawn`ed background task cancellable via a [`CancellationToken`].
#[derive(Clone)]
pub struct RamCredentialProvider {
    oracle: Arc<dyn CredentialOracle>,
    cached: Arc<Mutex<Credential>>,
}

impl RamCredentialProvider {
    /// Fetch an initial credential from `oracle` and return a provider ready
    /// for use. Call [`Self::spawn_refresher`] to keep it current in the
    /// background; without it, the cached credential is only ever the one
    /// fetched here.
    pub async fn new(oracle: Arc<dyn CredentialOracle>) -> Result<Self> {
        let initial = oracle.fetch().await?;
        Ok(Self {
            oracle,
            cached: Arc::new(Mutex::new(initial)),
        })
    }

    /// Spawn the background refresh loop. Cancel `token` to stop it.
    pub fn spawn_refresher(&self, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let oracle = self.oracle.clone();
        let cached = self.cached.clone();
        tokio::spawn(async move {
            loop {
                let sleep_for = {
                    let current = cached.lock().clone();
                    match current.expiry {
                        Some(expiry) => {
                            let due_at = expiry - REFRESH_SLACK;
                            let remaining = due_at - chrono::Utc::now();
                            remaining.to_std().unwrap_or(Duration::ZERO)
                        }
                        // Static credential: nothing to refresh, but keep the
                        // task alive so it still exits promptly on shutdown.
                        None => POLL_INTERVAL,
                    }
                };

                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = token.cancelled() => {
                        tracing::debug!("credential refresher stopping");
                        break;
                    }
                }

                if token.is_cancelled() {
                    break;
                }

                match oracle.fetch().await {
                    Ok(fresh) => {
                        *cached.lock() = fresh;
                        tracing::debug!("refreshed RAM/STS credential");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "RAM/STS credential refresh failed, retaining cached credential");
                    }
                }
            }
        })
    }
}

impl CredentialProvider for RamCredentialProvider {
    fn current(&self) -> Credential {
        self.cached.lock().clone()
    }
}

/// Scripted [`CredentialOracle`] for tests: returns queued credentials in
/// order, repeating the last one once the queue is drained.
#[derive(Default)]
pub struct MockCredentialOracle {
    responses: Mutex<Vec<Credential>>,
}

impl MockCredentialOracle {
    pub fn new(responses: Vec<Credential>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }
}

#[async_trait]
impl CredentialOracle for MockCredentialOracle {
    async fn fetch(&self) -> Result<Credential> {
        let mut responses = self.responses.lock();
        if responses.len() > 1 {
            Ok(responses.remove(0))
        } else {
            Ok(responses.first().cloned().expect("MockCredentialOracle needs at least one scripted response"))
        }
    }
}
