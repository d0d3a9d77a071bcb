//! Long-poll shard loop.
//!
//! Each shard owns a slice of the watched keys (assigned by
//! [`crate::watcher::WatcherRegistry::shard_keys`]) and holds one
//! long-lived HTTP call against the control plane open for up to
//! `pulling_timeout`, waiting for the server to report that one of them
//! changed. On a reported change it fetches the new content, updates the
//! snapshot cache, and dispatches the registered callbacks.
//!
//! Grounded on the probe scheduler's per-task `tokio::select!` loop with
//! `CancellationToken` elsewhere in this codebase, and on the daemon's
//! exponential-backoff formula (`backoff_ms * backoff_factor^attempt`,
//! capped at `max_backoff_ms`, reset to zero on a successful cycle).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, LONG_POLL_TIMEOUT_SLACK, POLLER_BACKOFF_INITIAL, POLLER_BACKOFF_MAX};
use crate::error::Result;
use crate::http::{ApiRequest, RequestSender};
use crate::server_pool::ServerPool;
use crate::signer::{self, CredentialProvider};
use crate::snapshot::SnapshotStore;
use crate::types::Key;
use crate::watcher::{content_md5, CallbackDispatcher, WatcherRegistry};

const LISTENER_PATH: &str = "/diamond-server/config.co";
const FIELD_SEP: char = '\u{2}';
const RECORD_SEP: char = '\u{1}';

/// Fetches the current content for a single key from the control plane,
/// bypassing the failover overlay and the snapshot fallback so a detected
/// change always yields the fresh server value instead of a stale override.
/// Implemented by [`crate::client::ConfigClient`] so the poller reuses the
/// same remote-fetch machinery instead of its own copy. Returns `None` when
/// the key has been deleted server-side (a 404).
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    async fn fetch(&self, key: &Key) -> Result<Option<String>>;
}

/// Assemble the `Listening-Configs` form field: one record per watched key,
/// fields separated by `\x02`, records separated by `\x01`. The tenant
/// field is included only when non-empty — an empty tenant produces a
/// 3-field record instead of a padded 4-field one.
pub fn build_listening_configs(entries: &[(Key, String)]) -> String {
    let mut out = String::new();
    for (key, md5) in entries {
        out.push_str(&key.data_id);
        out.push(FIELD_SEP);
        out.push_str(&key.group);
        out.push(FIELD_SEP);
        out.push_str(md5);
        if !key.tenant.is_empty() {
            out.push(FIELD_SEP);
            out.push_str(&key.tenant);
        }
        out.push(RECORD_SEP);
    }
    out
}

/// Parse a long-poll response body into the list of keys the server
/// reports as changed.
///
/// The whole body is percent-decoded *before* splitting on `\x01` — not
/// decoded per-field — since a `dataId`/`group`/`tenant` value can itself
/// contain a percent-encoded separator byte, and decoding per-field would
/// unescape it prematurely and corrupt the split.
pub fn parse_changed_keys(body: &str) -> Vec<Key> {
    let decoded = percent_encoding::percent_decode_str(body).decode_utf8_lossy();
    decoded
        .split(RECORD_SEP)
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let mut fields = record.split(FIELD_SEP);
            let data_id = fields.next()?;
            let group = fields.next()?;
            let tenant = fields.next().unwrap_or("");
            Some(Key::new(data_id, group, tenant))
        })
        .collect()
}

/// Context shared by every shard of one [`crate::client::ConfigClient`].
pub struct PollerContext {
    pub registry: WatcherRegistry,
    pub server_pool: ServerPool,
    pub sender: Arc<dyn RequestSender>,
    pub fetcher: Arc<dyn ConfigFetcher>,
    pub dispatcher: CallbackDispatcher,
    pub snapshot: SnapshotStore,
    pub credentials: Arc<dyn CredentialProvider>,
    pub config: ClientConfig,
}

/// One long-poll worker, covering the slice of watched keys assigned to
/// `shard_index`.
pub struct PollerShard {
    shard_index: usize,
    ctx: Arc<PollerContext>,
}

impl PollerShard {
    pub fn new(shard_index: usize, ctx: Arc<PollerContext>) -> Self {
        Self { shard_index, ctx }
    }

    /// Run one long-poll request/response cycle: build the payload for
    /// this shard's current key slice, send it, and act on whatever the
    /// server reports changed. Returns the keys that changed, empty if
    /// this shard had nothing assigned or nothing changed.
    async fn poll_once(&self) -> Result<Vec<Key>> {
        let entries = self.ctx.registry.shard_keys(self.shard_index);
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let payload = build_listening_configs(&entries);
        let credential = self.ctx.credentials.current();
        let timeout = self.ctx.config.pulling_timeout + LONG_POLL_TIMEOUT_SLACK;

        // Signed with the first listener's tenant/group, per the signer's
        // contract for multi-key listener endpoints.
        let (sign_tenant, sign_group) = (entries[0].0.tenant.clone(), entries[0].0.group.clone());

        let mut request = ApiRequest::post(LISTENER_PATH, timeout)
            .with_form("Probe-Modify-Request", payload)
            .with_header("Long-Pulling-Timeout", self.ctx.config.pulling_timeout.as_millis().to_string());

        if self.ctx.config.auth_enabled {
            let headers = signer::build_headers(&credential, &sign_tenant, &sign_group);
            request = request
                .with_header("Spas-AccessKey", headers.access_key)
                .with_header("Timestamp", headers.timestamp)
                .with_header("Spas-Signature", headers.signature);
            if let Some(token) = headers.security_token {
                request = request.with_header("Spas-SecurityToken", token);
            }
        }

        let server = self.ctx.server_pool.current()?;
        let response = self.ctx.sender.send(&server.base_url(), &request).await?;

        if !response.is_success() {
            self.ctx.server_pool.rotate();
            return Err(crate::error::ClientError::HttpError {
                status: response.status,
                body: response.body,
            });
        }

        Ok(parse_changed_keys(&response.body))
    }

    /// Fetch fresh content for each changed key, refresh the snapshot
    /// cache, and dispatch callbacks for keys whose content hash actually
    /// moved.
    async fn handle_changes(&self, changed: Vec<Key>) {
        for key in changed {
            match self.ctx.fetcher.fetch(&key).await {
                Ok(Some(content)) => {
                    let new_md5 = content_md5(&content);
                    if let Err(e) = self.ctx.snapshot.write(&key, &content).await {
                        tracing::warn!(data_id = %key.data_id, error = %e, "failed to refresh snapshot after change notification");
                    }
                    for callback in self.ctx.registry.record_change(&key, new_md5) {
                        self.ctx.dispatcher.dispatch(key.clone(), content.clone(), callback);
                    }
                }
                Ok(None) => {
                    // Key was deleted server-side; fire once with the deletion
                    // sentinel (empty content) and reset last_md5.
                    for callback in self.ctx.registry.force_reset(&key, String::new()) {
                        self.ctx.dispatcher.dispatch(key.clone(), String::new(), callback);
                    }
                }
                Err(e) => {
                    // Leave last_md5 unchanged so the next cycle retries.
                    tracing::warn!(data_id = %key.data_id, error = %e, "failed to fetch changed config");
                }
            }
        }
    }

    /// Run the shard loop until `token` is cancelled. Backs off
    /// exponentially on transport/server failure, resetting to
    /// `POLLER_BACKOFF_INITIAL` after any successful cycle.
    pub async fn run(self, token: CancellationToken) {
        let mut backoff = POLLER_BACKOFF_INITIAL;

        loop {
            if token.is_cancelled() {
                break;
            }

            match self.poll_once().await {
                Ok(changed) => {
                    backoff = POLLER_BACKOFF_INITIAL;
                    if !changed.is_empty() {
                        tracing::debug!(shard = self.shard_index, count = changed.len(), "config change detected");
                    }
                    self.handle_changes(changed).await;
                }
                Err(e) => {
                    tracing::warn!(shard = self.shard_index, error = %e, backoff_ms = backoff.as_millis(), "long-poll cycle failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = token.cancelled() => break,
                    }
                    backoff = next_backoff(backoff);
                    continue;
                }
            }

            if self.ctx.registry.shard_keys(self.shard_index).is_empty() {
                // Nothing assigned to this shard right now; avoid a tight
                // empty-payload loop until the registry grows.
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                    _ = token.cancelled() => break,
                }
            }
        }

        tracing::debug!(shard = self.shard_index, "poller shard stopped");
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(POLLER_BACKOFF_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_listening_configs_omits_empty_tenant() {
        let entries = vec![(Key::new("data1", "GROUP1", ""), "md5-a".to_string())];
        let payload = build_listening_configs(&entries);
        assert_eq!(payload, "data1\u{2}GROUP1\u{2}md5-a\u{1}");
    }

    #[test]
    fn build_listening_configs_includes_tenant_when_present() {
        let entries = vec![(Key::new("data1", "GROUP1", "tenant1"), "md5-a".to_string())];
        let payload = build_listening_configs(&entries);
        assert_eq!(payload, "data1\u{2}GROUP1\u{2}md5-a\u{2}tenant1\u{1}");
    }

    #[test]
    fn build_listening_configs_joins_multiple_records() {
        let entries = vec![
            (Key::new("d1", "g1", ""), "m1".to_string()),
            (Key::new("d2", "g2", "t2"), "m2".to_string()),
        ];
        let payload = build_listening_configs(&entries);
        assert_eq!(payload, "d1\u{2}g1\u{2}m1\u{1}d2\u{2}g2\u{2}m2\u{2}t2\u{1}");
    }

    #[test]
    fn parse_changed_keys_round_trips_three_field_record() {
        let raw = "data1\u{2}group1\u{2}tenant1\u{1}";
        let encoded = percent_encoding::utf8_percent_encode(raw, percent_encoding::NON_ALPHANUMERIC).to_string();
        let keys = parse_changed_keys(&encoded);
        assert_eq!(keys, vec![Key::new("data1", "group1", "tenant1")]);
    }

    #[test]
    fn parse_changed_keys_accepts_two_field_record_with_empty_tenant() {
        let raw = "data1\u{2}group1\u{1}";
        let encoded = percent_encoding::utf8_percent_encode(raw, percent_encoding::NON_ALPHANUMERIC).to_string();
        let keys = parse_changed_keys(&encoded);
        assert_eq!(keys, vec![Key::new("data1", "group1", "")]);
    }

    #[test]
    fn parse_changed_keys_handles_multiple_records() {
        let raw = "d1\u{2}g1\u{1}d2\u{2}g2\u{2}t2\u{1}";
        let encoded = percent_encoding::utf8_percent_encode(raw, percent_encoding::NON_ALPHANUMERIC).to_string();
        let keys = parse_changed_keys(&encoded);
        assert_eq!(keys, vec![Key::new("d1", "g1", ""), Key::new("d2", "g2", "t2")]);
    }

    #[test]
    fn parse_changed_keys_on_empty_body_is_empty() {
        assert!(parse_changed_keys("").is_empty());
    }

    #[test]
    fn next_backoff_doubles_and_caps() {
        let mut b = POLLER_BACKOFF_INITIAL;
        for _ in 0..20 {
            b = next_backoff(b);
        }
        assert_eq!(b, POLLER_BACKOFF_MAX);
    }
}
