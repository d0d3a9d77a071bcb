//! Config read path (C6): composes the server pool, signer, HTTP façade,
//! snapshot/failover store and KMS envelope into `get`/`publish`/`remove`/
//! `list_all`, and wires the watcher registry into lazily-spawned poller
//! shards.
//!
//! `ConfigClient` is cheap to clone (an `Arc` around its shared state,
//! mirroring `ServerPool`'s own pattern) so it can hand a clone of itself to
//! each poller shard as their [`ConfigFetcher`] without a self-referential
//! `Arc<Self>` construction problem.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::http::{ApiRequest, ApiResponse, ReqwestSender, RequestSender};
use crate::kms::{KmsClient, NoopKms};
use crate::server_pool::ServerPool;
use crate::signer::{self, AuthHeaders, CredentialProvider};
use crate::snapshot::{FailoverStore, SnapshotStore};
use crate::types::{CallbackHandle, Content, Key};
use crate::watcher::{CallbackDispatcher, ConfigFetcher, ListenerCallback, PollerContext, PollerShard, WatcherRegistry};

const CONFIG_PATH: &str = "/diamond-server/config.co";
const BASESTONE_PATH: &str = "/diamond-server/basestone.do";
const DATUM_PATH: &str = "/diamond-server/datum.do";

/// One entry returned by [`ConfigClient::list_all`].
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ConfigItem {
    #[serde(rename = "dataId")]
    pub data_id: String,
    pub group: String,
    #[serde(default)]
    pub tenant: String,
    #[serde(default)]
    pub content: String,
}

/// Shape of a single page returned by `getAllConfigByTenant`. The field
/// names follow the control plane's own JSON, not Rust convention.
#[derive(Debug, Clone, serde::Deserialize)]
struct ConfigPage {
    #[serde(rename = "pageItems", default)]
    page_items: Vec<ConfigItem>,
    #[serde(rename = "pageNumber")]
    page_number: u32,
    #[serde(rename = "pagesAvailable")]
    pages_available: u32,
}

struct ClientInner {
    config: ClientConfig,
    server_pool: ServerPool,
    sender: Arc<dyn RequestSender>,
    snapshot: SnapshotStore,
    failover: FailoverStore,
    kms: Arc<dyn KmsClient>,
    credentials: Arc<dyn CredentialProvider>,
    registry: WatcherRegistry,
    dispatcher: CallbackDispatcher,
    shards: Mutex<HashMap<usize, JoinHandle<()>>>,
    address_refresher: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// Composes every other component into the public surface applications
/// embed: fetch/publish/remove/list config items, and subscribe to change
/// notifications.
#[derive(Clone)]
pub struct ConfigClient {
    inner: Arc<ClientInner>,
}

impl ConfigClient {
    /// Build a production client: real HTTP transport, no KMS (content for
    /// `cipher-` keys passes through unchanged — wire in [`Self::with_backend`]
    /// if the embedding application has a real KMS oracle).
    pub fn new(config: ClientConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        let sender: Arc<dyn RequestSender> = Arc::new(ReqwestSender::new(build_http_client()));
        Self::with_backend(config, credentials, sender, Arc::new(NoopKms))
    }

    /// Build a client from fully explicit dependencies — the seam tests use
    /// to substitute [`crate::http::MockRequestSender`] and
    /// [`crate::kms::MockKms`] for the real network and KMS oracle.
    pub fn with_backend(
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        sender: Arc<dyn RequestSender>,
        kms: Arc<dyn KmsClient>,
    ) -> Self {
        let server_pool = ServerPool::new(&config, build_http_client());
        let snapshot = SnapshotStore::new(config.snapshot_base.clone());
        let failover = FailoverStore::new(config.failover_base.clone());
        let registry = WatcherRegistry::new(config.pulling_config_size);
        let dispatcher = CallbackDispatcher::new(config.callback_thread_num);
        let cancel = CancellationToken::new();
        let address_refresher = server_pool.spawn_refresher(cancel.child_token());

        Self {
            inner: Arc::new(ClientInner {
                config,
                server_pool,
                sender,
                snapshot,
                failover,
                kms,
                credentials,
                registry,
                dispatcher,
                shards: Mutex::new(HashMap::new()),
                address_refresher: Mutex::new(address_refresher),
                cancel,
            }),
        }
    }

    /// `get(key)` using the client's configured default timeout and
    /// `no_snapshot` setting.
    pub async fn get(&self, key: &Key) -> Result<Option<Content>> {
        self.get_with_options(key, None, self.inner.config.no_snapshot).await
    }

    /// `get` with an explicit per-call timeout and `no_snapshot` override,
    /// following the priority ladder in order: failover overlay, remote
    /// fetch (with server rotation), then snapshot cache.
    pub async fn get_with_options(&self, key: &Key, timeout: Option<Duration>, no_snapshot: bool) -> Result<Option<Content>> {
        if let Ok(raw) = self.inner.failover.read(key).await {
            return Ok(Some(self.decrypt_if_needed(key, raw).await?));
        }

        self.get_bypassing_failover(key, timeout, no_snapshot).await
    }

    /// The remote-fetch-then-snapshot half of the priority ladder, skipping
    /// the failover overlay entirely. Used by the watcher's re-fetch path:
    /// once a poller shard has observed a server-side change, it needs the
    /// actual fresh value, not whatever an operator-provisioned failover
    /// file happens to hold for that key.
    async fn get_bypassing_failover(&self, key: &Key, timeout: Option<Duration>, no_snapshot: bool) -> Result<Option<Content>> {
        match self.fetch_remote(key, timeout).await {
            Ok(Some(body)) => {
                if let Err(e) = self.inner.snapshot.write(key, &body).await {
                    tracing::warn!(data_id = %key.data_id, error = %e, "snapshot write failed after successful fetch");
                }
                Ok(Some(self.decrypt_if_needed(key, body).await?))
            }
            Ok(None) => {
                if let Err(e) = self.inner.snapshot.delete(key).await {
                    tracing::warn!(data_id = %key.data_id, error = %e, "snapshot delete failed after 404");
                }
                Ok(None)
            }
            Err(e @ ClientError::HttpError { .. }) => Err(e),
            Err(_transport_exhausted) => {
                if no_snapshot {
                    return Err(ClientError::NoServerAvailable);
                }
                match self.inner.snapshot.read(key).await {
                    Ok(raw) => Ok(Some(self.decrypt_if_needed(key, raw).await?)),
                    Err(_) => Err(ClientError::NoServerAvailable),
                }
            }
        }
    }

    /// `POST /diamond-server/basestone.do?method=syncUpdateAll`. `content`
    /// must be non-empty.
    pub async fn publish(&self, key: &Key, content: Content, timeout: Option<Duration>) -> Result<()> {
        if content.is_empty() {
            return Err(ClientError::InvalidRequest("content must be non-empty".to_string()));
        }

        let stored = self.encrypt_if_needed(key, content).await?;
        let timeout = timeout.unwrap_or(self.inner.config.default_timeout);
        let credential = self.inner.credentials.current();
        let app_name = self.inner.config.app_name.clone();

        self.send_with_retry(|| {
            let mut request = ApiRequest::post(BASESTONE_PATH, timeout)
                .with_query("method", "syncUpdateAll")
                .with_form("dataId", key.data_id.clone())
                .with_form("group", key.group.clone())
                .with_form("tenant", key.tenant.clone())
                .with_form("content", stored.clone())
                .with_form("appName", app_name.clone());
            if self.inner.config.auth_enabled {
                request = apply_auth_headers(request, signer::build_headers(&credential, &key.tenant, &key.group));
            }
            request
        })
        .await?;

        if let Err(e) = self.inner.snapshot.write(key, &stored).await {
            tracing::warn!(data_id = %key.data_id, error = %e, "snapshot write failed after publish");
        }

        Ok(())
    }

    /// `POST /diamond-server/datum.do?method=deleteAllDatums`.
    pub async fn remove(&self, key: &Key, timeout: Option<Duration>) -> Result<()> {
        let timeout = timeout.unwrap_or(self.inner.config.default_timeout);
        let credential = self.inner.credentials.current();
        let app_name = self.inner.config.app_name.clone();

        self.send_with_retry(|| {
            let mut request = ApiRequest::post(DATUM_PATH, timeout)
                .with_query("method", "deleteAllDatums")
                .with_form("dataId", key.data_id.clone())
                .with_form("group", key.group.clone())
                .with_form("tenant", key.tenant.clone())
                .with_form("appName", app_name.clone());
            if self.inner.config.auth_enabled {
                request = apply_auth_headers(request, signer::build_headers(&credential, &key.tenant, &key.group));
            }
            request
        })
        .await?;

        if let Err(e) = self.inner.snapshot.delete(key).await {
            tracing::warn!(data_id = %key.data_id, error = %e, "snapshot delete failed after remove");
        }

        Ok(())
    }

    /// Paginated `GET /diamond-server/basestone.do?method=getAllConfigByTenant`
    /// over the client's configured tenant, accumulating pages until
    /// `pageNumber >= pagesAvailable`. `group_filter`/`prefix_filter` are
    /// applied client-side, after every page has been fetched.
    pub async fn list_all(&self, group_filter: Option<&str>, prefix_filter: Option<&str>) -> Result<Vec<ConfigItem>> {
        const PAGE_SIZE: u32 = 200;

        let mut items = Vec::new();
        let mut page_no = 1u32;
        let credential = self.inner.credentials.current();
        let timeout = self.inner.config.default_timeout;
        let tenant = self.inner.config.tenant.clone();

        loop {
            let response = self
                .send_with_retry(|| {
                    let mut request = ApiRequest::get(BASESTONE_PATH, timeout)
                        .with_query("method", "getAllConfigByTenant")
                        .with_query("tenant", tenant.clone())
                        .with_query("pageNo", page_no.to_string())
                        .with_query("pageSize", PAGE_SIZE.to_string());
                    if let Some(group) = group_filter {
                        request = request.with_query("group", group.to_string());
                    }
                    if self.inner.config.auth_enabled {
                        request = apply_auth_headers(
                            request,
                            signer::build_headers(&credential, &tenant, group_filter.unwrap_or("")),
                        );
                    }
                    request
                })
                .await?;

            let page: ConfigPage = serde_json::from_str(&response.body)?;
            items.extend(page.page_items);

            if page.pages_available == 0 || page.page_number >= page.pages_available {
                break;
            }
            page_no += 1;
        }

        if let Some(prefix) = prefix_filter {
            items.retain(|item| item.data_id.starts_with(prefix));
        }
        if let Some(group) = group_filter {
            items.retain(|item| item.group == group);
        }

        Ok(items)
    }

    /// Register `callback` against `key`, spawning its poller shard if this
    /// is the first subscription ever assigned to it.
    pub fn add_watcher(&self, key: Key, callback: ListenerCallback) -> CallbackHandle {
        let handle = self.inner.registry.add(key, String::new(), callback);
        self.ensure_shards_spawned();
        handle
    }

    /// Unregister a single callback by handle.
    pub fn remove_watcher(&self, handle: CallbackHandle) {
        self.inner.registry.remove(handle);
    }

    /// Unregister every callback watching `key`.
    pub fn remove_watchers_by_key(&self, key: &Key) {
        self.inner.registry.remove_all_for_key(key);
    }

    /// Number of subscriptions assigned to each populated shard, in shard
    /// order. Exposed for tests and operational introspection of the
    /// non-rebalancing shard layout.
    pub fn watcher_shard_sizes(&self) -> Vec<usize> {
        (0..self.inner.registry.shard_count())
            .map(|i| self.inner.registry.shard_keys(i).len())
            .collect()
    }

    /// Signal every poller shard to stop and wait up to `pulling_timeout`
    /// for them to exit.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<_> = {
            let mut shards = self.inner.shards.lock();
            shards.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            let _ = tokio::time::timeout(self.inner.config.pulling_timeout, handle).await;
        }
        if let Some(handle) = self.inner.address_refresher.lock().take() {
            let _ = tokio::time::timeout(self.inner.config.pulling_timeout, handle).await;
        }
    }

    fn ensure_shards_spawned(&self) {
        let needed = self.inner.registry.shard_count();
        let mut shards = self.inner.shards.lock();
        shards.retain(|_, handle| !handle.is_finished());

        for idx in 0..needed {
            if shards.contains_key(&idx) {
                continue;
            }
            if self.inner.registry.shard_keys(idx).is_empty() {
                continue;
            }
            let ctx = self.poller_context();
            let shard = PollerShard::new(idx, ctx);
            let token = self.inner.cancel.child_token();
            shards.insert(idx, tokio::spawn(shard.run(token)));
        }
    }

    fn poller_context(&self) -> Arc<PollerContext> {
        Arc::new(PollerContext {
            registry: self.inner.registry.clone(),
            server_pool: self.inner.server_pool.clone(),
            sender: self.inner.sender.clone(),
            fetcher: Arc::new(self.clone()),
            dispatcher: self.inner.dispatcher.clone(),
            snapshot: self.inner.snapshot.clone(),
            credentials: self.inner.credentials.clone(),
            config: self.inner.config.clone(),
        })
    }

    async fn decrypt_if_needed(&self, key: &Key, content: String) -> Result<Content> {
        if self.inner.config.kms_enabled && key.is_ciphered() {
            self.inner.kms.decrypt(&content).await
        } else {
            Ok(content)
        }
    }

    async fn encrypt_if_needed(&self, key: &Key, content: String) -> Result<String> {
        if self.inner.config.kms_enabled && key.is_ciphered() {
            self.inner.kms.encrypt(&content).await
        } else {
            Ok(content)
        }
    }

    /// `GET /diamond-server/config.co`: 200 returns the raw body, 404
    /// returns `None`, a 403/other 4xx is an immediate `HttpError`, and
    /// transport failure or 5xx-after-rotation-exhaustion surfaces as
    /// `NoServerAvailable` for the caller to fall back to the snapshot.
    async fn fetch_remote(&self, key: &Key, timeout: Option<Duration>) -> Result<Option<String>> {
        self.inner.server_pool.ensure_initialized().await?;
        let timeout = timeout.unwrap_or(self.inner.config.default_timeout);
        let credential = self.inner.credentials.current();
        let attempts = self.inner.server_pool.len().max(1);

        for _ in 0..attempts {
            let Ok(server) = self.inner.server_pool.current() else {
                break;
            };

            let mut request = ApiRequest::get(CONFIG_PATH, timeout)
                .with_query("dataId", key.data_id.clone())
                .with_query("group", key.group.clone())
                .with_query("tenant", key.tenant.clone());
            if self.inner.config.auth_enabled {
                request = apply_auth_headers(request, signer::build_headers(&credential, &key.tenant, &key.group));
            }

            match self.inner.sender.send(&server.base_url(), &request).await {
                Ok(resp) if resp.status == 200 => return Ok(Some(resp.body)),
                Ok(resp) if resp.status == 404 => return Ok(None),
                Ok(resp) if (500..600).contains(&resp.status) => {
                    tracing::debug!(host = %server.host, status = resp.status, "5xx from server, rotating");
                    self.inner.server_pool.rotate();
                }
                Ok(resp) => return Err(ClientError::HttpError { status: resp.status, body: resp.body }),
                Err(ClientError::Transport(e)) => {
                    tracing::debug!(host = %server.host, error = %e, "transport error, rotating");
                    self.inner.server_pool.rotate();
                }
                Err(e) => return Err(e),
            }
        }

        // Every distinct server in the pool was tried (or the pool was
        // empty) without a conclusive 2xx/404/4xx response: transport
        // exhaustion, not an `HttpError` — the caller falls back to the
        // snapshot.
        Err(ClientError::NoServerAvailable)
    }

    /// Shared retry/rotation loop for the non-`get` endpoints: 2xx succeeds,
    /// a 4xx is an immediate `HttpError` without rotation, and a transport
    /// error or 5xx rotates to the next server. `build` is re-invoked on
    /// every attempt so the signature's timestamp is always fresh.
    async fn send_with_retry(&self, mut build: impl FnMut() -> ApiRequest) -> Result<ApiResponse> {
        self.inner.server_pool.ensure_initialized().await?;
        let attempts = self.inner.server_pool.len().max(1);

        for _ in 0..attempts {
            let Ok(server) = self.inner.server_pool.current() else {
                break;
            };

            let request = build();
            match self.inner.sender.send(&server.base_url(), &request).await {
                Ok(resp) if resp.is_success() => return Ok(resp),
                Ok(resp) if (500..600).contains(&resp.status) => {
                    tracing::debug!(host = %server.host, status = resp.status, "5xx from server, rotating");
                    self.inner.server_pool.rotate();
                }
                Ok(resp) => return Err(ClientError::HttpError { status: resp.status, body: resp.body }),
                Err(ClientError::Transport(e)) => {
                    tracing::debug!(host = %server.host, error = %e, "transport error, rotating");
                    self.inner.server_pool.rotate();
                }
                Err(e) => return Err(e),
            }
        }

        Err(ClientError::NoServerAvailable)
    }
}

#[async_trait]
impl ConfigFetcher for ConfigClient {
    async fn fetch(&self, key: &Key) -> Result<Option<String>> {
        self.get_bypassing_failover(key, Some(self.inner.config.default_timeout), true).await
    }
}

fn apply_auth_headers(request: ApiRequest, headers: AuthHeaders) -> ApiRequest {
    let mut request = request
        .with_header("Spas-AccessKey", headers.access_key)
        .with_header("Timestamp", headers.timestamp)
        .with_header("Spas-Signature", headers.signature);
    if let Some(token) = headers.security_token {
        request = request.with_header("Spas-SecurityToken", token);
    }
    request
}

fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(format!("ACM-rust-{}", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("static client configuration is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::MockRequestSender;
    use crate::kms::MockKms;
    use crate::types::Credential;

    fn credential() -> Arc<dyn CredentialProvider> {
        Arc::new(Credential::static_credential("ak", "sk"))
    }

    fn test_client(config: ClientConfig, sender: MockRequestSender) -> ConfigClient {
        ConfigClient::with_backend(config, credential(), Arc::new(sender), Arc::new(MockKms::new("key-1")))
    }

    fn config_with(tmp: &tempfile::TempDir) -> ClientConfig {
        ClientConfig {
            endpoint: "127.0.0.1:8848".to_string(),
            address_server_enabled: false,
            snapshot_base: tmp.path().join("snapshot"),
            failover_base: tmp.path().join("failover"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn get_returns_body_and_writes_snapshot_on_200() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with(&tmp);
        let sender = MockRequestSender::new();
        sender.add_response(&reqwest::Method::GET, CONFIG_PATH, Ok(ApiResponse { status: 200, body: "hello".into() }));
        let client = test_client(config, sender);

        let key = Key::new("D", "G", "T");
        let content = client.get(&key).await.unwrap();
        assert_eq!(content.as_deref(), Some("hello"));

        let cached = client.inner.snapshot.read(&key).await.unwrap();
        assert_eq!(cached, "hello");
    }

    #[tokio::test]
    async fn get_falls_back_to_snapshot_when_all_servers_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with(&tmp);
        let sender = MockRequestSender::new();
        sender.add_response(&reqwest::Method::GET, CONFIG_PATH, Ok(ApiResponse { status: 500, body: "err".into() }));
        let client = test_client(config, sender);
        let key = Key::new("D", "G", "T");
        client.inner.snapshot.write(&key, "cached").await.unwrap();

        let content = client.get(&key).await.unwrap();
        assert_eq!(content.as_deref(), Some("cached"));
    }

    #[tokio::test]
    async fn get_raises_no_server_available_without_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with(&tmp);
        let sender = MockRequestSender::new();
        sender.add_response(&reqwest::Method::GET, CONFIG_PATH, Ok(ApiResponse { status: 500, body: "err".into() }));
        let client = test_client(config, sender);

        let result = client.get(&Key::new("D", "G", "T")).await;
        assert!(matches!(result, Err(ClientError::NoServerAvailable)));
    }

    #[tokio::test]
    async fn get_deletes_snapshot_and_returns_none_on_404() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with(&tmp);
        let sender = MockRequestSender::new();
        sender.add_response(&reqwest::Method::GET, CONFIG_PATH, Ok(ApiResponse { status: 404, body: String::new() }));
        let client = test_client(config, sender);
        let key = Key::new("D", "G", "T");
        client.inner.snapshot.write(&key, "stale").await.unwrap();

        let content = client.get(&key).await.unwrap();
        assert_eq!(content, None);
        assert!(client.inner.snapshot.read(&key).await.is_err());
    }

    #[tokio::test]
    async fn get_propagates_4xx_without_rotation() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with(&tmp);
        let sender = MockRequestSender::new();
        sender.add_response(&reqwest::Method::GET, CONFIG_PATH, Ok(ApiResponse { status: 403, body: "forbidden".into() }));
        let client = test_client(config, sender);

        let result = client.get(&Key::new("D", "G", "T")).await;
        assert!(matches!(result, Err(ClientError::HttpError { status: 403, .. })));
    }

    #[tokio::test]
    async fn failover_overlay_short_circuits_remote_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with(&tmp);
        let key = Key::new("D", "G", "T");
        let failover = FailoverStore::new(config.failover_base.clone());
        tokio::fs::create_dir_all(config.failover_base.join("T").join("G")).await.unwrap();
        tokio::fs::write(config.failover_base.join("T").join("G").join("D"), "overridden").await.unwrap();

        let sender = MockRequestSender::new();
        let client = test_client(config, sender.clone());
        let content = client.get(&key).await.unwrap();
        assert_eq!(content.as_deref(), Some("overridden"));
        assert_eq!(sender.call_count(), 0, "failover hit must short-circuit the remote fetch");
        let _ = failover;
    }

    #[tokio::test]
    async fn watcher_refetch_bypasses_failover_overlay() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with(&tmp);
        let key = Key::new("D", "G", "T");
        tokio::fs::create_dir_all(config.failover_base.join("T").join("G")).await.unwrap();
        tokio::fs::write(config.failover_base.join("T").join("G").join("D"), "stale-override").await.unwrap();

        let sender = MockRequestSender::new();
        sender.add_response(&reqwest::Method::GET, CONFIG_PATH, Ok(ApiResponse { status: 200, body: "fresh".into() }));
        let client = test_client(config, sender);

        // A plain `get` is still pinned to the failover overlay...
        let via_get = client.get(&key).await.unwrap();
        assert_eq!(via_get.as_deref(), Some("stale-override"));

        // ...but the watcher's re-fetch path (`ConfigFetcher::fetch`) must
        // see the real server value, not the overlay, once a change has
        // already been detected.
        let via_fetcher = ConfigFetcher::fetch(&client, &key).await.unwrap();
        assert_eq!(via_fetcher.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn publish_rejects_empty_content() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with(&tmp);
        let client = test_client(config, MockRequestSender::new());
        let result = client.publish(&Key::new("D", "G", "T"), String::new(), None).await;
        assert!(matches!(result, Err(ClientError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn publish_writes_encrypted_content_for_ciphered_key() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config_with(&tmp);
        config.kms_enabled = true;
        let sender = MockRequestSender::new();
        sender.add_response(&reqwest::Method::POST, BASESTONE_PATH, Ok(ApiResponse { status: 200, body: String::new() }));
        let client = test_client(config, sender);

        let key = Key::new("cipher-secret", "G", "T");
        client.publish(&key, "plaintext".to_string(), None).await.unwrap();

        let on_disk = client.inner.snapshot.read(&key).await.unwrap();
        assert_ne!(on_disk, "plaintext");
        let decrypted = client.get(&key).await;
        // Remote fetch will be attempted again and fail (no queued response);
        // what matters here is that the cached ciphertext differs from plaintext.
        let _ = decrypted;
    }

    #[tokio::test]
    async fn remove_deletes_snapshot_after_success() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with(&tmp);
        let sender = MockRequestSender::new();
        sender.add_response(&reqwest::Method::POST, DATUM_PATH, Ok(ApiResponse { status: 200, body: String::new() }));
        let client = test_client(config, sender);
        let key = Key::new("D", "G", "T");
        client.inner.snapshot.write(&key, "v1").await.unwrap();

        client.remove(&key, None).await.unwrap();
        assert!(client.inner.snapshot.read(&key).await.is_err());
    }

    #[tokio::test]
    async fn list_all_accumulates_pages_and_applies_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with(&tmp);
        let sender = MockRequestSender::new();
        sender.add_response(
            &reqwest::Method::GET,
            BASESTONE_PATH,
            Ok(ApiResponse {
                status: 200,
                body: serde_json::json!({
                    "pageItems": [
                        {"dataId": "a.yaml", "group": "G1", "tenant": "T"},
                        {"dataId": "b.yaml", "group": "G2", "tenant": "T"},
                    ],
                    "pageNumber": 1,
                    "pagesAvailable": 2,
                })
                .to_string(),
            }),
        );
        sender.add_response(
            &reqwest::Method::GET,
            BASESTONE_PATH,
            Ok(ApiResponse {
                status: 200,
                body: serde_json::json!({
                    "pageItems": [
                        {"dataId": "prefix-c.yaml", "group": "G1", "tenant": "T"},
                    ],
                    "pageNumber": 2,
                    "pagesAvailable": 2,
                })
                .to_string(),
            }),
        );
        let client = test_client(config, sender);

        let items = client.list_all(Some("G1"), Some("prefix-")).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].data_id, "prefix-c.yaml");
    }

    #[tokio::test]
    async fn add_watcher_fires_once_on_first_observed_value() {
        let tmp = tempfile::tempdir().unwrap();
        let config = config_with(&tmp);
        let sender = MockRequestSender::new();
        sender.add_response(
            &reqwest::Method::POST,
            "/diamond-server/config.co",
            Ok(ApiResponse { status: 200, body: percent_encoding::utf8_percent_encode("D\u{2}G\u{2}T\u{1}", percent_encoding::NON_ALPHANUMERIC).to_string() }),
        );
        sender.add_response(&reqwest::Method::GET, CONFIG_PATH, Ok(ApiResponse { status: 200, body: "v1".into() }));
        let client = test_client(config, sender);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let callback: ListenerCallback = Arc::new(move |_key: &Key, content: &Content| {
            let _ = tx.send(content.clone());
        });
        client.add_watcher(Key::new("D", "G", "T"), callback);

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert_eq!(received, "v1");
        client.shutdown().await;
    }
}
