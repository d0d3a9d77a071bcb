//! End-to-end scenarios, mirroring the literal setups/actions/expectations
//! from the read-path and watcher design: empty-snapshot fetch, failover to
//! cache under server failure, hard failure with no cache, a first-fire
//! watcher notification, KMS-ciphered round-trips, and large-scale shard
//! layout.

use std::sync::Arc;
use std::time::Duration;

use acm_config_client::http::{ApiResponse, MockRequestSender};
use acm_config_client::kms::MockKms;
use acm_config_client::{ClientConfig, ClientError, ConfigClient, Content, Credential, CredentialProvider, Key};

fn credential() -> Arc<dyn CredentialProvider> {
    Arc::new(Credential::static_credential("ak", "sk"))
}

fn config_in(tmp: &tempfile::TempDir) -> ClientConfig {
    ClientConfig {
        endpoint: "127.0.0.1:8848".to_string(),
        address_server_enabled: false,
        snapshot_base: tmp.path().join("snapshot"),
        failover_base: tmp.path().join("failover"),
        ..Default::default()
    }
}

fn client_with(config: ClientConfig, sender: MockRequestSender) -> ConfigClient {
    ConfigClient::with_backend(config, credential(), Arc::new(sender), Arc::new(MockKms::new("key-1")))
}

/// S1: empty snapshot, server returns 200 "hello" -> get returns "hello"
/// and the snapshot now holds it.
#[tokio::test]
async fn s1_successful_fetch_populates_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let snapshot_base = config.snapshot_base.clone();
    let sender = MockRequestSender::new();
    sender.add_response(
        &reqwest::Method::GET,
        "/diamond-server/config.co",
        Ok(ApiResponse { status: 200, body: "hello".to_string() }),
    );
    let client = client_with(config, sender);

    let key = Key::new("D", "G", "T");
    let content = client.get(&key).await.unwrap();
    assert_eq!(content.as_deref(), Some("hello"));

    let on_disk = tokio::fs::read_to_string(snapshot_base.join("T").join("G").join("D")).await.unwrap();
    assert_eq!(on_disk, "hello");
}

/// S2: all servers 500, snapshot has "cached" -> get returns "cached".
#[tokio::test]
async fn s2_falls_back_to_snapshot_on_server_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let sender = MockRequestSender::new();
    sender.add_response(
        &reqwest::Method::GET,
        "/diamond-server/config.co",
        Ok(ApiResponse { status: 500, body: "boom".to_string() }),
    );
    let client = client_with(config.clone(), sender);

    let key = Key::new("D", "G", "T");
    tokio::fs::create_dir_all(config.snapshot_base.join("T").join("G")).await.unwrap();
    tokio::fs::write(config.snapshot_base.join("T").join("G").join("D"), "cached").await.unwrap();

    let content = client.get(&key).await.unwrap();
    assert_eq!(content.as_deref(), Some("cached"));
}

/// S3: all servers 500, no snapshot -> NoServerAvailable.
#[tokio::test]
async fn s3_no_snapshot_raises_no_server_available() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let sender = MockRequestSender::new();
    sender.add_response(
        &reqwest::Method::GET,
        "/diamond-server/config.co",
        Ok(ApiResponse { status: 500, body: "boom".to_string() }),
    );
    let client = client_with(config, sender);

    let result = client.get(&Key::new("D", "G", "T")).await;
    assert!(matches!(result, Err(ClientError::NoServerAvailable)));
}

/// S4: add_watcher(cb) on a key already present server-side fires exactly
/// once with its current value, driven by an empty last_md5 differing from
/// any server-reported hash.
#[tokio::test]
async fn s4_watcher_fires_once_on_discovery() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let sender = MockRequestSender::new();
    let changed_payload = percent_encoding::utf8_percent_encode("D\u{2}G\u{2}T\u{1}", percent_encoding::NON_ALPHANUMERIC).to_string();
    sender.add_response(
        &reqwest::Method::POST,
        "/diamond-server/config.co",
        Ok(ApiResponse { status: 200, body: changed_payload }),
    );
    sender.add_response(
        &reqwest::Method::GET,
        "/diamond-server/config.co",
        Ok(ApiResponse { status: 200, body: "v1".to_string() }),
    );
    let client = client_with(config, sender);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(String, Content)>();
    client.add_watcher(
        Key::new("D", "G", "T"),
        Arc::new(move |key, content| {
            let _ = tx.send((key.data_id.clone(), content.clone()));
        }),
    );

    let (data_id, content) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("watcher should fire within 2s")
        .unwrap();
    assert_eq!(data_id, "D");
    assert_eq!(content, "v1");

    client.shutdown().await;
}

/// S5: a `cipher-` prefixed key round-trips plaintext at the application
/// layer while the on-disk snapshot holds ciphertext.
#[tokio::test]
async fn s5_ciphered_key_round_trips_plaintext_snapshot_holds_ciphertext() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config_in(&tmp);
    config.kms_enabled = true;
    let sender = MockRequestSender::new();
    sender.add_response(
        &reqwest::Method::POST,
        "/diamond-server/basestone.do",
        Ok(ApiResponse { status: 200, body: String::new() }),
    );
    let client = client_with(config.clone(), sender);

    let key = Key::new("cipher-x", "G", "T");
    client.publish(&key, "plain".to_string(), None).await.unwrap();

    let on_disk = tokio::fs::read_to_string(config.snapshot_base.join("T").join("G").join("cipher-x"))
        .await
        .unwrap();
    assert_ne!(on_disk, "plain", "snapshot must hold ciphertext, not plaintext");

    // No network response queued for the follow-up GET, so the remote fetch
    // fails and get() falls back to the snapshot it just wrote, decrypting
    // it back to plaintext.
    let content = client.get(&key).await.unwrap();
    assert_eq!(content.as_deref(), Some("plain"));
}

/// S6: 4000 subscriptions land in shards 0 (3000) and 1 (1000).
#[tokio::test]
async fn s6_large_scale_shard_layout() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let client = client_with(config, MockRequestSender::new());

    for i in 0..4000 {
        client.add_watcher(Key::new(format!("d{i}"), "G", "T"), Arc::new(|_key, _content| {}));
    }

    assert_eq!(client.watcher_shard_sizes(), vec![3000, 1000]);
    client.shutdown().await;
}
