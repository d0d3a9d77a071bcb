//! Minimal embedding example: fetch a config item, publish a new value,
//! and watch for further changes.
//!
//! Run against a real control-plane instance with:
//!   cargo run --example watch_config -- 127.0.0.1:8848

use std::sync::Arc;
use std::time::Duration;

use acm_config_client::{ClientConfig, ConfigClient, Credential, Key};

#[tokio::main]
async fn main() -> acm_config_client::Result<()> {
    tracing_subscriber::fmt::init();

    let endpoint = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:8848".to_string());

    let config = ClientConfig {
        endpoint,
        address_server_enabled: false,
        auth_enabled: false,
        ..Default::default()
    };
    let credentials = Arc::new(Credential::static_credential("", ""));
    let client = ConfigClient::new(config, credentials);

    let key = Key::new("demo.properties", "DEFAULT_GROUP", "DEFAULT_TENANT");

    match client.get(&key).await {
        Ok(Some(content)) => println!("current value: {content}"),
        Ok(None) => println!("{} has no value yet", key.data_id),
        Err(e) => println!("fetch failed, proceeding anyway: {e}"),
    }

    client.publish(&key, "hello=world".to_string(), None).await?;
    println!("published initial value");

    let watch_key = key.clone();
    client.add_watcher(
        key,
        Arc::new(move |_key, content| {
            println!("{} changed -> {content}", watch_key.data_id);
        }),
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    client.shutdown().await;
    Ok(())
}
