//! Client library for a remote key-value configuration service.
//!
//! Applications embed this crate to fetch the current value of a named
//! configuration item, publish or remove items, and subscribe to change
//! notifications pushed by the control plane's long-poll protocol.
//!
//! # Example
//! ```no_run
//! use acm_config_client::{ClientConfig, ConfigClient, Credential, Key};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> acm_config_client::Result<()> {
//!     let config = ClientConfig {
//!         endpoint: "127.0.0.1:8848".to_string(),
//!         address_server_enabled: false,
//!         ..Default::default()
//!     };
//!     let credentials = Arc::new(Credential::static_credential("ak", "sk"));
//!     let client = ConfigClient::new(config, credentials);
//!
//!     let key = Key::new("app.yaml", "DEFAULT_GROUP", "DEFAULT_TENANT");
//!     if let Some(content) = client.get(&key).await? {
//!         println!("current value: {content}");
//!     }
//!
//!     client.add_watcher(key, Arc::new(|key: &Key, content: &String| {
//!         println!("{} changed: {content}", key.data_id);
//!     }));
//!
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod http;
pub mod kms;
pub mod server_pool;
pub mod signer;
pub mod snapshot;
pub mod types;
pub mod watcher;

// Re-export the public surface at the crate root so callers write
// `acm_config_client::ConfigClient` rather than reaching into
// `acm_config_client::client::ConfigClient`.
pub use client::{ConfigClient, ConfigItem};
pub use config::ClientConfig;
pub use credential::{CredentialOracle, MockCredentialOracle, RamCredentialProvider};
pub use error::{ClientError, Result};
pub use http::{ApiRequest, ApiResponse, MockRequestSender, ReqwestSender, RequestSender};
pub use kms::{KmsClient, MockKms, NoopKms};
pub use server_pool::ServerPool;
pub use signer::CredentialProvider;
pub use types::{CallbackHandle, Content, Credential, Key, ServerEntry};
pub use watcher::{CallbackDispatcher, ListenerCallback};
