use thiserror::Error;

/// Result type for config-client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to the control plane.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Every server in the pool failed (transport error or 5xx) within one call.
    #[error("no server available")]
    NoServerAvailable,

    /// The control plane rejected the request with a non-retried 4xx status.
    #[error("http error {status}: {body}")]
    HttpError { status: u16, body: String },

    /// KMS failed to encrypt a plaintext value being published.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// KMS failed to decrypt a stored ciphertext.
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// The requested key does not exist on the control plane (HTTP 404).
    #[error("config not found")]
    ConfigNotFound,

    /// `publish` was called with empty or missing content.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Snapshot/failover filesystem I/O failure.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a JSON response page from `list_all`.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
