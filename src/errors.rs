use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Fault raised by a single remote-service call. Any variant counts as a
/// failed tier step and triggers fallback to the next tier.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("rejected by remote service: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Map a transport error, keeping client-side timeouts distinct.
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout(timeout)
        } else {
            RemoteError::Http(err)
        }
    }
}

/// Step of the full login chain that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    AccessToken,
    LoginTokens,
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginStage::AccessToken => f.write_str("access token login"),
            LoginStage::LoginTokens => f.write_str("login token grant"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("account list has {identities} entries but secret list has {secrets}")]
    ConfigMismatch { identities: usize, secrets: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("identity or secret is empty")]
    InvalidAccount,

    #[error("login failed during {stage}: {source}")]
    LoginFailure {
        stage: LoginStage,
        #[source]
        source: RemoteError,
    },

    #[error("remote call failed: {0}")]
    RemoteCall(#[from] RemoteError),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("account task panicked: {0}")]
    Panicked(String),
}

impl AppError {
    /// Only configuration faults abort a whole batch.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, AppError::ConfigMismatch { .. } | AppError::Config(_))
    }
}
