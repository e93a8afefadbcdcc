//! Error types for the connection lifecycle core.

use thiserror::Error;

use adlink_models::Platform;

/// Lifecycle error types.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Token refresh failed for {platform}: {message}")]
    Refresh { platform: Platform, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Tool call rejected: {0}")]
    Tool(String),

    #[error("No platforms left in the working set")]
    NoPlatformsLeft,

    #[error("Credential store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for lifecycle operations.
pub type Result<T> = std::result::Result<T, ConnectError>;

/// Why a provider refused (or failed) to refresh a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailureKind {
    /// The grant is permanently dead; only a human re-link helps.
    InvalidGrant,
    /// Network-level failure; a later run may succeed.
    Network,
    /// Provider answered with a non-grant error (5xx, rate limit, ...).
    Provider,
}

impl RefreshFailureKind {
    /// Classify a provider error code the way the OAuth endpoints report it.
    pub fn classify(error_code: &str) -> Self {
        let code = error_code.to_ascii_lowercase();
        if code.contains("invalid_grant")
            || code.contains("invalid_token")
            || code.contains("oauthexception")
        {
            RefreshFailureKind::InvalidGrant
        } else if code.contains("network") || code.contains("timeout") {
            RefreshFailureKind::Network
        } else {
            RefreshFailureKind::Provider
        }
    }

    /// Whether the failure should flag the connection for re-authentication.
    pub fn needs_reauth(&self) -> bool {
        matches!(self, RefreshFailureKind::InvalidGrant)
    }
}
