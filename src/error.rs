//! Error types for modscan.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Model transport errors.
///
/// Variants map onto the retry taxonomy: rate limits, 5xx responses,
/// timeouts and network failures are retryable, everything else is fatal.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} rate limited (429)")]
    RateLimited { provider: String },

    #[error("Provider {provider} server error: {status}")]
    ServerError { provider: String, status: u16 },

    #[error("Provider {provider} request timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} network failure: {reason}")]
    Network { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl LlmError {
    /// Whether the scan scheduler may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::Timeout { .. }
                | Self::Network { .. }
        )
    }

    /// Classify a non-success HTTP status into a transport error.
    pub fn from_status(provider: &str, status: u16, body: &str) -> Self {
        let provider = provider.to_string();
        match status {
            429 => Self::RateLimited { provider },
            401 | 403 => Self::AuthFailed { provider },
            500..=599 => Self::ServerError { provider, status },
            _ => Self::RequestFailed {
                provider,
                reason: format!("HTTP {status}: {}", body.chars().take(200).collect::<String>()),
            },
        }
    }

    /// Classify a reqwest failure (no HTTP status available).
    pub fn from_reqwest(provider: &str, err: reqwest::Error, timeout: Duration) -> Self {
        let provider = provider.to_string();
        if err.is_timeout() {
            Self::Timeout { provider, timeout }
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::Network {
                provider,
                reason: err.to_string(),
            }
        } else if err.is_decode() {
            Self::InvalidResponse {
                provider,
                reason: err.to_string(),
            }
        } else {
            Self::RequestFailed {
                provider,
                reason: err.to_string(),
            }
        }
    }
}

/// Collaborator store errors (policy/prompt lookups).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Lookup failed: {0}")]
    Lookup(String),
}
