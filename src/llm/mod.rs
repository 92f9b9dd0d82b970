//! Model integration for modscan.
//!
//! Supports:
//! - **Gemini**: hosted `generateContent` API, API key required
//! - **Ollama**: self-hosted `/api/generate`, no key
//!
//! Transports only move text; `Scanner` owns prompt selection, validation
//! and the fallback prompt, and `retry` owns transport retries.

pub mod gemini;
pub mod ollama;
pub mod prompts;
pub mod provider;
pub mod retry;
pub mod scanner;

pub use provider::{ModelRequest, ModelTransport};
pub use scanner::Scanner;

use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;

/// Supported model backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Gemini,
    Ollama,
}

impl LlmBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }
}

/// Configuration for creating a model transport.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    /// Required for Gemini, unused by Ollama.
    pub api_key: Option<secrecy::SecretString>,
    pub gemini_model: String,
    pub ollama_base_url: String,
    pub ollama_model: String,
}

/// Create a model transport from configuration.
pub fn create_transport(
    config: &LlmConfig,
    timeout: Duration,
) -> Result<Arc<dyn ModelTransport>, LlmError> {
    match config.backend {
        LlmBackend::Gemini => {
            let api_key = config.api_key.clone().ok_or_else(|| LlmError::AuthFailed {
                provider: "gemini".to_string(),
            })?;
            tracing::info!("Using Gemini (model: {})", config.gemini_model);
            Ok(Arc::new(gemini::GeminiTransport::new(
                api_key,
                &config.gemini_model,
                timeout,
            )))
        }
        LlmBackend::Ollama => {
            tracing::info!(
                "Using Ollama (model: {}, url: {})",
                config.ollama_model,
                config.ollama_base_url
            );
            Ok(Arc::new(ollama::OllamaTransport::new(
                &config.ollama_base_url,
                &config.ollama_model,
                timeout,
            )))
        }
    }
}
