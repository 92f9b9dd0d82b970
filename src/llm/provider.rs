//! Model transport abstraction.
//!
//! A transport issues exactly one generation request per call and surfaces
//! the generated text as a plain string. Retrying is the scheduler's job.

use async_trait::async_trait;

use crate::error::LlmError;

/// One generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub system_prompt: String,
    pub user_content: String,
}

impl ModelRequest {
    pub fn new(system_prompt: impl Into<String>, user_content: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_content: user_content.into(),
        }
    }
}

/// Backend capable of turning a prompt pair into raw model text.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Short backend name for diagnostics ("gemini", "ollama").
    fn provider_name(&self) -> &str;

    /// Model identifier in use.
    fn model_name(&self) -> &str;

    /// Issue a single generation request.
    async fn generate(&self, request: &ModelRequest) -> Result<String, LlmError>;

    /// Cheap connectivity probe used at startup.
    async fn health_check(&self) -> Result<(), LlmError>;
}
