//! Provider adapter: prompt assembly and the fallback-prompt protocol.
//!
//! One `scan` call makes at most two model calls: the situation prompt, then
//! (only if its output fails validation) the fallback prompt. Transport
//! errors are returned as `Err` so the scheduler can apply its retry policy;
//! validation failures never escape as errors.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::prompts;
use crate::llm::provider::{ModelRequest, ModelTransport};
use crate::pipeline::stores::PromptStore;
use crate::pipeline::types::{ScanRequest, ScanResult};
use crate::pipeline::validator::{self, failure_response};

pub struct Scanner {
    transport: Arc<dyn ModelTransport>,
    prompts: Option<Arc<dyn PromptStore>>,
    call_timeout: Duration,
}

impl Scanner {
    pub fn new(transport: Arc<dyn ModelTransport>, call_timeout: Duration) -> Self {
        Self {
            transport,
            prompts: None,
            call_timeout,
        }
    }

    /// Consult `store` for per-guild prompt overrides.
    pub fn with_prompt_store(mut self, store: Arc<dyn PromptStore>) -> Self {
        self.prompts = Some(store);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.transport.provider_name()
    }

    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.transport.health_check().await
    }

    /// Guild override or built-in prompt for the request's situation, plus the JSON suffix.
    pub async fn system_prompt_for(&self, request: &ScanRequest) -> String {
        let custom = match &self.prompts {
            Some(store) => match store
                .custom_prompt(request.guild_id(), request.situation())
                .await
            {
                Ok(prompt) => prompt.filter(|p| !p.trim().is_empty()),
                Err(e) => {
                    warn!(
                        guild_id = %request.guild_id(),
                        situation = %request.situation(),
                        error = %e,
                        "Custom prompt lookup failed, using built-in prompt"
                    );
                    None
                }
            },
            None => None,
        };

        match custom {
            Some(base) => prompts::build_system_prompt(&base),
            None => prompts::build_system_prompt(prompts::default_prompt(request.situation())),
        }
    }

    /// Labelled user content: message, then URLs, decoded text and context when present.
    pub fn build_user_content(request: &ScanRequest) -> String {
        let mut parts = vec![format!("MESSAGE: {}", request.content())];
        if !request.urls().is_empty() {
            parts.push(format!("URLS: {}", request.urls().join(", ")));
        }
        if let Some(aux) = request.aux_text() {
            parts.push(format!("DECODED_CONTENT: {aux}"));
        }
        if let Some(context) = request.context() {
            parts.push(format!("CONTEXT: {context}"));
        }
        parts.join("\n")
    }

    /// Run the scan protocol. `Err` only for transport failures.
    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanResult, LlmError> {
        let user_content = Self::build_user_content(request);
        let system_prompt = self.system_prompt_for(request).await;

        let raw = self
            .call(ModelRequest::new(system_prompt, user_content.clone()))
            .await?;
        let primary_err = match validator::validate(&raw) {
            Ok(response) => {
                debug!(
                    scan_id = %request.scan_id(),
                    score = response.score,
                    "Scan validated on primary prompt"
                );
                return Ok(ScanResult {
                    success: true,
                    response,
                    retried: false,
                    error: None,
                });
            }
            Err(e) => e,
        };

        warn!(
            scan_id = %request.scan_id(),
            provider = self.provider_name(),
            error = %primary_err,
            "Primary output failed validation, retrying with fallback prompt"
        );

        let raw = self
            .call(ModelRequest::new(prompts::fallback_system_prompt(), user_content))
            .await?;
        match validator::validate(&raw) {
            Ok(response) => Ok(ScanResult {
                success: true,
                response,
                retried: true,
                error: None,
            }),
            Err(fallback_err) => {
                warn!(
                    scan_id = %request.scan_id(),
                    error = %fallback_err,
                    "Fallback output failed validation"
                );
                Ok(ScanResult {
                    success: false,
                    response: failure_response(),
                    retried: true,
                    error: Some(format!("Original: {primary_err}; Fallback: {fallback_err}")),
                })
            }
        }
    }

    async fn call(&self, request: ModelRequest) -> Result<String, LlmError> {
        match tokio::time::timeout(self.call_timeout, self.transport.generate(&request)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout {
                provider: self.provider_name().to_string(),
                timeout: self.call_timeout,
            }),
        }
    }
}
