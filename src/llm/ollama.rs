//! Ollama transport: self-hosted `/api/generate`.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::provider::{ModelRequest, ModelTransport};

const PROVIDER: &str = "ollama";
const TEMPERATURE: f64 = 0.1;
const NUM_PREDICT: u32 = 500;

pub struct OllamaTransport {
    base_url: String,
    model: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaTransport {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    fn request_body(&self, request: &ModelRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "prompt": request.user_content,
            "system": request.system_prompt,
            "stream": false,
            "format": "json",
            "options": {
                "temperature": TEMPERATURE,
                "num_predict": NUM_PREDICT
            }
        })
    }

    /// Whether `/api/tags` lists this model, ignoring the `:tag` suffix.
    fn model_listed(&self, tags: &serde_json::Value) -> bool {
        let wanted = self.model.split(':').next().unwrap_or(&self.model);
        tags.get("models")
            .and_then(serde_json::Value::as_array)
            .is_some_and(|models| {
                models.iter().any(|m| {
                    m.get("name")
                        .and_then(serde_json::Value::as_str)
                        .is_some_and(|name| name.split(':').next() == Some(wanted))
                })
            })
    }
}

fn extract_text(body: &serde_json::Value) -> Result<String, LlmError> {
    match body.get("response").and_then(serde_json::Value::as_str) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: "empty response from model".into(),
        }),
    }
}

#[async_trait]
impl ModelTransport for OllamaTransport {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ModelRequest) -> Result<String, LlmError> {
        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.timeout)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(PROVIDER, e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::from_status(PROVIDER, status.as_u16(), &body));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError::from_reqwest(PROVIDER, e, self.timeout))?;
        extract_text(&body)
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| LlmError::from_reqwest(PROVIDER, e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::from_status(PROVIDER, status.as_u16(), &body));
        }

        let tags: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| LlmError::from_reqwest(PROVIDER, e, self.timeout))?;
        if self.model_listed(&tags) {
            tracing::info!(model = %self.model, "Ollama connection verified");
        } else {
            tracing::warn!(
                model = %self.model,
                "Ollama is reachable but the model is not pulled; run `ollama pull` first"
            );
        }
        Ok(())
    }
}
