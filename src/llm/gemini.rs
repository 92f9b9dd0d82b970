//! Gemini transport: hosted `generateContent` API.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;
use crate::llm::provider::{ModelRequest, ModelTransport};

const PROVIDER: &str = "gemini";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const TEMPERATURE: f64 = 0.1;
const MAX_OUTPUT_TOKENS: u32 = 500;

pub struct GeminiTransport {
    api_key: SecretString,
    model: String,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl GeminiTransport {
    pub fn new(api_key: SecretString, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    /// Point at a different API root (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

/// Request body for `generateContent`.
fn request_body(request: &ModelRequest) -> serde_json::Value {
    serde_json::json!({
        "systemInstruction": {
            "parts": [{ "text": request.system_prompt }]
        },
        "contents": [{
            "role": "user",
            "parts": [{ "text": request.user_content }]
        }],
        "generationConfig": {
            "temperature": TEMPERATURE,
            "maxOutputTokens": MAX_OUTPUT_TOKENS,
            "responseMimeType": "application/json"
        }
    })
}

/// Concatenated text parts of the first candidate.
fn extract_text(body: &serde_json::Value) -> Result<String, LlmError> {
    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: "response has no candidate content".into(),
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(serde_json::Value::as_str))
        .collect();

    if text.is_empty() {
        return Err(LlmError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: "empty response from model".into(),
        });
    }
    Ok(text)
}

#[async_trait]
impl ModelTransport for GeminiTransport {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ModelRequest) -> Result<String, LlmError> {
        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .timeout(self.timeout)
            .json(&request_body(request))
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
        let probe = ModelRequest::new(
            "You are a connectivity probe.",
            r#"Reply with: {"status":"ok"}"#,
        );
        let text = self.generate(&probe).await?;
        if text.contains("ok") {
            tracing::info!(model = %self.model, "Gemini connection verified");
            Ok(())
        } else {
            Err(LlmError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: format!("unexpected probe reply: {}", text.chars().take(100).collect::<String>()),
            })
        }
    }
}
