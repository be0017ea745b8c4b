//! Advisory text generation.
//!
//! The generator is a narrow capability: one prompt in, raw text out. No
//! retry, no streaming, and no validation of the returned structure — the
//! advisory is best-effort prose, passed through to the caller as-is.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::error::DiagnosisError;

/// Environment variable holding the Mistral API credential.
pub const MISTRAL_API_KEY_VAR: &str = "MISTRAL_API_KEY";

const MISTRAL_CHAT_URL: &str = "https://api.mistral.ai/v1/chat/completions";

/// A text completion capability.
#[async_trait]
pub trait AdvisoryGenerator: Send + Sync {
    /// Returns the model identifier used for generation.
    fn model_name(&self) -> &str;

    /// Generate advisory text for a composed prompt.
    async fn generate(&self, prompt: &str) -> Result<String, DiagnosisError>;
}

/// Create the configured [`AdvisoryGenerator`].
///
/// Fails when the API credential is missing, so a misconfigured deployment
/// refuses to start instead of failing on the first request.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn AdvisoryGenerator>> {
    match config.provider.as_str() {
        "mistral" => Ok(Arc::new(MistralGenerator::new(config)?)),
        other => anyhow::bail!("Unknown generation provider: {}", other),
    }
}

// ============ Mistral provider ============

/// Generator backed by the Mistral chat-completions API.
pub struct MistralGenerator {
    model: String,
    url: String,
    api_key: String,
    client: reqwest::Client,
}

impl MistralGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var(MISTRAL_API_KEY_VAR).map_err(|_| {
            anyhow::anyhow!(
                "{} environment variable not set. Export it before starting.",
                MISTRAL_API_KEY_VAR
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| MISTRAL_CHAT_URL.to_string()),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl AdvisoryGenerator for MistralGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, DiagnosisError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt }
            ],
        });

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| DiagnosisError::Generation(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DiagnosisError::Generation(e.to_string()))?;

        if !status.is_success() {
            return Err(DiagnosisError::Generation(format!(
                "generation API error {}: {}",
                status, text
            )));
        }

        debug!(model = %self.model, bytes = text.len(), "generation response received");
        Ok(advisory_text(&text))
    }
}

/// Pull the completion content out of the response body.
///
/// Falls back to the raw body string when the expected field is absent —
/// the payload is still surfaced rather than dropped.
fn advisory_text(body: &str) -> String {
    let json: serde_json::Value = match serde_json::from_str(body) {
        Ok(json) => json,
        Err(_) => return body.to_string(),
    };

    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_text_extracts_content() {
        let body = r#"{
            "choices": [
                { "message": { "role": "assistant", "content": "**Description**\nRust fungus." } }
            ]
        }"#;
        assert_eq!(advisory_text(body), "**Description**\nRust fungus.");
    }

    #[test]
    fn test_advisory_text_falls_back_to_raw_body() {
        let body = r#"{"unexpected": "shape"}"#;
        assert_eq!(advisory_text(body), body);

        let not_json = "plain text response";
        assert_eq!(advisory_text(not_json), not_json);
    }

    #[test]
    fn test_advisory_text_empty_choices_falls_back() {
        let body = r#"{"choices": []}"#;
        assert_eq!(advisory_text(body), body);
    }
}
