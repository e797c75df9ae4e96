//! Chat-completion provider used by contradiction detection.
//!
//! Requests are single-shot: a failed call is not retried, the caller
//! falls back to "no contradictions".

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use ragline_core::llm::CompletionProvider;

use crate::config::LlmConfig;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Build the configured provider, or `None` when disabled.
pub fn create_completion_provider(config: &LlmConfig) -> Result<Option<Arc<dyn CompletionProvider>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAiChat::from_env(config)?))),
        other => bail!("Unknown llm provider: {}", other),
    }
}

pub struct OpenAiChat {
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn from_env(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        // Backstop only; the detector enforces the real deadline.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.saturating_mul(2)))
            .build()?;
        Ok(Self { api_key, client })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiChat {
    async fn complete(&self, prompt: &str, model: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": model,
            "temperature": 0,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("OpenAI API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        extract_message(&json)
    }
}

fn extract_message(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}
