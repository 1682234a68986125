//! Chat-completion client for answer and flashcard generation.
//!
//! Same provider roster and retry policy as [`crate::embedding`]:
//! Mistral and OpenAI speak the OpenAI chat-completions shape with bearer
//! auth; Ollama exposes `/api/chat` locally without auth. Transient
//! failures (429, 5xx, network) back off exponentially up to
//! `max_retries`; other client errors fail immediately.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::config::LlmConfig;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("llm provider is disabled")]
    Disabled,
    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),
    #[error("llm API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("llm request failed after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },
    #[error("invalid llm response: {0}")]
    InvalidResponse(String),
}

/// Seam between the Q&A and flashcard services and the chat API. The
/// production implementation is [`LlmClient`]; tests substitute canned
/// replies.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Send a single-turn prompt and return the model's reply text.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

pub struct LlmClient {
    config: LlmConfig,
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> Result<Self, GenerationError> {
        let (default_url, key_var): (&str, Option<&'static str>) = match config.provider.as_str() {
            "mistral" => (
                "https://api.mistral.ai/v1/chat/completions",
                Some("MISTRAL_API_KEY"),
            ),
            "openai" => (
                "https://api.openai.com/v1/chat/completions",
                Some("OPENAI_API_KEY"),
            ),
            "ollama" => ("http://localhost:11434/api/chat", None),
            _ => return Err(GenerationError::Disabled),
        };

        let api_key = match key_var {
            Some(var) => {
                Some(std::env::var(var).map_err(|_| GenerationError::MissingApiKey(var))?)
            }
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            client,
            url: config.url.clone().unwrap_or_else(|| default_url.to_string()),
            api_key,
        })
    }

    async fn request_chat(&self, prompt: &str) -> Result<String, GenerationError> {
        let model = self.config.model.as_ref().ok_or(GenerationError::Disabled)?;

        let mut body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });
        if self.config.provider == "ollama" {
            body["stream"] = serde_json::json!(false);
        }

        let mut last_err = String::new();
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(attempt, delay_secs = delay.as_secs(), "retrying llm request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(&self.url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;
                        return parse_chat_response(&json);
                    }

                    let message = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = format!("{status}: {message}");
                        continue;
                    }

                    return Err(GenerationError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }
                Err(e) => {
                    last_err = e.to_string();
                    continue;
                }
            }
        }

        Err(GenerationError::Exhausted {
            attempts: max_retries + 1,
            message: last_err,
        })
    }
}

#[async_trait]
impl Generator for LlmClient {
    fn model_name(&self) -> &str {
        self.config.model.as_deref().unwrap_or("disabled")
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        self.request_chat(prompt).await
    }
}

/// Pull the reply text out of a chat response. OpenAI-compatible APIs
/// return `choices[0].message.content`; Ollama returns `message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    if let Some(content) = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        return Ok(content.to_string());
    }

    if let Some(content) = json
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        return Ok(content.to_string());
    }

    Err(GenerationError::InvalidResponse(
        "missing message content".to_string(),
    ))
}
