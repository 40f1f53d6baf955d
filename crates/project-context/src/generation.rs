//! Text-generation capability.
//!
//! [`TextGenerator`] takes a system prompt plus conversation turns and
//! returns the completion text. Used twice per answer: once for the
//! relevance score and once for the answer itself.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::GenerationConfig;
use crate::http;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> Result<String>;
}

/// Used when `generation.provider = "disabled"`. Every call fails.
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _messages: &[ChatMessage]) -> Result<String> {
        bail!("Generation provider is disabled")
    }
}

fn wire_messages(system: &str, messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    wire.push(serde_json::json!({"role": "system", "content": system}));
    for m in messages {
        wire.push(serde_json::json!({"role": m.role, "content": m.content}));
    }
    wire
}

/// OpenAI chat completions. Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    model: String,
    api_key: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self {
            model,
            api_key,
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": wire_messages(system, messages),
        });
        let json = http::post_json(
            &self.client,
            OPENAI_CHAT_URL,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_completion(&json)
    }
}

fn parse_openai_completion(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

/// Ollama `/api/chat`, non-streaming.
pub struct OllamaGenerator {
    model: String,
    url: String,
    temperature: f32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "options": {"temperature": self.temperature},
            "messages": wire_messages(system, messages),
        });
        let json = http::post_json(
            &self.client,
            &format!("{}/api/chat", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing message.content"))
    }
}

/// Build the generator named by `generation.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
