//! Text generation providers.
//!
//! | Config Value | Provider | Endpoint |
//! |-------------|----------|----------|
//! | `"disabled"` | [`DisabledGenerator`] | none |
//! | `"openai"` | [`OpenAIGenerator`] | `POST {url}/chat/completions` |
//! | `"ollama"` | [`OllamaGenerator`] | `POST {url}/api/chat` |
//!
//! Both HTTP providers share the retry policy of the embedding clients.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use code_harness_core::generation::{GenerationRequest, TextGenerator};

use crate::config::GenerationConfig;
use crate::embedding::{http_client, post_json_with_retry};

const OPENAI_URL: &str = "https://api.openai.com/v1";
const OLLAMA_URL: &str = "http://localhost:11434";
const GENERATION_RETRIES: u32 = 2;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Message {
    role: String,
    content: String,
}

fn messages(request: &GenerationRequest) -> Vec<Message> {
    let mut out = Vec::with_capacity(2);
    if let Some(system) = &request.system_instruction {
        out.push(Message {
            role: "system".to_string(),
            content: system.clone(),
        });
    }
    out.push(Message {
        role: "user".to_string(),
        content: request.prompt.clone(),
    });
    out
}

/// Fails every call. Retrieval-only commands still work.
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<String> {
        bail!("generation is disabled; set [generation] provider in chx.toml or use --retrieve-only")
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: Message,
}

pub struct OpenAIGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
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
            client: http_client(config.timeout_secs)?,
            model,
            url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = serde_json::to_value(OpenAiChatRequest {
            model: self.model.clone(),
            messages: messages(request),
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
        })?;
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/chat/completions", self.url.trim_end_matches('/')),
            Some(&self.api_key),
            &body,
            GENERATION_RETRIES,
            "OpenAI chat",
        )
        .await?;
        parse_openai_chat(json)
    }
}

fn parse_openai_chat(json: serde_json::Value) -> Result<String> {
    let response: OpenAiChatResponse = serde_json::from_value(json)
        .map_err(|e| anyhow!("Invalid OpenAI chat response: {}", e))?;
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| anyhow!("Invalid OpenAI chat response: no choices"))
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for Ollama provider"))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model,
            url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = serde_json::to_value(OllamaChatRequest {
            model: self.model.clone(),
            messages: messages(request),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_output_tokens,
            },
        })?;
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/chat", self.url.trim_end_matches('/')),
            None,
            &body,
            GENERATION_RETRIES,
            "Ollama chat",
        )
        .await?;
        let response: OllamaChatResponse = serde_json::from_value(json)
            .map_err(|e| anyhow!("Invalid Ollama chat response: {}", e))?;
        Ok(response.message.content)
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
