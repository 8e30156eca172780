//! Chat completion clients.
//!
//! [`CompletionClient`] takes a provider-neutral [`PromptPayload`]; each
//! implementation maps it to its wire format:
//!
//! | Client | Endpoint | System prompt |
//! |--------|----------|---------------|
//! | [`AnthropicClient`] | `POST {url}/v1/messages` | top-level `system` field |
//! | [`OpenAiClient`] | `POST {url}/v1/chat/completions` | first `system` message |
//! | [`DisabledClient`] | none | always fails with [`LlmError::Disabled`] |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use warren_core::prompt::PromptPayload;

use crate::config::LlmConfig;
use crate::http::{post_json, HttpFailure, DEFAULT_BACKOFF};

const ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_URL: &str = "https://api.openai.com";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm provider is disabled")]
    Disabled,
    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),
    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} request failed: {message}")]
    Transport {
        provider: &'static str,
        message: String,
    },
    #[error("{provider} returned an unusable response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl LlmError {
    fn from_http(provider: &'static str, failure: HttpFailure) -> Self {
        match failure {
            HttpFailure::Status { status, body } => LlmError::Api {
                provider,
                status,
                body,
            },
            HttpFailure::Network(message) => LlmError::Transport { provider, message },
            HttpFailure::Decode(message) => LlmError::InvalidResponse { provider, message },
        }
    }
}

/// Model output plus token accounting when the provider reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    async fn complete(&self, payload: &PromptPayload) -> Result<Completion, LlmError>;
}

struct Transport {
    client: Client,
    url: String,
    model: String,
    temperature: f64,
    max_retries: u32,
    backoff: Duration,
}

impl Transport {
    fn new(config: &LlmConfig, default_url: &str) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: config
                .url
                .as_deref()
                .unwrap_or(default_url)
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone().unwrap_or_default(),
            temperature: config.temperature,
            max_retries: config.max_retries,
            backoff: DEFAULT_BACKOFF,
        })
    }
}

// ============ Anthropic ============

pub struct AnthropicClient {
    api_key: String,
    transport: Transport,
}

impl AnthropicClient {
    /// Build from config, reading the key from `ANTHROPIC_API_KEY`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| LlmError::MissingApiKey("ANTHROPIC_API_KEY"))?;
        Self::new(config, api_key)
    }

    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self, LlmError> {
        Ok(Self {
            api_key: api_key.into(),
            transport: Transport::new(config, ANTHROPIC_URL)?,
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.transport.backoff = backoff;
        self
    }
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, payload: &PromptPayload) -> Result<Completion, LlmError> {
        let t = &self.transport;
        let body = serde_json::json!({
            "model": t.model,
            "max_tokens": payload.max_tokens,
            "temperature": t.temperature,
            "system": payload.system,
            "messages": payload.messages,
        });

        let json = post_json(
            &t.client,
            &format!("{}/v1/messages", t.url),
            &[
                ("x-api-key", self.api_key.clone()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            &body,
            t.max_retries,
            t.backoff,
        )
        .await
        .map_err(|e| LlmError::from_http(self.name(), e))?;

        let response: AnthropicResponse =
            serde_json::from_value(json).map_err(|e| LlmError::InvalidResponse {
                provider: self.name(),
                message: e.to_string(),
            })?;

        let text: String = response
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.name(),
                message: "no text content".to_string(),
            });
        }

        Ok(Completion {
            text,
            model: response.model.unwrap_or_else(|| t.model.clone()),
            input_tokens: response.usage.as_ref().and_then(|u| u.input_tokens),
            output_tokens: response.usage.as_ref().and_then(|u| u.output_tokens),
        })
    }
}

// ============ OpenAI ============

pub struct OpenAiClient {
    api_key: String,
    transport: Transport,
}

impl OpenAiClient {
    /// Build from config, reading the key from `OPENAI_API_KEY`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::MissingApiKey("OPENAI_API_KEY"))?;
        Self::new(config, api_key)
    }

    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self, LlmError> {
        Ok(Self {
            api_key: api_key.into(),
            transport: Transport::new(config, OPENAI_URL)?,
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.transport.backoff = backoff;
        self
    }
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, payload: &PromptPayload) -> Result<Completion, LlmError> {
        let t = &self.transport;
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": payload.system,
        })];
        messages.extend(payload.messages.iter().map(|m| {
            serde_json::json!({ "role": m.role, "content": m.content })
        }));
        let body = serde_json::json!({
            "model": t.model,
            "max_tokens": payload.max_tokens,
            "temperature": t.temperature,
            "messages": messages,
        });

        let json = post_json(
            &t.client,
            &format!("{}/v1/chat/completions", t.url),
            &[("Authorization", format!("Bearer {}", self.api_key))],
            &body,
            t.max_retries,
            t.backoff,
        )
        .await
        .map_err(|e| LlmError::from_http(self.name(), e))?;

        let response: OpenAiResponse =
            serde_json::from_value(json).map_err(|e| LlmError::InvalidResponse {
                provider: self.name(),
                message: e.to_string(),
            })?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.name(),
                message: "no message content".to_string(),
            })?;

        Ok(Completion {
            text,
            model: response.model.unwrap_or_else(|| t.model.clone()),
            input_tokens: response.usage.as_ref().and_then(|u| u.prompt_tokens),
            output_tokens: response.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }
}

// ============ Disabled ============

/// Used when no provider is configured; every call fails.
pub struct DisabledClient;

#[async_trait]
impl CompletionClient for DisabledClient {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn complete(&self, _payload: &PromptPayload) -> Result<Completion, LlmError> {
        Err(LlmError::Disabled)
    }
}

/// Instantiate the configured client.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn CompletionClient>, LlmError> {
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicClient::from_config(config)?)),
        "openai" => Ok(Arc::new(OpenAiClient::from_config(config)?)),
        _ => Ok(Arc::new(DisabledClient)),
    }
}
