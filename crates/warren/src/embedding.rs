//! HTTP embedding providers.
//!
//! - [`OpenAiEmbedder`]: `POST {url}/v1/embeddings` with a bearer key from
//!   `OPENAI_API_KEY`.
//! - [`OllamaEmbedder`]: `POST {url}/api/embed` on a local Ollama.
//!
//! Both implement [`EmbeddingProvider`] from `warren-core` and retry
//! transient failures through [`crate::http::post_json`]. When the
//! configured provider is `disabled`, [`create_provider`] returns `None` and
//! retrieval skips the vector stage.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use reqwest::Client;

use warren_core::embedding::EmbeddingProvider;

use crate::config::EmbeddingConfig;
use crate::http::{post_json, DEFAULT_BACKOFF};

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

struct HttpSettings {
    client: Client,
    url: String,
    max_retries: u32,
    backoff: Duration,
}

impl HttpSettings {
    fn new(config: &EmbeddingConfig, default_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| default_url.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_retries: config.max_retries,
            backoff: DEFAULT_BACKOFF,
        })
    }
}

fn model_and_dims(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {} provider", config.provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow!("embedding.dims required for {} provider", config.provider))?;
    Ok((model, dims))
}

fn parse_vector(value: Option<&serde_json::Value>, provider: &str) -> Result<Vec<f32>> {
    let values = value
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow!("Invalid {} response: embedding is not an array", provider))?;
    Ok(values
        .iter()
        .map(|x| x.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    http: HttpSettings,
}

impl OpenAiEmbedder {
    /// Build from config, reading the key from `OPENAI_API_KEY`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::new(config, api_key)
    }

    pub fn new(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        Ok(Self {
            model,
            dims,
            api_key: api_key.into(),
            http: HttpSettings::new(config, OPENAI_URL)?,
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.http.backoff = backoff;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = post_json(
            &self.http.client,
            &format!("{}/v1/embeddings", self.http.url),
            &[("Authorization", format!("Bearer {}", self.api_key))],
            &body,
            self.http.max_retries,
            self.http.backoff,
        )
        .await
        .map_err(|e| anyhow!("OpenAI embeddings error: {}", e))?;

        // `data` is in input order, but sort by `index` in case it is not.
        let mut data: Vec<serde_json::Value> = json
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;
        data.sort_by_key(|d| d.get("index").and_then(|i| i.as_u64()).unwrap_or(0));

        let vectors = data
            .iter()
            .map(|d| parse_vector(d.get("embedding"), "OpenAI"))
            .collect::<Result<Vec<_>>>()?;

        if vectors.len() != texts.len() {
            bail!(
                "OpenAI returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }
}

pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    http: HttpSettings,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        Ok(Self {
            model,
            dims,
            http: HttpSettings::new(config, OLLAMA_URL)?,
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.http.backoff = backoff;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = post_json(
            &self.http.client,
            &format!("{}/api/embed", self.http.url),
            &[],
            &body,
            self.http.max_retries,
            self.http.backoff,
        )
        .await
        .map_err(|e| {
            anyhow!(
                "Ollama embeddings error (is Ollama running at {}?): {}",
                self.http.url,
                e
            )
        })?;

        let vectors = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
            .iter()
            .map(|v| parse_vector(Some(v), "Ollama"))
            .collect::<Result<Vec<_>>>()?;
        if vectors.len() != texts.len() {
            bail!(
                "Ollama returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }
}

/// Instantiate the configured provider, or `None` when embeddings are disabled.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAiEmbedder::from_config(config)?))),
        "ollama" => Ok(Some(Arc::new(OllamaEmbedder::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
