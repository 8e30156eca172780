//! Configuration parsing and validation.
//!
//! Warren is configured from a single TOML file (default
//! `./config/warren.toml`). Every section except `[db]` is optional and
//! falls back to defaults. [`load_config`] rejects settings that would make
//! retrieval or context packing misbehave at request time.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/warren.sqlite"
//!
//! [retrieval]
//! hybrid_alpha = 0.6
//! final_limit = 8
//!
//! [context]
//! max_context_tokens = 8000
//! reserved_response_tokens = 1500
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [llm]
//! provider = "anthropic"
//! model = "claude-sonnet-4-5"
//!
//! [server]
//! bind = "127.0.0.1:7340"
//!
//! [logging]
//! level = "info"
//! format = "pretty"
//!
//! [compliance]
//! extra_terms = ["double your money"]
//! ```
//!
//! API keys are never read from the file: `OPENAI_API_KEY` and
//! `ANTHROPIC_API_KEY` come from the environment.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

use warren_core::assembler::ContextBudget;
use warren_core::retrieval::RetrievalParams;

/// Slack allowed when checking that section shares sum to 1.0.
const SHARE_EPSILON: f64 = 1e-6;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalParams,
    #[serde(default)]
    pub context: ContextBudget,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub compliance: ComplianceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_chunk_tokens(),
        }
    }
}

fn default_chunk_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai`, or `ollama`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override, e.g. for a proxy or a local Ollama.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `disabled`, `anthropic`, or `openai`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            temperature: default_temperature(),
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_temperature() -> f64 {
    0.4
}
fn default_llm_retries() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// Logging configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_format() -> String {
    "pretty".to_string()
}

impl LoggingConfig {
    /// Install the global tracing subscriber. `RUST_LOG` overrides `level`.
    ///
    /// Logs go to stderr so command output on stdout stays parseable.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                let _ = fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .try_init();
            }
            _ => {
                let _ = fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .try_init();
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ComplianceConfig {
    /// Firm-specific phrases flagged in generated drafts.
    #[serde(default)]
    pub extra_terms: Vec<String>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    // Retrieval
    let r = &config.retrieval;
    if r.final_limit < 1 {
        bail!("retrieval.final_limit must be >= 1");
    }
    if r.candidate_k < r.final_limit {
        bail!("retrieval.candidate_k must be >= retrieval.final_limit");
    }
    if !(0.0..=1.0).contains(&r.hybrid_alpha) {
        bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if r.max_attempts < 1 {
        bail!("retrieval.max_attempts must be >= 1");
    }

    // Context budget
    let c = &config.context;
    if c.max_context_tokens <= c.reserved_response_tokens {
        bail!("context.max_context_tokens must be greater than context.reserved_response_tokens");
    }
    for (name, share) in [
        ("example_share", c.example_share),
        ("document_share", c.document_share),
        ("history_share", c.history_share),
    ] {
        if !(0.0..=1.0).contains(&share) {
            bail!("context.{} must be in [0.0, 1.0]", name);
        }
    }
    if c.example_share + c.document_share + c.history_share > 1.0 + SHARE_EPSILON {
        bail!("context shares (example, document, history) must sum to <= 1.0");
    }
    if c.per_document_max_tokens == 0 {
        bail!("context.per_document_max_tokens must be > 0");
    }

    // Embedding
    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if e.is_enabled() {
        if e.dims.is_none() || e.dims == Some(0) {
            bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
        }
        if e.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                e.provider
            );
        }
        if e.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    // LLM
    let l = &config.llm;
    match l.provider.as_str() {
        "disabled" | "anthropic" | "openai" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be disabled, anthropic, or openai.",
            other
        ),
    }
    if l.is_enabled() && l.model.is_none() {
        bail!("llm.model must be specified when provider is '{}'", l.provider);
    }

    match config.logging.format.as_str() {
        "pretty" | "json" => {}
        other => bail!("logging.format must be pretty or json, got '{}'", other),
    }

    Ok(())
}
