//! Configuration parsing and validation.
//!
//! Code Harness is configured by a TOML file (default `./chx.toml`). Every
//! section and field has a default, so an empty file is a valid
//! configuration that indexes the current directory with embeddings and
//! generation disabled.
//!
//! # Example
//!
//! ```toml
//! [db]
//! path = "./data/chx.sqlite"
//!
//! [index]
//! root = "./src"
//! exclude_globs = ["**/generated/**"]
//!
//! [retrieval]
//! use_hybrid = true
//! rrf_k = 60
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [server]
//! bind = "127.0.0.1:7331"
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use code_harness_core::chunk::ChunkerConfig;
use code_harness_core::embedding::BatchLimits;
use code_harness_core::retrieve::RetrieverConfig;
use code_harness_core::search::FusionParams;
use code_harness_core::store::KeywordWeights;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub db: DbConfig,
    pub index: IndexConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub session: SessionConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/chx.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory scanned by `chx index`.
    pub root: PathBuf,
    /// Extra exclusions on top of `.git`, `target`, `node_modules` and
    /// `build`.
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub min_chunk_lines: usize,
    pub max_chunk_lines: usize,
    pub max_file_lines: usize,
    pub min_member_chars: usize,
    pub include_members: bool,
    pub include_documentation: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let c = ChunkerConfig::default();
        Self {
            min_chunk_lines: c.min_chunk_lines,
            max_chunk_lines: c.max_chunk_lines,
            max_file_lines: c.max_file_lines,
            min_member_chars: c.min_member_chars,
            include_members: c.include_members,
            include_documentation: c.include_documentation,
        }
    }
}

impl ChunkingConfig {
    pub fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            min_chunk_lines: self.min_chunk_lines,
            max_chunk_lines: self.max_chunk_lines,
            max_file_lines: self.max_file_lines,
            min_member_chars: self.min_member_chars,
            include_members: self.include_members,
            include_documentation: self.include_documentation,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub use_hybrid: bool,
    pub rrf_k: f64,
    pub keyword_boost: f64,
    pub keyword_content_weight: f64,
    pub keyword_name_weight: f64,
    pub max_deps_per_unit: usize,
    pub reverse_dependency_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            use_hybrid: true,
            rrf_k: 60.0,
            keyword_boost: 1.1,
            keyword_content_weight: 1.0,
            keyword_name_weight: 2.0,
            max_deps_per_unit: 5,
            reverse_dependency_limit: 5,
        }
    }
}

impl RetrievalConfig {
    pub fn fusion_params(&self) -> FusionParams {
        FusionParams {
            use_hybrid: self.use_hybrid,
            rrf_k: self.rrf_k,
            keyword_boost: self.keyword_boost,
        }
    }

    pub fn keyword_weights(&self) -> KeywordWeights {
        KeywordWeights {
            content: self.keyword_content_weight,
            name: self.keyword_name_weight,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai`, `ollama` or `local`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible gateways, remote Ollama).
    pub url: Option<String>,
    pub batch_size: usize,
    pub max_tokens_per_batch: usize,
    pub chars_per_token: f64,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 100,
            max_tokens_per_batch: 15_000,
            chars_per_token: 2.0,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            max_tokens_per_batch: self.max_tokens_per_batch,
            max_items: self.batch_size,
            chars_per_token: self.chars_per_token,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    /// `disabled`, `openai` or `ollama`.
    pub provider: String,
    pub model: Option<String>,
    pub url: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    /// Replaces the built-in system prompt for non-listing answers.
    pub system_prompt: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            temperature: 0.3,
            max_output_tokens: 2048,
            timeout_secs: 120,
            system_prompt: None,
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub max_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_turns: 10 }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7331".to_string(),
        }
    }
}

impl Config {
    /// Retriever tuning derived from the `[retrieval]` and `[generation]`
    /// sections.
    pub fn retriever_config(&self) -> RetrieverConfig {
        RetrieverConfig {
            fusion: self.retrieval.fusion_params(),
            max_deps_per_unit: self.retrieval.max_deps_per_unit,
            reverse_dependency_limit: self.retrieval.reverse_dependency_limit,
            temperature: self.generation.temperature,
            max_output_tokens: self.generation.max_output_tokens,
            system_prompt: self.generation.system_prompt.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.min_chunk_lines == 0 {
            bail!("chunking.min_chunk_lines must be > 0");
        }
        if c.max_chunk_lines < c.min_chunk_lines {
            bail!("chunking.max_chunk_lines must be >= chunking.min_chunk_lines");
        }
        if c.max_file_lines == 0 {
            bail!("chunking.max_file_lines must be > 0");
        }

        let r = &self.retrieval;
        if r.rrf_k < 0.0 {
            bail!("retrieval.rrf_k must be >= 0");
        }
        if r.keyword_boost <= 0.0 {
            bail!("retrieval.keyword_boost must be > 0");
        }
        if r.keyword_content_weight < 0.0 || r.keyword_name_weight < 0.0 {
            bail!("retrieval keyword weights must be >= 0");
        }
        if r.keyword_content_weight + r.keyword_name_weight <= 0.0 {
            bail!("retrieval keyword weights must not both be 0");
        }

        let e = &self.embedding;
        match e.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
                other
            ),
        }
        // The local provider has per-model defaults for both.
        if matches!(e.provider.as_str(), "openai" | "ollama") {
            if e.dims.is_none() || e.dims == Some(0) {
                bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
            }
            if e.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                );
            }
        }
        if e.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if e.max_tokens_per_batch == 0 {
            bail!("embedding.max_tokens_per_batch must be > 0");
        }
        if e.chars_per_token <= 0.0 {
            bail!("embedding.chars_per_token must be > 0");
        }

        let g = &self.generation;
        match g.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }
        if g.is_enabled() && g.model.is_none() {
            bail!(
                "generation.model must be specified when provider is '{}'",
                g.provider
            );
        }
        if !(0.0..=2.0).contains(&g.temperature) {
            bail!("generation.temperature must be in [0.0, 2.0]");
        }

        if self.session.max_turns == 0 {
            bail!("session.max_turns must be > 0");
        }
        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Default configuration rendered as TOML, written by `chx init`.
pub fn default_config_toml() -> Result<String> {
    Ok(toml::to_string_pretty(&Config::default())?)
}
