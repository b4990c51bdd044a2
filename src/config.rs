use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::mood::DEFAULT_MOOD_OPTIONS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub digest: DigestConfig,
    #[serde(default)]
    pub authoring: AuthoringConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override (OpenAI-compatible gateway or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            url: None,
        }
    }
}

fn default_provider() -> String {
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

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_provider")]
    pub provider: String,
    /// Data-plane host of a Pinecone index, e.g. `https://scenes-abc123.svc.pinecone.io`.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default = "default_upsert_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            host: None,
            namespace: None,
            batch_size: default_upsert_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_index_provider() -> String {
    "sqlite".to_string()
}
fn default_upsert_batch_size() -> usize {
    100
}

/// Field labels used when building the embedded digest text.
#[derive(Debug, Deserialize, Clone)]
pub struct DigestConfig {
    #[serde(default = "default_location_label")]
    pub location_label: String,
    #[serde(default = "default_mood_label")]
    pub mood_label: String,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            location_label: default_location_label(),
            mood_label: default_mood_label(),
        }
    }
}

fn default_location_label() -> String {
    "location".to_string()
}
fn default_mood_label() -> String {
    "mood".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthoringConfig {
    #[serde(default = "default_mood_options")]
    pub mood_options: Vec<String>,
}

impl Default for AuthoringConfig {
    fn default() -> Self {
        Self {
            mood_options: default_mood_options(),
        }
    }
}

fn default_mood_options() -> Vec<String> {
    DEFAULT_MOOD_OPTIONS.iter().map(|s| s.to_string()).collect()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Validate index
    if config.index.batch_size == 0 {
        anyhow::bail!("index.batch_size must be > 0");
    }
    match config.index.provider.as_str() {
        "sqlite" => {}
        "pinecone" => {
            if config.index.host.as_deref().map_or(true, |h| h.trim().is_empty()) {
                anyhow::bail!("index.host must be set when provider is 'pinecone'");
            }
        }
        other => anyhow::bail!(
            "Unknown index provider: '{}'. Must be sqlite or pinecone.",
            other
        ),
    }

    // Validate digest labels
    if config.digest.location_label.contains('\n') || config.digest.mood_label.contains('\n') {
        anyhow::bail!("digest labels must not contain newlines");
    }

    Ok(())
}
