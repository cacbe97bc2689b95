//! Configuration loading.
//!
//! Settings come from an optional TOML file and are then overridden by
//! environment variables, so a deployment can be tuned without editing the
//! file. Every section has defaults; an empty or missing file is valid.
//!
//! ```toml
//! [paths]
//! root = "."
//! index_dir = "rag_index"
//! devices = "devices.config.json"
//!
//! [chunking]
//! size = 1200
//! overlap = 200
//!
//! [embedding]
//! provider = "local"        # or "openai"
//! batch_size = 32
//! sleep_ms = 300
//!
//! [generation]
//! model = "gpt-4o-mini"
//! timeout_secs = 30
//!
//! [server]
//! bind = "0.0.0.0:8787"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    /// Base directory that mapped document paths are resolved against.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,
    #[serde(default = "default_devices")]
    pub devices: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            index_dir: default_index_dir(),
            devices: default_devices(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_index_dir() -> PathBuf {
    PathBuf::from("rag_index")
}
fn default_devices() -> PathBuf {
    PathBuf::from("devices.config.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1200
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"local"` (fastembed) or `"openai"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Base backoff delay and the pause applied after every remote batch.
    #[serde(default = "default_sleep_ms")]
    pub sleep_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            sleep_ms: default_sleep_ms(),
            max_retries: default_max_retries(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_timeout_secs(),
            api_base: default_api_base(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_sleep_ms() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    5
}
fn default_max_backoff_ms() -> u64 {
    8000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Wall-clock budget for one completion; the request is dropped on expiry.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            api_base: default_api_base(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Origin prefixes accepted by CORS. Requests without an Origin are always allowed.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8787".to_string()
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "https://thealiramezani.github.io".to_string(),
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
        "http://localhost:8080".to_string(),
    ]
}

impl EmbeddingConfig {
    pub fn is_remote(&self) -> bool {
        self.provider == "openai"
    }
}

impl Config {
    pub fn index_dir(&self) -> PathBuf {
        self.paths.root.join(&self.paths.index_dir)
    }

    pub fn devices_path(&self) -> PathBuf {
        self.paths.root.join(&self.paths.devices)
    }

    /// Resolve a mapped document path against the configured root.
    pub fn resolve_document(&self, relative: &str) -> PathBuf {
        self.paths.root.join(relative)
    }
}

/// Load configuration from `path` (if it exists), apply environment
/// overrides, and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Apply the environment variables the service has always honored.
///
/// `lookup` is injected so tests do not have to mutate the process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(provider) = lookup("EMBED_PROVIDER") {
        // "xenova" was the name of the local backend in earlier deployments.
        config.embedding.provider = match provider.as_str() {
            "xenova" => "local".to_string(),
            _ => provider,
        };
    }
    if let Some(batch) = lookup("EMBED_BATCH") {
        config.embedding.batch_size = batch
            .parse()
            .with_context(|| format!("EMBED_BATCH must be an integer, got '{}'", batch))?;
    }
    if let Some(sleep) = lookup("EMBED_SLEEP_MS") {
        config.embedding.sleep_ms = sleep
            .parse()
            .with_context(|| format!("EMBED_SLEEP_MS must be an integer, got '{}'", sleep))?;
    }
    if let Some(model) = lookup("EMBEDDING_MODEL") {
        config.embedding.model = Some(model);
    }
    if let Some(model) = lookup("MODEL") {
        config.generation.model = model;
    }
    if let Some(base) = lookup("OPENAI_BASE_URL") {
        config.embedding.api_base = base.clone();
        config.generation.api_base = base;
    }
    if let Some(port) = lookup("PORT") {
        let port: u16 = port
            .parse()
            .with_context(|| format!("PORT must be a port number, got '{}'", port))?;
        let host = config
            .server
            .bind
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.server.bind = format!("{}:{}", host, port);
    }
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.size == 0 {
        anyhow::bail!("chunking.size must be > 0");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.generation.timeout_secs == 0 {
        anyhow::bail!("generation.timeout_secs must be > 0");
    }

    match config.embedding.provider.as_str() {
        "local" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local or openai.",
            other
        ),
    }

    Ok(())
}
