//! Configuration loading and validation.
//!
//! ChatVat reads one configuration document at start-up: JSON
//! (`chatvat.config.json`, the default) or TOML when the path ends in
//! `.toml`. Only `bot_name` is required; every table has defaults.
//!
//! ```json
//! {
//!   "bot_name": "EventBot",
//!   "port": 8000,
//!   "refresh_interval_minutes": 60,
//!   "sources": [
//!     { "type": "static_url", "target": "https://example.com/schedule" },
//!     { "type": "dynamic_json", "target": "https://api.example.com/events",
//!       "headers": { "Authorization": "Bearer ${EVENTS_TOKEN}" } },
//!     { "type": "local_file", "target": "./docs/faq.pdf" }
//!   ]
//! }
//! ```
//!
//! Header values may reference environment variables as `${NAME}`; they are
//! substituted at load time and unset variables are left verbatim. Resolved
//! values never reach a log line: [`SourceConfig`]'s `Debug` prints header
//! names only.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use chatvat_core::chunk::ChunkOptions;
use chatvat_core::fingerprint::NormalizeOptions;
use chatvat_core::models::{Source, SourceKind};
use chatvat_core::search::DistanceMetric;
use chatvat_core::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./chatvat.config.json";

/// Smallest accepted `chunking.max_chunk_chars`.
const MIN_CHUNK_CHARS: usize = 16;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub bot_name: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Minutes between refresh cycles; `0` disables the timer.
    #[serde(default)]
    pub refresh_interval_minutes: u64,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_llm_model() -> String {
    "llama-3.1-70b-versatile".to_string()
}
fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

#[derive(Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub target: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SourceConfig {
    pub fn to_source(&self) -> Source {
        let mut source = Source::new(self.kind, self.target.trim());
        if let Some(id) = self.id.as_deref().filter(|id| !id.trim().is_empty()) {
            source = source.with_id(id.trim());
        }
        source.headers = self.headers.clone();
        source
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./data/chatvat.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
    /// Lowercase text before fingerprinting.
    #[serde(default)]
    pub case_fold: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            overlap_chars: default_overlap_chars(),
            case_fold: false,
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> ChunkOptions {
        ChunkOptions {
            max_chunk_chars: self.max_chunk_chars,
            overlap_chars: self.overlap_chars,
            normalize: NormalizeOptions {
                case_fold: self.case_fold,
            },
        }
    }
}

fn default_max_chunk_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub metric: DistanceMetric,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            metric: DistanceMetric::default(),
            max_context_chars: default_max_context_chars(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_context_chars() -> usize {
    6000
}
fn default_query_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Required for `openai` and `ollama`; inferred for `local`.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override (Ollama, OpenAI-compatible proxies).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key; defaults per provider.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_provider(),
            base_url: None,
            api_key_env: None,
            max_retries: 0,
            timeout_secs: default_completion_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_completion_provider() -> String {
    "groq".to_string()
}
fn default_completion_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    /// Delay before the first cycle after `serve` starts.
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Retire entries not confirmed for this many days. Unset keeps
    /// everything forever.
    #[serde(default)]
    pub retention_days: Option<u32>,
    #[serde(default = "default_store_retries")]
    pub store_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            retention_days: None,
            store_retries: default_store_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

fn default_initial_delay_secs() -> u64 {
    5
}
fn default_store_retries() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    250
}
fn default_backoff_max_ms() -> u64 {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Permit `static_url` / `dynamic_json` targets on loopback or private
    /// networks.
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            allow_private_hosts: false,
        }
    }
}

impl Config {
    /// Sources with resolved headers, in configuration order.
    pub fn resolved_sources(&self) -> Vec<Source> {
        self.sources.iter().map(SourceConfig::to_source).collect()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parse a configuration document without touching the filesystem.
    pub fn from_str_with(
        content: &str,
        format: ConfigFormat,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Config, Error> {
        let mut config: Config = match format {
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| Error::ConfigInvalid(format!("failed to parse config: {}", e)))?,
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| Error::ConfigInvalid(format!("failed to parse config: {}", e)))?,
        };

        for source in &mut config.sources {
            for value in source.headers.values_mut() {
                *value = expand_env(value, &env);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| Err(Error::ConfigInvalid(msg));

        if self.bot_name.trim().is_empty() {
            return invalid("bot_name must not be empty".into());
        }

        if self.chunking.max_chunk_chars < MIN_CHUNK_CHARS {
            return invalid(format!(
                "chunking.max_chunk_chars must be >= {}",
                MIN_CHUNK_CHARS
            ));
        }
        if self.chunking.overlap_chars >= self.chunking.max_chunk_chars {
            return invalid("chunking.overlap_chars must be < chunking.max_chunk_chars".into());
        }

        if self.retrieval.top_k == 0 {
            return invalid("retrieval.top_k must be >= 1".into());
        }
        if self.retrieval.max_context_chars == 0 {
            return invalid("retrieval.max_context_chars must be > 0".into());
        }
        if self.retrieval.query_timeout_secs == 0 {
            return invalid("retrieval.query_timeout_secs must be > 0".into());
        }

        match self.embedding.provider.as_str() {
            "local" | "disabled" => {}
            "openai" | "ollama" => {
                if self.embedding.dims.unwrap_or(0) == 0 {
                    return invalid(format!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    ));
                }
            }
            other => {
                return invalid(format!(
                    "unknown embedding provider: '{}'. Must be local, openai, ollama, or disabled.",
                    other
                ))
            }
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be >= 1".into());
        }

        match self.completion.provider.as_str() {
            "groq" | "openai" | "ollama" | "disabled" => {}
            other => {
                return invalid(format!(
                    "unknown completion provider: '{}'. Must be groq, openai, ollama, or disabled.",
                    other
                ))
            }
        }

        if self.refresh.backoff_base_ms > self.refresh.backoff_max_ms {
            return invalid("refresh.backoff_base_ms must be <= refresh.backoff_max_ms".into());
        }
        if self.refresh.retention_days == Some(0) {
            return invalid("refresh.retention_days must be >= 1 when set".into());
        }

        let mut seen = std::collections::HashSet::new();
        for (i, source) in self.sources.iter().enumerate() {
            if source.target.trim().is_empty() {
                return invalid(format!("sources[{}].target must not be empty", i));
            }
            if matches!(source.kind, SourceKind::StaticUrl | SourceKind::DynamicJson)
                && reqwest::Url::parse(source.target.trim()).is_err()
            {
                return invalid(format!(
                    "sources[{}].target is not a valid URL: {}",
                    i, source.target
                ));
            }
            let id = source.to_source().id;
            if !seen.insert(id.clone()) {
                return invalid(format!("duplicate source id: {}", id));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Load, substitute and validate the configuration at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = Config::from_str_with(&content, ConfigFormat::from_path(path), |name| {
        std::env::var(name).ok()
    })?;

    tracing::info!(
        path = %path.display(),
        bot = %config.bot_name,
        sources = config.sources.len(),
        "configuration loaded"
    );
    Ok(config)
}

static ENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference pattern is valid")
});

/// Replace `${NAME}` with `env(NAME)`; unresolved references stay as written.
pub fn expand_env(value: &str, env: impl Fn(&str) -> Option<String>) -> String {
    ENV_REF
        .replace_all(value, |caps: &regex::Captures<'_>| {
            env(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
