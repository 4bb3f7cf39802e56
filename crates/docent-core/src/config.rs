//! Docent configuration system.
//!
//! Loaded from `~/.docent/config.toml` (or an explicit path), then overlaid
//! with `DOCENT_*` environment variables. Provider credentials may also come
//! from the provider's own variables (e.g. `OPENAI_API_KEY`); those are
//! resolved when the provider is constructed.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{DocentError, Result};
use crate::types::Metric;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DocentConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

const CONFIG_HEADER: &str = "\
# Docent configuration.
#
# DOCENT_* environment variables override values in this file, and provider
# keys such as OPENAI_API_KEY are read when api_key is left empty.
# [index] backend is \"sqlite\" (path) or \"qdrant\" (url + collection).
# [pipeline] empty_context is \"generate\" or \"canned\".
";

impl DocentConfig {
    /// Load config from the default path, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DocentError::Config(format!("Failed to read config: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| DocentError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = toml::to_string_pretty(self)
            .map_err(|e| DocentError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, format!("{CONFIG_HEADER}\n{body}"))?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Docent home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".docent")
    }

    /// Overlay values from the process environment.
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay `DOCENT_*` values obtained through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = text("DOCENT_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Some(v) = text("DOCENT_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = text("DOCENT_LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = text("DOCENT_LLM_ENDPOINT") {
            self.llm.endpoint = v;
        }
        if let Some(v) = parsed(&text, "DOCENT_TEMPERATURE")? {
            self.llm.temperature = v;
        }
        if let Some(v) = parsed(&text, "DOCENT_MAX_TOKENS")? {
            self.llm.max_tokens = v;
        }

        if let Some(v) = text("DOCENT_EMBEDDING_PROVIDER") {
            self.embedding.provider = v;
        }
        if let Some(v) = text("DOCENT_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = text("DOCENT_EMBEDDING_API_KEY") {
            self.embedding.api_key = v;
        }
        if let Some(v) = parsed(&text, "DOCENT_EMBEDDING_DIMENSIONS")? {
            self.embedding.dimensions = v;
        }

        if let Some(v) = parsed(&text, "DOCENT_INDEX_BACKEND")? {
            self.index.backend = v;
        }
        if let Some(v) = text("DOCENT_INDEX_PATH") {
            self.index.path = v;
        }
        if let Some(v) = text("DOCENT_INDEX_URL") {
            self.index.url = v;
        }
        if let Some(v) = text("DOCENT_INDEX_COLLECTION") {
            self.index.collection = v;
        }
        if let Some(v) = text("DOCENT_INDEX_NAME") {
            self.index.index_name = v;
        }
        if let Some(v) = parsed(&text, "DOCENT_INDEX_METRIC")? {
            self.index.metric = v;
        }
        if let Some(v) = text("DOCENT_INDEX_API_KEY") {
            self.index.api_key = v;
        }

        if let Some(v) = parsed(&text, "DOCENT_RETRIEVAL_K")? {
            self.retrieval.k = v;
        }
        if let Some(v) = parsed(&text, "DOCENT_TIMEOUT_SECS")? {
            self.pipeline.timeout_secs = v;
        }
        Ok(())
    }

    /// Check everything that can be checked without network access.
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.k == 0 {
            return Err(DocentError::Config("retrieval.k must be at least 1".into()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(DocentError::Config(format!(
                "llm.temperature {} outside [0, 2]",
                self.llm.temperature
            )));
        }
        if self.llm.max_tokens == 0 {
            return Err(DocentError::Config("llm.max_tokens must be positive".into()));
        }
        if self.llm.model.trim().is_empty() {
            return Err(DocentError::Config("llm.model is empty".into()));
        }
        if let Some(fb) = self.llm.fallbacks.iter().find(|f| f.model.trim().is_empty()) {
            return Err(DocentError::Config(format!(
                "fallback provider '{}' has no model",
                fb.provider
            )));
        }
        if self.embedding.model.trim().is_empty() {
            return Err(DocentError::Config("embedding.model is empty".into()));
        }
        if self.embedding.dimensions == 0 {
            return Err(DocentError::Config("embedding.dimensions must be positive".into()));
        }
        match self.index.backend {
            IndexBackend::Sqlite if self.index.path.trim().is_empty() => {
                return Err(DocentError::Config("index.path is required for sqlite".into()));
            }
            IndexBackend::Qdrant if self.index.url.trim().is_empty() => {
                return Err(DocentError::Config("index.url is required for qdrant".into()));
            }
            _ => {}
        }
        if self.index.collection.trim().is_empty() {
            return Err(DocentError::Config("index.collection is empty".into()));
        }
        if self.pipeline.timeout_secs == 0 {
            return Err(DocentError::Config("pipeline.timeout_secs must be positive".into()));
        }
        if self.pipeline.empty_context == EmptyContextPolicy::Canned
            && self.pipeline.canned_answer.trim().is_empty()
        {
            return Err(DocentError::Config(
                "pipeline.canned_answer is required when empty_context = \"canned\"".into(),
            ));
        }
        Ok(())
    }
}

fn parsed<T: FromStr>(
    text: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    text(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| DocentError::Config(format!("{key}: cannot parse '{raw}'")))
        })
        .transpose()
}

/// Chat model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Time allowed until the provider starts answering.
    #[serde(default = "default_first_byte_timeout")]
    pub first_byte_timeout_secs: u64,
    /// Longest silence tolerated between two stream chunks.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default)]
    pub fallbacks: Vec<FallbackConfig>,
}

fn default_llm_provider() -> String { "openrouter".into() }
fn default_llm_model() -> String { "openai/gpt-4o-mini".into() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 1024 }
fn default_connect_timeout() -> u64 { 10 }
fn default_first_byte_timeout() -> u64 { 30 }
fn default_idle_timeout() -> u64 { 30 }

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            api_key: String::new(),
            endpoint: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            connect_timeout_secs: default_connect_timeout(),
            first_byte_timeout_secs: default_first_byte_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            fallbacks: vec![],
        }
    }
}

/// A secondary chat provider tried when the primary cannot open a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
}

/// Embedding model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Send `dimensions` in the request (only models that support shortening).
    #[serde(default)]
    pub request_dimensions: bool,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

fn default_embedding_provider() -> String { "openai".into() }
fn default_embedding_model() -> String { "text-embedding-ada-002".into() }
fn default_dimensions() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_max_retries() -> usize { 3 }

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            api_key: String::new(),
            endpoint: String::new(),
            dimensions: default_dimensions(),
            request_dimensions: false,
            timeout_secs: default_embedding_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

/// Which vector index adapter to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    #[default]
    Sqlite,
    Qdrant,
}

impl FromStr for IndexBackend {
    type Err = DocentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "qdrant" => Ok(Self::Qdrant),
            other => Err(DocentError::Config(format!("unknown index backend '{other}'"))),
        }
    }
}

/// Vector index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackend,
    /// SQLite database file.
    #[serde(default = "default_index_path")]
    pub path: String,
    /// Connection string for remote backends (e.g. `http://localhost:6333`).
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Named vector to search; empty selects the collection's default vector.
    #[serde(default)]
    pub index_name: String,
    #[serde(default)]
    pub metric: Metric,
    /// Payload field carrying the passage text.
    #[serde(default = "default_text_key")]
    pub text_key: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
}

fn default_index_path() -> String { "~/.docent/index.db".into() }
fn default_collection() -> String { "passages".into() }
fn default_text_key() -> String { "text".into() }
fn default_index_timeout() -> u64 { 10 }

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            path: default_index_path(),
            url: String::new(),
            collection: default_collection(),
            index_name: String::new(),
            metric: Metric::default(),
            text_key: default_text_key(),
            api_key: String::new(),
            timeout_secs: default_index_timeout(),
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    /// Character budget for the rendered context; unset means unbounded.
    #[serde(default)]
    pub max_context_chars: Option<usize>,
}

fn default_k() -> usize { 4 }

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            max_context_chars: None,
        }
    }
}

/// What to do when retrieval yields no passages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmptyContextPolicy {
    /// Call the model with an explicit "no context" marker.
    #[default]
    Generate,
    /// Stream `canned_answer` without calling the model.
    Canned,
}

/// Pipeline-wide behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Wall-clock bound for one request, retrieval through last fragment.
    #[serde(default = "default_pipeline_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub empty_context: EmptyContextPolicy,
    #[serde(default = "default_canned_answer")]
    pub canned_answer: String,
    /// JSON-lines audit file for completions; empty disables it.
    #[serde(default)]
    pub audit_log: String,
}

fn default_pipeline_timeout() -> u64 { 60 }
fn default_canned_answer() -> String {
    "I could not find anything in the knowledge base that answers this question.".into()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_pipeline_timeout(),
            empty_context: EmptyContextPolicy::default(),
            canned_answer: default_canned_answer(),
            audit_log: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = DocentConfig::default();
        assert_eq!(config.llm.provider, "openrouter");
        assert_eq!(config.llm.model, "openai/gpt-4o-mini");
        assert!((config.llm.temperature - 0.7).abs() < 0.01);
        assert_eq!(config.llm.max_tokens, 1024);
        assert_eq!(config.retrieval.k, 4);
        assert_eq!(config.index.metric, Metric::Cosine);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [llm]
            provider = "ollama"
            model = "llama3.2"
            temperature = 0.2

            [[llm.fallbacks]]
            provider = "openai"
            model = "gpt-4o-mini"

            [index]
            backend = "qdrant"
            url = "http://localhost:6333"
            collection = "nba"
            metric = "dot"

            [retrieval]
            k = 6
            max_context_chars = 8000

            [pipeline]
            empty_context = "canned"
        "#;

        let config: DocentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.fallbacks.len(), 1);
        assert_eq!(config.index.backend, IndexBackend::Qdrant);
        assert_eq!(config.index.metric, Metric::Dot);
        assert_eq!(config.retrieval.max_context_chars, Some(8000));
        assert_eq!(config.pipeline.empty_context, EmptyContextPolicy::Canned);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: DocentConfig = toml::from_str("").unwrap();
        assert_eq!(config.embedding.dimensions, 1536);
        assert_eq!(config.pipeline.timeout_secs, 60);
    }

    #[test]
    fn test_unknown_metric_rejected_at_parse() {
        let toml_str = "[index]\nmetric = \"euclid\"\n";
        assert!(toml::from_str::<DocentConfig>(toml_str).is_err());
    }

    #[test]
    fn test_env_overlay() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DOCENT_LLM_MODEL", "gpt-4o"),
            ("DOCENT_RETRIEVAL_K", "8"),
            ("DOCENT_INDEX_METRIC", "dot"),
            ("DOCENT_INDEX_URL", "http://qdrant:6333"),
            ("DOCENT_LLM_API_KEY", "  "),
        ]);
        let mut config = DocentConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.retrieval.k, 8);
        assert_eq!(config.index.metric, Metric::Dot);
        assert_eq!(config.index.url, "http://qdrant:6333");
        assert!(config.llm.api_key.is_empty());
    }

    #[test]
    fn test_env_overlay_rejects_garbage() {
        let mut config = DocentConfig::default();
        let err = config
            .apply_env(|k| (k == "DOCENT_RETRIEVAL_K").then(|| "four".to_string()))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_validate_failures() {
        let mut config = DocentConfig::default();
        config.retrieval.k = 0;
        assert!(config.validate().is_err());

        let mut config = DocentConfig::default();
        config.llm.temperature = 3.0;
        assert!(config.validate().is_err());

        let mut config = DocentConfig::default();
        config.index.backend = IndexBackend::Qdrant;
        assert!(config.validate().is_err());

        let mut config = DocentConfig::default();
        config.pipeline.empty_context = EmptyContextPolicy::Canned;
        config.pipeline.canned_answer.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_roundtrip() {
        let path = std::env::temp_dir().join("docent-test-config").join("config.toml");
        let mut config = DocentConfig::default();
        config.retrieval.k = 7;
        config.save_to(&path).unwrap();
        let loaded = DocentConfig::load_from(&path).unwrap();
        assert_eq!(loaded.retrieval.k, 7);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_home_dir() {
        let home = DocentConfig::home_dir();
        assert!(home.to_string_lossy().contains("docent"));
    }
}
