//! TOML configuration parsing and validation.
//!
//! Every section has defaults, so a minimal config file can be empty.
//! API credentials never live in the file: they come from the environment
//! (see [`Credentials`]) and are wrapped in [`Secret`] so they cannot leak
//! through `Debug` output or log fields.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub selector: SelectorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `"openai"` or `"extractive"` (offline, answers from evidence only).
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            base_url: default_openai_base_url(),
        }
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4-turbo-preview".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"hash"`, `"openai"`, or `"disabled"`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout_secs(),
            base_url: default_openai_base_url(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Passages are truncated to this many characters in the prompt.
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_snippet_chars() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct KnowledgeConfig {
    /// Directory loaded into the index at startup, if set.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            root: None,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            chunk_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string(), "**/*.md".to_string()]
}
fn default_chunk_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    #[serde(default = "default_window")]
    pub window: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
        }
    }
}

fn default_window() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct SelectorConfig {
    /// `"keyword"` or `"llm"`.
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
        }
    }
}

fn default_strategy() -> String {
    "keyword".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_tool_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
            max_retries: default_tool_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    15
}
fn default_tool_retries() -> u32 {
    2
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolsConfig {
    #[serde(default = "default_notes_db")]
    pub notes_db: PathBuf,
    #[serde(default = "default_weather_base_url")]
    pub weather_base_url: String,
    #[serde(default = "default_crm_base_url")]
    pub crm_base_url: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            notes_db: default_notes_db(),
            weather_base_url: default_weather_base_url(),
            crm_base_url: default_crm_base_url(),
        }
    }
}

fn default_notes_db() -> PathBuf {
    PathBuf::from("./data/notes.sqlite")
}
fn default_weather_base_url() -> String {
    "https://api.openweathermap.org/data/2.5".to_string()
}
fn default_crm_base_url() -> String {
    "https://api.hubapi.com".to_string()
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

/// A credential value that never prints.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// API credentials read from the environment.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// `OPENAI_API_KEY`: chat model and OpenAI embeddings.
    pub openai: Option<Secret>,
    /// `WEATHER_API_KEY`: weather tools.
    pub weather: Option<Secret>,
    /// `HUBSPOT_ACCESS_TOKEN`: CRM tools.
    pub crm: Option<Secret>,
}

impl Credentials {
    pub fn from_env() -> Self {
        fn read(name: &str) -> Option<Secret> {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(Secret::new)
        }
        Self {
            openai: read("OPENAI_API_KEY"),
            weather: read("WEATHER_API_KEY"),
            crm: read("HUBSPOT_ACCESS_TOKEN"),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check value ranges and provider names.
pub fn validate(config: &Config) -> Result<()> {
    match config.llm.provider.as_str() {
        "openai" | "extractive" => {}
        other => bail!(
            "Unknown llm provider: '{}'. Must be openai or extractive.",
            other
        ),
    }
    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }

    match config.embedding.provider.as_str() {
        "hash" | "openai" | "disabled" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, or disabled.",
            other
        ),
    }
    if config.embedding.provider == "openai" && config.embedding.model.is_none() {
        bail!("embedding.model must be specified when provider is 'openai'");
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.knowledge.chunk_chars == 0 {
        bail!("knowledge.chunk_chars must be > 0");
    }
    if config.knowledge.overlap_chars >= config.knowledge.chunk_chars {
        bail!("knowledge.overlap_chars must be smaller than knowledge.chunk_chars");
    }

    if config.conversation.window < 1 {
        bail!("conversation.window must be >= 1");
    }

    match config.selector.strategy.as_str() {
        "keyword" | "llm" => {}
        other => bail!(
            "Unknown selector strategy: '{}'. Must be keyword or llm.",
            other
        ),
    }

    if config.executor.timeout_secs == 0 {
        bail!("executor.timeout_secs must be > 0");
    }
    if config.executor.backoff_multiplier < 1.0 {
        bail!("executor.backoff_multiplier must be >= 1.0");
    }

    Ok(())
}

/// Check that the credentials needed by the configured providers exist.
///
/// Tool categories are not checked here: a missing tool credential only
/// keeps that category out of the registry.
pub fn validate_credentials(config: &Config, creds: &Credentials) -> Result<()> {
    if config.llm.provider == "openai" && creds.openai.is_none() {
        bail!("OPENAI_API_KEY environment variable not set (required by llm.provider = 'openai')");
    }
    if config.embedding.provider == "openai" && creds.openai.is_none() {
        bail!(
            "OPENAI_API_KEY environment variable not set (required by embedding.provider = 'openai')"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.knowledge.chunk_chars, 1000);
        assert_eq!(config.knowledge.overlap_chars, 200);
        assert_eq!(config.conversation.window, 10);
        assert_eq!(config.selector.strategy, "keyword");
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.llm.model, "gpt-4-turbo-preview");
    }

    #[test]
    fn test_rejects_zero_top_k() {
        let err = parse("[retrieval]\ntop_k = 0\n").unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }

    #[test]
    fn test_rejects_overlap_not_smaller_than_chunk() {
        let err = parse("[knowledge]\nchunk_chars = 100\noverlap_chars = 100\n").unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        let err = parse("[selector]\nstrategy = \"dice\"\n").unwrap_err();
        assert!(err.to_string().contains("dice"));
    }

    #[test]
    fn test_openai_embedding_requires_model() {
        let err = parse("[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_credentials_required_for_openai_llm() {
        let config = parse("").unwrap();
        let err = validate_credentials(&config, &Credentials::default()).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        let offline = parse("[llm]\nprovider = \"extractive\"\n").unwrap();
        assert!(validate_credentials(&offline, &Credentials::default()).is_ok());
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let creds = Credentials {
            openai: Some(Secret::new("sk-very-secret")),
            ..Default::default()
        };
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("sk-very-secret"));
        assert!(printed.contains("***"));
    }
}
