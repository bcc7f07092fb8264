//! Embedding provider abstraction and implementations.
//!
//! - **[`HashEmbedder`]**: deterministic feature-hashing embeddings; offline, no credentials.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`DisabledEmbedder`]**: returns errors; retrieval then degrades to empty context.
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to instantiate the configured provider:
//!
//! ```rust
//! # use business_assistant::config::{Credentials, EmbeddingConfig};
//! # use business_assistant::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "hash"
//! let embedder = create_embedder(&config, &Credentials::default()).unwrap();
//! assert_eq!(embedder.model_name(), "hash");
//! ```
//!
//! # Retry Strategy
//!
//! The OpenAI provider retries HTTP 429, 5xx, and network errors with
//! exponential backoff; other 4xx responses fail immediately.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use business_assistant_core::embedding::hash_embed;

use crate::config::{Credentials, EmbeddingConfig, Secret};
use crate::error::{classify_llm_status, LlmError};
use crate::retry::{retry_async, RetryPolicy};

/// Default dimensionality for the hashing embedder.
pub const DEFAULT_HASH_DIMS: usize = 384;

/// Turns text into vectors in one shared space.
///
/// The same embedder must be used for ingestion and for queries.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts. Output order matches input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embedder.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

/// Instantiate the provider named by `config.provider`.
pub fn create_embedder(config: &EmbeddingConfig, creds: &Credentials) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Box::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => {
            let key = creds
                .openai
                .clone()
                .ok_or_else(|| anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Ok(Box::new(OpenAIEmbedder::new(config, key)?))
        }
        "disabled" => Ok(Box::new(DisabledEmbedder)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Hash Embedder ============

pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dims)).collect())
    }
}

// ============ Disabled Embedder ============

/// Used when `embedding.provider = "disabled"`. Every call fails.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ OpenAI Embedder ============

/// Embedding provider using `POST {base_url}/embeddings`.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    base_url: String,
    api_key: Secret,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: Secret) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config.dims.unwrap_or(1536);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            dims,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            policy: RetryPolicy::with_retries(config.max_retries),
        })
    }

    async fn embed_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_llm_status(status.as_u16(), &text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let (result, _attempts) = retry_async(
            &self.policy,
            "openai_embeddings",
            LlmError::is_retryable,
            || self.embed_once(texts),
        )
        .await;
        Ok(result?)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, LlmError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| LlmError::Malformed("missing data array".to_string()))?;

    let mut indexed: Vec<(u64, Vec<f32>)> = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| LlmError::Malformed("missing embedding".to_string()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}
