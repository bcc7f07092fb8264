//! In-memory [`VectorIndex`] implementation.
//!
//! Chunks live in a `Vec` behind `std::sync::RwLock`, in ingestion order.
//! Search is brute-force cosine similarity followed by a stable sort, which
//! is what gives ties their ingestion-order tiebreak.

use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{DocumentChunk, ScoredChunk};

use super::VectorIndex;

/// In-memory index for single-process use and tests.
pub struct InMemoryIndex {
    chunks: RwLock<Vec<DocumentChunk>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn insert(&self, chunks: Vec<DocumentChunk>) -> Result<()> {
        if let Some(bad) = chunks.iter().find(|c| c.embedding.is_empty()) {
            bail!("chunk {} has no embedding", bad.id);
        }
        let mut stored = self
            .chunks
            .write()
            .map_err(|_| anyhow!("index lock poisoned"))?;
        stored.extend(chunks);
        Ok(())
    }

    async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let stored = self
            .chunks
            .read()
            .map_err(|_| anyhow!("index lock poisoned"))?;

        let mut scored: Vec<(usize, f32)> = stored
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(query_vec, &c.embedding)))
            .collect();
        // sort_by is stable: equal scores keep ingestion order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: stored[i].clone(),
                score,
            })
            .collect())
    }

    async fn len(&self) -> usize {
        self.chunks.read().map(|c| c.len()).unwrap_or(0)
    }

    async fn clear(&self) -> Result<()> {
        self.chunks
            .write()
            .map_err(|_| anyhow!("index lock poisoned"))?
            .clear();
        Ok(())
    }
}
