//! Vector index abstraction for the retrieval subsystem.
//!
//! The [`VectorIndex`] trait is the seam between retrieval and storage.
//! The ingestion pipeline writes embedded [`DocumentChunk`]s; the retriever
//! reads the top-k most similar chunks for a query vector. Index contents
//! are owned exclusively by the implementation and never mutated after
//! insertion.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{DocumentChunk, ScoredChunk};

pub use memory::InMemoryIndex;

/// Pluggable similarity-search backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](VectorIndex::insert) | Append embedded chunks (ingestion order is preserved) |
/// | [`search`](VectorIndex::search) | Top-k chunks by descending similarity |
/// | [`len`](VectorIndex::len) | Number of indexed chunks |
/// | [`clear`](VectorIndex::clear) | Drop all chunks |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Append chunks. Every chunk must carry a non-empty embedding.
    async fn insert(&self, chunks: Vec<DocumentChunk>) -> Result<()>;

    /// Return at most `k` chunks ordered by descending similarity to
    /// `query_vec`. Ties keep ingestion order. An empty index or `k == 0`
    /// returns an empty vector rather than an error.
    async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// Number of indexed chunks.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn clear(&self) -> Result<()>;
}
