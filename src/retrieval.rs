//! Query-time retrieval over the vector index.
//!
//! Retrieval never fails the query. An empty index, an empty query, an
//! embedding error or a timeout all produce an empty [`RetrievalResult`];
//! the non-empty failure cases are logged as `RetrievalUnavailable`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use business_assistant_core::index::VectorIndex;
use business_assistant_core::models::RetrievalResult;

use crate::embedding::{embed_query, Embedder};
use crate::error::AssistantError;

pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    timeout: Duration,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self {
            index,
            embedder,
            timeout,
        }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Top-`k` passages for `query`, relevance-descending.
    pub async fn retrieve(&self, query: &str, k: usize) -> RetrievalResult {
        self.retrieve_for(query, k, "-").await
    }

    /// Like [`retrieve`](Self::retrieve), tagging log events with `query_id`.
    pub async fn retrieve_for(&self, query: &str, k: usize, query_id: &str) -> RetrievalResult {
        if query.trim().is_empty() || k == 0 {
            return RetrievalResult::empty();
        }
        if self.index.is_empty().await {
            debug!(query_id, "index empty, skipping retrieval");
            return RetrievalResult::empty();
        }

        match self.try_retrieve(query, k).await {
            Ok(result) => {
                debug!(query_id, hits = result.len(), "retrieval complete");
                result
            }
            Err(err) => {
                warn!(query_id, component = "retrieval", error = %err, "continuing without context");
                RetrievalResult::empty()
            }
        }
    }

    async fn try_retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult, AssistantError> {
        let query_vec = tokio::time::timeout(self.timeout, embed_query(self.embedder.as_ref(), query))
            .await
            .map_err(|_| {
                AssistantError::RetrievalUnavailable(format!(
                    "query embedding timed out after {} ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|e| AssistantError::RetrievalUnavailable(format!("embedding failed: {:#}", e)))?;

        let hits = self
            .index
            .search(&query_vec, k)
            .await
            .map_err(|e| AssistantError::RetrievalUnavailable(format!("index search failed: {:#}", e)))?;

        Ok(RetrievalResult { hits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DisabledEmbedder, HashEmbedder};
    use business_assistant_core::chunk::chunk_text;
    use business_assistant_core::embedding::hash_embed;
    use business_assistant_core::index::InMemoryIndex;

    async fn seeded_index(docs: &[(&str, &str)]) -> Arc<InMemoryIndex> {
        let index = Arc::new(InMemoryIndex::new());
        for (id, text) in docs {
            let mut chunks = chunk_text(id, text, 1000, 200);
            for c in &mut chunks {
                c.embedding = hash_embed(&c.text, 64);
            }
            index.insert(chunks).await.unwrap();
        }
        index
    }

    #[tokio::test]
    async fn test_retrieve_at_most_k_sorted() {
        let index = seeded_index(&[
            ("refunds.txt", "Refund policy: refunds are issued within 30 days of purchase."),
            ("shipping.txt", "Shipping takes five business days for domestic orders."),
            ("hours.txt", "Support hours are nine to five on weekdays."),
        ])
        .await;
        let retriever = Retriever::new(index, Arc::new(HashEmbedder::new(64)), Duration::from_secs(1));

        let result = retriever.retrieve("what is the refund policy", 2).await;
        assert!(result.len() <= 2);
        assert_eq!(result.hits[0].chunk.document_id, "refunds.txt");
        for pair in result.hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty() {
        let retriever = Retriever::new(
            Arc::new(InMemoryIndex::new()),
            Arc::new(HashEmbedder::new(64)),
            Duration::from_secs(1),
        );
        assert!(retriever.retrieve("anything", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades_to_empty() {
        let index = seeded_index(&[("a.txt", "alpha beta gamma")]).await;
        let retriever = Retriever::new(index, Arc::new(DisabledEmbedder), Duration::from_secs(1));
        assert!(retriever.retrieve("alpha", 3).await.is_empty());
    }

    #[tokio::test]
    async fn test_blank_query_or_zero_k() {
        let index = seeded_index(&[("a.txt", "alpha beta gamma")]).await;
        let retriever = Retriever::new(index, Arc::new(HashEmbedder::new(64)), Duration::from_secs(1));
        assert!(retriever.retrieve("   ", 3).await.is_empty());
        assert!(retriever.retrieve("alpha", 0).await.is_empty());
    }
}
