//! The `answer()` pipeline.
//!
//! ```text
//! query ──┬──▶ Retriever ──────────────┐
//!         └──▶ ToolSelector ─▶ Executor ┴─▶ Synthesizer ─▶ ConversationState
//! ```
//!
//! Retrieval and selection run concurrently. Only an empty query or a
//! synthesis failure fails the call; everything else degrades.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, info_span, Instrument};

use business_assistant_core::conversation::ConversationState;
use business_assistant_core::index::{InMemoryIndex, VectorIndex};
use business_assistant_core::models::{ConversationTurn, ToolResult};

use crate::config::{validate_credentials, Config, Credentials};
use crate::embedding::{create_embedder, Embedder};
use crate::error::AssistantError;
use crate::executor::ToolExecutor;
use crate::ingest::load_knowledge_base;
use crate::llm::{create_chat_model, ChatModel};
use crate::retrieval::Retriever;
use crate::retry::{duration_ms, RetryPolicy};
use crate::selector::{KeywordSelector, LlmSelector, ToolSelector};
use crate::synthesizer::Synthesizer;
use crate::tools::{build_registry, ToolContext, ToolRegistry};

/// Result of one [`Assistant::answer`] call.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub query_id: String,
    pub response: String,
    /// Tools invoked for this query, in call order.
    pub tools_used: Vec<String>,
    /// Retrieved document ids, then the tools that returned data.
    pub sources: Vec<String>,
    pub tool_results: Vec<ToolResult>,
    pub latency_ms: u64,
}

pub struct Assistant {
    retriever: Retriever,
    selector: Arc<dyn ToolSelector>,
    executor: ToolExecutor,
    synthesizer: Synthesizer,
    top_k: usize,
    window: usize,
}

impl Assistant {
    pub fn new(
        retriever: Retriever,
        selector: Arc<dyn ToolSelector>,
        executor: ToolExecutor,
        synthesizer: Synthesizer,
        top_k: usize,
        window: usize,
    ) -> Self {
        Self {
            retriever,
            selector,
            executor,
            synthesizer,
            top_k: top_k.max(1),
            window: window.max(1),
        }
    }

    /// Wire every component from configuration and load the knowledge base.
    pub async fn from_config(config: &Config, creds: &Credentials) -> anyhow::Result<Self> {
        validate_credentials(config, creds)?;

        let registry = Arc::new(build_registry(config, creds).await?);

        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding, creds)?);
        let index: Arc<dyn VectorIndex> = Arc::new(InMemoryIndex::new());
        if let Some(root) = &config.knowledge.root {
            load_knowledge_base(
                root,
                &config.knowledge,
                embedder.as_ref(),
                config.embedding.batch_size,
                index.as_ref(),
            )
            .await
            .with_context(|| format!("Failed to load knowledge base from {}", root.display()))?;
        }
        let retriever = Retriever::new(
            index,
            embedder,
            Duration::from_secs(config.embedding.timeout_secs),
        );

        let model: Arc<dyn ChatModel> = Arc::from(create_chat_model(&config.llm, creds)?);
        let selector: Arc<dyn ToolSelector> = match config.selector.strategy.as_str() {
            "llm" => Arc::new(LlmSelector::new(model.clone())),
            _ => Arc::new(KeywordSelector::new()),
        };

        let executor = ToolExecutor::new(
            registry,
            RetryPolicy::from(&config.executor),
            Duration::from_secs(config.executor.timeout_secs),
        );
        let synthesizer = Synthesizer::new(
            model,
            config.llm.temperature,
            config.retrieval.snippet_chars,
        );

        info!(
            llm = synthesizer.model_name(),
            selector = selector.name(),
            top_k = config.retrieval.top_k,
            "assistant ready"
        );

        Ok(Self::new(
            retriever,
            selector,
            executor,
            synthesizer,
            config.retrieval.top_k,
            config.conversation.window,
        ))
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.executor.registry()
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// A fresh conversation bounded by the configured window.
    pub fn new_session(&self) -> ConversationState {
        ConversationState::new(self.window)
    }

    /// Answer one query in the context of `session`.
    ///
    /// On success exactly one turn is appended to `session`. On failure the
    /// session is left untouched.
    pub async fn answer(
        &self,
        query: &str,
        session: &mut ConversationState,
    ) -> Result<Answer, AssistantError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AssistantError::InvalidQuery("query must not be empty".to_string()));
        }

        let query_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!("answer", query_id = %query_id);
        self.answer_inner(query, query_id, session).instrument(span).await
    }

    async fn answer_inner(
        &self,
        query: &str,
        query_id: String,
        session: &mut ConversationState,
    ) -> Result<Answer, AssistantError> {
        let started = Instant::now();
        let history = session.recent(self.window);
        let descriptors = self.registry().descriptors();

        let (retrieval, calls) = tokio::join!(
            self.retriever.retrieve_for(query, self.top_k, &query_id),
            self.selector.select(query, &history, &descriptors, &query_id),
        );

        let tool_results = self
            .executor
            .execute(&calls, &ToolContext::new(query_id.clone()))
            .await;

        let response = match self
            .synthesizer
            .synthesize(query, &retrieval, &tool_results, &history)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(query_id = %query_id, component = "synthesizer", error = %e, "query failed");
                return Err(e);
            }
        };

        let mut tools_used: Vec<String> = Vec::new();
        for call in &calls {
            if !tools_used.contains(&call.tool) {
                tools_used.push(call.tool.clone());
            }
        }

        let mut sources = retrieval.sources();
        for result in tool_results.iter().filter(|r| r.success) {
            if !sources.contains(&result.tool) {
                sources.push(result.tool.clone());
            }
        }

        session.append(ConversationTurn {
            query_id: query_id.clone(),
            query: query.to_string(),
            tools_used: tools_used.clone(),
            retrieval_summary: retrieval.summary(),
            response: response.clone(),
            timestamp: Utc::now(),
        });

        let latency_ms = duration_ms(started.elapsed());
        info!(
            query_id = %query_id,
            tools = ?tools_used,
            passages = retrieval.len(),
            failed_tools = tool_results.iter().filter(|r| !r.success).count(),
            latency_ms,
            "query answered"
        );

        Ok(Answer {
            query_id,
            response,
            tools_used,
            sources,
            tool_results,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::error::LlmError;
    use crate::llm::{ChatRequest, ChatResponse, ExtractiveModel};
    use crate::tools::CalculatorTool;
    use async_trait::async_trait;

    fn assistant_with(model: Arc<dyn ChatModel>) -> Assistant {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CalculatorTool));
        let retriever = Retriever::new(
            Arc::new(InMemoryIndex::new()),
            Arc::new(HashEmbedder::new(64)),
            Duration::from_secs(1),
        );
        Assistant::new(
            retriever,
            Arc::new(KeywordSelector::new()),
            ToolExecutor::new(
                Arc::new(registry),
                RetryPolicy::with_retries(0),
                Duration::from_secs(1),
            ),
            Synthesizer::new(model, 0.0, 500),
            3,
            4,
        )
    }

    #[tokio::test]
    async fn test_answer_appends_one_turn() {
        let assistant = assistant_with(Arc::new(ExtractiveModel));
        let mut session = assistant.new_session();

        let answer = assistant.answer("What is 15% of 200?", &mut session).await.unwrap();
        assert!(answer.response.contains("30"));
        assert_eq!(answer.tools_used, vec!["calculator".to_string()]);
        assert_eq!(answer.sources, vec!["calculator".to_string()]);
        assert_eq!(session.len(), 1);

        let turn = &session.recent(1)[0];
        assert_eq!(turn.query_id, answer.query_id);
        assert_eq!(turn.tools_used, answer.tools_used);
        assert_eq!(turn.retrieval_summary, "no passages");
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let assistant = assistant_with(Arc::new(ExtractiveModel));
        let mut session = assistant.new_session();
        let err = assistant.answer("   ", &mut session).await.unwrap_err();
        assert!(matches!(err, AssistantError::InvalidQuery(_)));
        assert!(session.is_empty());
    }

    struct DownModel;

    #[async_trait]
    impl ChatModel for DownModel {
        fn name(&self) -> &str {
            "down"
        }
        async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse, LlmError> {
            Err(LlmError::Fatal("HTTP 401".into()))
        }
    }

    #[tokio::test]
    async fn test_synthesis_failure_leaves_session_untouched() {
        let assistant = assistant_with(Arc::new(DownModel));
        let mut session = assistant.new_session();
        let err = assistant.answer("What is 15% of 200?", &mut session).await.unwrap_err();
        assert!(matches!(err, AssistantError::Synthesis(LlmError::Fatal(_))));
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_window_bounds_session() {
        let assistant = assistant_with(Arc::new(ExtractiveModel));
        let mut session = assistant.new_session();
        for i in 0..6 {
            assistant
                .answer(&format!("What is {}% of 100?", i + 1), &mut session)
                .await
                .unwrap();
        }
        assert_eq!(session.len(), 4);
        assert_eq!(session.total_appended(), 6);
        assert_eq!(session.recent(1)[0].query, "What is 6% of 100?");
    }
}
