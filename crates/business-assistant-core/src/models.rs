//! Core data models used throughout Business Assistant.
//!
//! These types represent the knowledge-base chunks, retrieval hits, tool
//! descriptors, tool calls and results, and conversation turns that flow
//! through one `answer()` call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A unit of retrievable knowledge-base text.
///
/// Created once at ingestion time and immutable afterwards. The `embedding`
/// is empty until the ingestion pipeline fills it in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Deterministic id: `"{document_id}#{chunk_index}"`.
    pub id: String,
    /// Source document identifier (path relative to the knowledge root).
    pub document_id: String,
    /// Position of this chunk within its document, starting at 0.
    pub chunk_index: i64,
    /// Byte offset of the chunk's first new content in the source text.
    pub offset: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

/// A chunk paired with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Ordered retrieval hits, relevance-descending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Distinct document ids, in the order they first appear.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = Vec::new();
        for hit in &self.hits {
            if !sources.contains(&hit.chunk.document_id) {
                sources.push(hit.chunk.document_id.clone());
            }
        }
        sources
    }

    /// One-line summary stored on the conversation turn.
    pub fn summary(&self) -> String {
        if self.hits.is_empty() {
            return "no passages".to_string();
        }
        format!(
            "{} passage(s) from {}",
            self.hits.len(),
            self.sources().join(", ")
        )
    }
}

/// Static description of a tool, used by the selector and listed to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// Tool category (`"calculator"`, `"weather"`, `"crm"`, `"notes"`, ...).
    pub category: String,
    /// Whether invoking the tool changes external state.
    pub mutating: bool,
    /// JSON Schema object describing the parameters.
    pub parameters: Value,
}

/// One selected tool invocation. Consumed exactly once by the executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    /// The query this call was selected for.
    pub query_id: String,
    pub tool: String,
    pub arguments: Value,
}

/// The outcome of one [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    /// Id of the [`ToolCall`] that produced this result.
    pub call_id: String,
    pub tool: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of attempts made, including retries.
    pub attempts: u32,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, payload: Value, attempts: u32) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.tool.clone(),
            success: true,
            payload: Some(payload),
            error: None,
            attempts,
        }
    }

    pub fn failed(call: &ToolCall, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            call_id: call.id.clone(),
            tool: call.tool.clone(),
            success: false,
            payload: None,
            error: Some(error.into()),
            attempts,
        }
    }
}

/// One completed query/response exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query_id: String,
    pub query: String,
    pub tools_used: Vec<String>,
    pub retrieval_summary: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(doc: &str, idx: i64) -> DocumentChunk {
        DocumentChunk {
            id: format!("{}#{}", doc, idx),
            document_id: doc.to_string(),
            chunk_index: idx,
            offset: 0,
            text: "text".to_string(),
            hash: String::new(),
            embedding: vec![],
        }
    }

    #[test]
    fn test_sources_dedup_in_order() {
        let result = RetrievalResult {
            hits: vec![
                ScoredChunk { chunk: chunk("b.txt", 0), score: 0.9 },
                ScoredChunk { chunk: chunk("a.txt", 0), score: 0.8 },
                ScoredChunk { chunk: chunk("b.txt", 1), score: 0.7 },
            ],
        };
        assert_eq!(result.sources(), vec!["b.txt", "a.txt"]);
        assert_eq!(result.summary(), "3 passage(s) from b.txt, a.txt");
    }

    #[test]
    fn test_tool_result_traces_call() {
        let call = ToolCall {
            id: "call-1".into(),
            query_id: "q-1".into(),
            tool: "calculator".into(),
            arguments: json!({}),
        };
        let ok = ToolResult::ok(&call, json!({"result": 30}), 1);
        assert_eq!(ok.call_id, "call-1");
        assert!(ok.success);

        let failed = ToolResult::failed(&call, "timed out", 3);
        assert_eq!(failed.call_id, "call-1");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("timed out"));
        assert_eq!(failed.attempts, 3);
    }
}
