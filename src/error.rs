//! Error taxonomy for the orchestration pipeline.
//!
//! Only [`AssistantError::Synthesis`] and [`AssistantError::InvalidQuery`]
//! ever reach the caller of `answer()`. The other variants describe
//! degraded-but-recoverable conditions: they are logged with the query id
//! and then absorbed (empty retrieval, a dropped tool call, a failed
//! [`ToolResult`](business_assistant_core::models::ToolResult)).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Index empty or unreachable, or the query could not be embedded.
    #[error("retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Argument extraction for one tool failed; that tool is dropped.
    #[error("tool selection failed for '{tool}': {message}")]
    ToolSelection { tool: String, message: String },

    /// A tool call failed after retries.
    #[error("tool '{tool}' failed: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: ToolError,
    },

    /// The generative call failed. Fatal to the current query.
    #[error("synthesis failed: {0}")]
    Synthesis(#[from] LlmError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Failure of a single tool invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// Parameters violate the tool's schema or semantics. Not retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Network error, rate limit, or server error. Retried with backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The call did not finish within the executor's timeout. Retried.
    #[error("timed out after {0} ms")]
    Timeout(u64),

    /// The referenced record does not exist. Not retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other non-transient failure. Not retried.
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolError::Transient(_) | ToolError::Timeout(_))
    }
}

/// Failure of a chat-model call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    /// Rate limit, server error, network error, or timeout.
    #[error("transient model error: {0}")]
    Transient(String),

    /// Authentication or request error. Not retried.
    #[error("model error: {0}")]
    Fatal(String),

    /// The provider answered with something we could not parse.
    #[error("malformed model response: {0}")]
    Malformed(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Transient(_) | LlmError::Malformed(_))
    }
}

/// Map an HTTP status from an external API to a tool error.
///
/// 429 and 5xx are transient, 404 is `NotFound`, other 4xx are permanent.
pub fn classify_tool_status(status: u16, body: &str) -> ToolError {
    let detail = format!("HTTP {}: {}", status, truncate(body, 200));
    match status {
        429 => ToolError::Transient(detail),
        404 => ToolError::NotFound(detail),
        s if s >= 500 => ToolError::Transient(detail),
        400 | 422 => ToolError::InvalidInput(detail),
        _ => ToolError::Failed(detail),
    }
}

/// Map an HTTP status from the model provider to an [`LlmError`].
pub fn classify_llm_status(status: u16, body: &str) -> LlmError {
    let detail = format!("HTTP {}: {}", status, truncate(body, 200));
    if status == 429 || status >= 500 {
        LlmError::Transient(detail)
    } else {
        LlmError::Fatal(detail)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
