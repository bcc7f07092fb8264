//! Evidence assembly and the final generative call.
//!
//! The prompt carries four sections: recent conversation, retrieved
//! passages, labelled tool results, and the question. The system prompt
//! restricts the model to that evidence. After the call,
//! [`ungrounded_numbers`] flags numbers in the answer that appear nowhere
//! in the evidence.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use business_assistant_core::models::{ConversationTurn, RetrievalResult, ToolResult};

use crate::error::{AssistantError, LlmError};
use crate::llm::{ChatMessage, ChatModel, ChatRequest};

pub const HISTORY_HEADER: &str = "=== Conversation History ===";
pub const KNOWLEDGE_HEADER: &str = "=== Knowledge Base ===";
pub const TOOLS_HEADER: &str = "=== Tool Results ===";
pub const QUESTION_HEADER: &str = "=== Question ===";

const SYSTEM_PROMPT: &str = "You are a business intelligence assistant. Answer the question \
using only the evidence provided in the Knowledge Base and Tool Results sections and the \
conversation so far.
Rules:
- Ground every factual claim in the supplied evidence and cite its source (document name or tool name).
- Never invent numbers, names or dates. Every number you state must appear in the evidence.
- If a tool is marked [FAILED], say explicitly that this data is currently unavailable. Do not guess a value.
- If the evidence does not answer the question, say so plainly.
- Be concise and give actionable recommendations where the evidence supports them.";

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:,\d{3})*(?:\.\d+)?").expect("valid regex"));

pub struct Synthesizer {
    model: Arc<dyn ChatModel>,
    temperature: f32,
    snippet_chars: usize,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn ChatModel>, temperature: f32, snippet_chars: usize) -> Self {
        Self {
            model,
            temperature,
            snippet_chars,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Produce the final answer. A model failure is fatal to the query.
    pub async fn synthesize(
        &self,
        query: &str,
        retrieval: &RetrievalResult,
        tool_results: &[ToolResult],
        history: &[ConversationTurn],
    ) -> Result<String, AssistantError> {
        let prompt = build_prompt(query, retrieval, tool_results, history, self.snippet_chars);
        debug!(
            model = self.model.name(),
            passages = retrieval.len(),
            tool_results = tool_results.len(),
            history = history.len(),
            prompt_chars = prompt.len(),
            "synthesizing"
        );

        let request = ChatRequest {
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            tools: Vec::new(),
            temperature: self.temperature,
        };
        let response = self.model.complete(&request).await?;

        let content = response.content.trim().to_string();
        if content.is_empty() {
            return Err(LlmError::Malformed("empty completion".to_string()).into());
        }

        let evidence = evidence_text(query, retrieval, tool_results);
        let ungrounded = ungrounded_numbers(&content, &evidence);
        if !ungrounded.is_empty() {
            warn!(
                component = "synthesizer",
                numbers = ?ungrounded,
                "response contains numbers not found in evidence"
            );
        }

        Ok(content)
    }
}

/// Render the user prompt. Every section is always present.
pub fn build_prompt(
    query: &str,
    retrieval: &RetrievalResult,
    tool_results: &[ToolResult],
    history: &[ConversationTurn],
    snippet_chars: usize,
) -> String {
    let mut out = String::new();

    out.push_str(HISTORY_HEADER);
    out.push('\n');
    if history.is_empty() {
        out.push_str("(none)\n");
    }
    for turn in history {
        out.push_str(&format!("User: {}\n", one_line(&turn.query)));
        out.push_str(&format!("Assistant: {}\n", one_line(&turn.response)));
    }

    out.push('\n');
    out.push_str(KNOWLEDGE_HEADER);
    out.push('\n');
    if retrieval.is_empty() {
        out.push_str("(none)\n");
    }
    for (i, hit) in retrieval.hits.iter().enumerate() {
        let snippet: String = hit.chunk.text.chars().take(snippet_chars).collect();
        out.push_str(&format!(
            "[{}] Source: {} (score {:.2})\n{}\n\n",
            i + 1,
            hit.chunk.document_id,
            hit.score,
            snippet.trim()
        ));
    }

    out.push('\n');
    out.push_str(TOOLS_HEADER);
    out.push('\n');
    if tool_results.is_empty() {
        out.push_str("(none)\n");
    }
    for result in tool_results {
        if result.success {
            let payload = result
                .payload
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "null".to_string());
            out.push_str(&format!("[OK] {}: {}\n", result.tool, payload));
        } else {
            out.push_str(&format!(
                "[FAILED] {}: {}\n",
                result.tool,
                one_line(result.error.as_deref().unwrap_or("unknown error"))
            ));
        }
    }

    out.push('\n');
    out.push_str(QUESTION_HEADER);
    out.push('\n');
    out.push_str(query.trim());
    out.push('\n');
    out
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text a numeric claim may legitimately come from: the query, retrieved
/// passages and successful tool payloads.
pub fn evidence_text(query: &str, retrieval: &RetrievalResult, tool_results: &[ToolResult]) -> String {
    let mut parts = vec![query.to_string()];
    parts.extend(retrieval.hits.iter().map(|h| h.chunk.text.clone()));
    parts.extend(
        tool_results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.payload.as_ref().map(|p| p.to_string())),
    );
    parts.join("\n")
}

/// Numbers in `response` that occur nowhere in `evidence`.
///
/// Numbers are compared after dropping thousands separators and trailing
/// fractional zeros, so `1,200.50` matches `1200.5`.
pub fn ungrounded_numbers(response: &str, evidence: &str) -> Vec<String> {
    let known: HashSet<String> = NUMBER
        .find_iter(evidence)
        .map(|m| normalize_number(m.as_str()))
        .collect();

    let mut out: Vec<String> = Vec::new();
    for m in NUMBER.find_iter(response) {
        let n = normalize_number(m.as_str());
        if !known.contains(&n) && !out.contains(&n) {
            out.push(n);
        }
    }
    out
}

fn normalize_number(raw: &str) -> String {
    let mut s = raw.replace(',', "").trim_start_matches('-').to_string();
    if s.contains('.') {
        s = s.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    if s.is_empty() {
        "0".to_string()
    } else {
        s
    }
}
