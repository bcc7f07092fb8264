//! Tool selection: decide which tools a query needs and extract their
//! arguments.
//!
//! Two strategies sit behind [`ToolSelector`]:
//!
//! - [`KeywordSelector`]: deterministic intent matching per tool category
//!   with regex argument extraction. Never issues mutating tools.
//! - [`LlmSelector`]: lets the chat model choose via function calling.
//!
//! Both funnel candidates through [`finalize`], which drops unknown tools,
//! validates arguments against each tool's schema, collapses duplicates and
//! stamps call ids. A candidate that fails validation is dropped on its own;
//! the other candidates are unaffected.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use business_assistant_core::models::{ConversationTurn, ToolCall, ToolDescriptor};

use crate::error::AssistantError;
use crate::llm::{ChatMessage, ChatModel, ChatRequest};
use crate::tools::calculator;
use crate::tools::validate_params;

/// Most locations a single `weather_compare` call accepts.
const MAX_COMPARE: usize = 5;
/// Prior turns offered to the model for reference resolution.
const SELECTOR_HISTORY: usize = 3;

#[async_trait]
pub trait ToolSelector: Send + Sync {
    fn name(&self) -> &str;

    /// Choose zero or more tool calls for `query`. Never fails: problems
    /// are logged and the affected tool is left out.
    async fn select(
        &self,
        query: &str,
        history: &[ConversationTurn],
        registry: &[ToolDescriptor],
        query_id: &str,
    ) -> Vec<ToolCall>;
}

/// A tool name with unvalidated arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub tool: String,
    pub arguments: Value,
}

impl Candidate {
    fn new(tool: &str, arguments: Value) -> Self {
        Self {
            tool: tool.to_string(),
            arguments,
        }
    }
}

/// Turn candidates into validated, de-duplicated [`ToolCall`]s.
pub fn finalize(
    candidates: Vec<Candidate>,
    registry: &[ToolDescriptor],
    query_id: &str,
    allow_mutating: bool,
) -> Vec<ToolCall> {
    let mut calls: Vec<ToolCall> = Vec::new();

    for candidate in candidates {
        let Some(descriptor) = registry.iter().find(|d| d.name == candidate.tool) else {
            debug!(query_id, tool = %candidate.tool, "tool not registered, skipping");
            continue;
        };
        if descriptor.mutating && !allow_mutating {
            debug!(query_id, tool = %candidate.tool, "mutating tool not issued");
            continue;
        }

        let arguments = match validate_params(&descriptor.parameters, &candidate.arguments) {
            Ok(args) => args,
            Err(e) => {
                let err = AssistantError::ToolSelection {
                    tool: candidate.tool.clone(),
                    message: e.to_string(),
                };
                warn!(query_id, component = "selector", error = %err, "dropping tool call");
                continue;
            }
        };

        if calls
            .iter()
            .any(|c| c.tool == candidate.tool && c.arguments == arguments)
        {
            continue;
        }

        calls.push(ToolCall {
            id: uuid::Uuid::new_v4().to_string(),
            query_id: query_id.to_string(),
            tool: candidate.tool,
            arguments,
        });
    }

    calls
}

fn selection_failure(query_id: &str, tool: &str, message: impl Into<String>) {
    let err = AssistantError::ToolSelection {
        tool: tool.to_string(),
        message: message.into(),
    };
    warn!(query_id, component = "selector", error = %err, "dropping tool call");
}

// ============ Keyword selector ============

macro_rules! regex {
    ($pattern:expr) => {
        LazyLock::new(|| Regex::new($pattern).expect("valid regex"))
    };
}

static CALC_INTENT: LazyLock<Regex> = regex!(
    r"(?i)\b(?:calculate|compute|evaluate|solve|what\s+is|what's|whats|how\s+much\s+is|equals?)\b|="
);
static PERCENT_OF: LazyLock<Regex> = regex!(
    r"(?i)(-?\d[\d,]*(?:\.\d+)?)\s*(?:%|percent\b|per\s+cent\b)\s*of\s+\$?(-?\d[\d,]*(?:\.\d+)?)"
);
static EXPRESSION: LazyLock<Regex> = regex!(
    r"\(*\s*-?\d+(?:\.\d+)?(?:\s*\)*\s*[-+*/×]\s*\(*\s*-?\d+(?:\.\d+)?)+\s*\)*"
);
static THOUSANDS: LazyLock<Regex> = regex!(r"(\d),(\d{3})");
static ARITHMETIC_VERB: LazyLock<Regex> = regex!(r"(?i)\b(?:calculate|compute|evaluate|solve)\b");
static DIGIT_GROUPS: LazyLock<Regex> = regex!(r"\d+(?:-\d+){2,}");
static YEAR_RANGE: LazyLock<Regex> = regex!(r"\b(?:19|20)\d{2}\s*-\s*(?:19|20)?\d{2}\b");
static UNSPACED_MINUS: LazyLock<Regex> = regex!(r"[\d)]-[\d(]");

static CRM_INTENT: LazyLock<Regex> = regex!(
    r"(?i)\b(?:contacts?|customers?|deals?|crm|company|companies|leads?|prospects?|accounts?|sales)\b"
);
static WEATHER_INTENT: LazyLock<Regex> = regex!(
    r"(?i)\b(?:weather|temperatures?|forecasts?|climate|locations?|city|cities|regions?|rain(?:ing|y)?|snow(?:ing|y)?|sunny|humidity|windy?)\b"
);
static NOTES_INTENT: LazyLock<Regex> = regex!(
    r"(?i)\b(?:notes?|save|saved|logs?|logged|records?|recorded|history|previous(?:ly)?|past|stored)\b"
);
static NOTES_WRITE_INTENT: LazyLock<Regex> = regex!(
    r"(?i)\b(?:save|store|remember|create|add|write|delete|remove)\b"
);

static LOCATION_PHRASE: LazyLock<Regex> = regex!(
    r"\b(?i:in|at|for|between|compare|comparing)\s+([A-Z][\w.'-]*(?:(?:\s+|,\s*|\s+(?i:and|vs\.?|versus|or)\s+)[A-Z][\w.'-]*)*)"
);
static LOCATION_SPLIT: LazyLock<Regex> = regex!(r"\s+(?i:and|vs\.?|versus|or)\s+");
static FORECAST_INTENT: LazyLock<Regex> = regex!(
    r"(?i)\b(?:forecasts?|tomorrow|upcoming|this\s+week|next\s+week|next\s+\d+\s+days?|\d+[-\s]?days?)\b"
);
static DAY_COUNT: LazyLock<Regex> = regex!(r"(?i)\b(\d+)[-\s]?days?\b");

static EMAIL: LazyLock<Regex> = regex!(r"[\w.+-]+@[\w-]+(?:\.[\w-]+)+");
static CONTACT_ID: LazyLock<Regex> = regex!(r"(?i)\bcontact\s+(?:id\s*)?#?(\d{2,})\b");
static QUOTED: LazyLock<Regex> = regex!(r#""([^"]+)"|“([^”]+)”"#);
static CRM_NAME: LazyLock<Regex> = regex!(
    r"\b(?i:customer|client|contact|company|account|lead|prospect|about|for|with|from|on)\s+([A-Z][\w&.'-]*(?:\s+[A-Z][\w&.'-]*)*)"
);
static NOTES_TOPIC: LazyLock<Regex> = regex!(
    r"(?i)\b(?:about|regarding|mentioning|containing|on)\s+(?:the\s+|our\s+|my\s+)?([^?.!]+)"
);

/// Capitalized words that end a proper-noun phrase.
const PHRASE_STOPS: &[&str] = &[
    "Today", "Tomorrow", "Tonight", "This", "Next", "Monday", "Tuesday", "Wednesday", "Thursday",
    "Friday", "Saturday", "Sunday", "Weekend", "I",
];

/// Deterministic intent-matching selector.
///
/// Categories are considered in a fixed order (calculator, weather, CRM,
/// notes) and each contributes at most one call per intent, so a query that
/// mixes intents yields one call per category.
#[derive(Debug, Default, Clone)]
pub struct KeywordSelector;

impl KeywordSelector {
    pub fn new() -> Self {
        Self
    }

    /// Candidates before registry filtering and schema validation.
    pub fn candidates(
        &self,
        query: &str,
        history: &[ConversationTurn],
        query_id: &str,
    ) -> Vec<Candidate> {
        let mut out = Vec::new();
        out.extend(calculator_candidate(query, query_id));
        if WEATHER_INTENT.is_match(query) {
            out.extend(weather_candidate(query, history, query_id));
        }
        if CRM_INTENT.is_match(query) {
            out.extend(crm_candidate(query, query_id));
        }
        if NOTES_INTENT.is_match(query) {
            out.extend(notes_candidate(query, query_id));
        }
        out
    }
}

#[async_trait]
impl ToolSelector for KeywordSelector {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn select(
        &self,
        query: &str,
        history: &[ConversationTurn],
        registry: &[ToolDescriptor],
        query_id: &str,
    ) -> Vec<ToolCall> {
        let calls = finalize(self.candidates(query, history, query_id), registry, query_id, false);
        info!(
            query_id,
            selector = "keyword",
            tools = ?calls.iter().map(|c| c.tool.as_str()).collect::<Vec<_>>(),
            "tools selected"
        );
        calls
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.replace(',', "").parse::<f64>().ok()
}

fn calculator_candidate(query: &str, query_id: &str) -> Option<Candidate> {
    if let Some(caps) = PERCENT_OF.captures(query) {
        let (Some(percent), Some(value)) = (parse_number(&caps[1]), parse_number(&caps[2])) else {
            selection_failure(query_id, "calculator", "could not parse percentage operands");
            return None;
        };
        return Some(Candidate::new(
            "calculator",
            json!({ "operation": "percentage", "percent": percent, "value": value }),
        ));
    }

    if !CALC_INTENT.is_match(query) {
        return None;
    }
    let normalized = THOUSANDS.replace_all(query, "$1$2");
    let expression = EXPRESSION.find(&normalized)?.as_str().trim().to_string();
    // dates, phone numbers and "2021-2023" read as ranges unless the user
    // explicitly asked for arithmetic
    if DIGIT_GROUPS.is_match(&expression) {
        return None;
    }
    if !ARITHMETIC_VERB.is_match(query)
        && (YEAR_RANGE.is_match(&expression) || UNSPACED_MINUS.is_match(&expression))
    {
        debug!(query_id, %expression, "hyphenated numbers treated as a range");
        return None;
    }
    if let Err(e) = calculator::evaluate(&expression) {
        selection_failure(query_id, "calculator", e.to_string());
        return None;
    }
    Some(Candidate::new(
        "calculator",
        json!({ "operation": "evaluate", "expression": expression }),
    ))
}

/// Trim a proper-noun phrase at the first stop word and strip punctuation.
fn clean_phrase(phrase: &str) -> Option<String> {
    let words: Vec<&str> = phrase
        .split_whitespace()
        .take_while(|w| !PHRASE_STOPS.contains(&w.trim_end_matches([',', '.', '?', '!'])))
        .collect();
    let cleaned = words
        .join(" ")
        .trim_end_matches(|c: char| matches!(c, ',' | '.' | '?' | '!' | '\''))
        .to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Locations named in `text`, in order of appearance.
pub fn extract_locations(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in LOCATION_PHRASE.captures_iter(text) {
        for part in LOCATION_SPLIT.split(&caps[1]) {
            if let Some(loc) = clean_phrase(part) {
                if !out.contains(&loc) {
                    out.push(loc);
                }
            }
        }
    }
    out
}

fn forecast_days(query: &str) -> Option<u64> {
    if let Some(caps) = DAY_COUNT.captures(query) {
        return caps[1].parse::<u64>().ok().map(|d| d.clamp(1, 5));
    }
    let lower = query.to_lowercase();
    if lower.contains("week") {
        Some(5)
    } else if lower.contains("tomorrow") {
        Some(2)
    } else {
        None
    }
}

fn weather_candidate(
    query: &str,
    history: &[ConversationTurn],
    query_id: &str,
) -> Option<Candidate> {
    let mut locations = extract_locations(query);
    if locations.is_empty() {
        // "and tomorrow?" style follow-ups reuse the last named location
        locations = history
            .iter()
            .rev()
            .map(|t| extract_locations(&t.query))
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        // a follow-up refers to one place, so a prior comparison contributes
        // only its first location
        locations.truncate(1);
        if !locations.is_empty() {
            debug!(query_id, location = %locations[0], "location resolved from history");
        }
    }

    match locations.len() {
        0 => {
            selection_failure(query_id, "weather_current", "no location found in query");
            None
        }
        1 if FORECAST_INTENT.is_match(query) => {
            let mut args = json!({ "location": locations[0] });
            if let Some(days) = forecast_days(query) {
                args["days"] = json!(days);
            }
            Some(Candidate::new("weather_forecast", args))
        }
        1 => Some(Candidate::new(
            "weather_current",
            json!({ "location": locations[0] }),
        )),
        _ => {
            locations.truncate(MAX_COMPARE);
            Some(Candidate::new(
                "weather_compare",
                json!({ "locations": locations }),
            ))
        }
    }
}

fn crm_candidate(query: &str, query_id: &str) -> Option<Candidate> {
    if let Some(m) = EMAIL.find(query) {
        return Some(Candidate::new(
            "crm_search_contacts",
            json!({ "query": m.as_str() }),
        ));
    }
    if let Some(caps) = CONTACT_ID.captures(query) {
        return Some(Candidate::new(
            "crm_get_contact",
            json!({ "contact_id": &caps[1] }),
        ));
    }
    if let Some(term) = quoted(query) {
        return Some(Candidate::new("crm_search_contacts", json!({ "query": term })));
    }
    if let Some(name) = CRM_NAME
        .captures_iter(query)
        .find_map(|caps| clean_phrase(&caps[1]).filter(|n| n != "CRM"))
    {
        return Some(Candidate::new("crm_search_contacts", json!({ "query": name })));
    }
    selection_failure(query_id, "crm_search_contacts", "no customer name, email or id in query");
    None
}

fn quoted(query: &str) -> Option<String> {
    QUOTED.captures(query).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn notes_candidate(query: &str, query_id: &str) -> Option<Candidate> {
    if NOTES_WRITE_INTENT.is_match(query) {
        debug!(query_id, "note write intent, not issued by keyword selector");
        return None;
    }
    if let Some(term) = quoted(query) {
        return Some(Candidate::new("notes_search", json!({ "query": term })));
    }
    if let Some(caps) = NOTES_TOPIC.captures(query) {
        let topic = caps[1].trim().to_string();
        if !topic.is_empty() {
            return Some(Candidate::new("notes_search", json!({ "query": topic })));
        }
    }
    Some(Candidate::new("notes_list", json!({})))
}

// ============ LLM selector ============

const SELECTOR_SYSTEM_PROMPT: &str = "You route business questions to tools. \
Call every tool needed to answer the user's latest question, filling arguments only \
from what the user said or from the conversation so far. Call several tools when the \
question has several parts. Do not call tools that create, change or delete records \
unless the user explicitly asks for that action. If no tool is needed, reply without \
calling any tool.";

/// Function-calling selector backed by a [`ChatModel`].
pub struct LlmSelector {
    model: Arc<dyn ChatModel>,
}

impl LlmSelector {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl ToolSelector for LlmSelector {
    fn name(&self) -> &str {
        "llm"
    }

    async fn select(
        &self,
        query: &str,
        history: &[ConversationTurn],
        registry: &[ToolDescriptor],
        query_id: &str,
    ) -> Vec<ToolCall> {
        if registry.is_empty() {
            return Vec::new();
        }

        let mut messages = vec![ChatMessage::system(SELECTOR_SYSTEM_PROMPT)];
        let start = history.len().saturating_sub(SELECTOR_HISTORY);
        for turn in &history[start..] {
            messages.push(ChatMessage::user(turn.query.clone()));
            messages.push(ChatMessage::assistant(turn.response.clone()));
        }
        messages.push(ChatMessage::user(query));

        let request = ChatRequest {
            messages,
            tools: registry.to_vec(),
            temperature: 0.0,
        };

        let response = match self.model.complete(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(query_id, component = "selector", error = %e, "tool selection call failed, continuing without tools");
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        for call in response.tool_calls {
            match serde_json::from_str::<Value>(&call.arguments) {
                Ok(arguments) => candidates.push(Candidate {
                    tool: call.name,
                    arguments,
                }),
                Err(e) => selection_failure(query_id, &call.name, format!("arguments are not valid JSON: {}", e)),
            }
        }

        let calls = finalize(candidates, registry, query_id, true);
        info!(
            query_id,
            selector = "llm",
            tools = ?calls.iter().map(|c| c.tool.as_str()).collect::<Vec<_>>(),
            "tools selected"
        );
        calls
    }
}
