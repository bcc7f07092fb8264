//! Chat model abstraction.
//!
//! The selector and the synthesizer both talk to a generative model through
//! [`ChatModel`]. Two implementations ship:
//!
//! - [`OpenAIChat`]: OpenAI-compatible chat completions with function
//!   calling, a request timeout, and retry on transient errors.
//! - [`ExtractiveModel`]: an offline model that answers strictly from the
//!   evidence sections of the synthesis prompt. Useful without credentials
//!   and as a deterministic stand-in for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use business_assistant_core::models::ToolDescriptor;

use crate::config::{Credentials, LlmConfig, Secret};
use crate::error::{classify_llm_status, LlmError};
use crate::retry::{retry_async, RetryPolicy};
use crate::synthesizer::{KNOWLEDGE_HEADER, TOOLS_HEADER};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Tools offered for function calling. Empty for plain completions.
    pub tools: Vec<ToolDescriptor>,
    pub temperature: f32,
}

/// A tool invocation requested by the model, arguments still unparsed.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestedCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<RequestedCall>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider-qualified model name, for logs.
    fn name(&self) -> &str;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;
}

/// Instantiate the chat model named by `config.provider`.
pub fn create_chat_model(
    config: &LlmConfig,
    creds: &Credentials,
) -> anyhow::Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => {
            let key = creds
                .openai
                .clone()
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
            Ok(Box::new(OpenAIChat::new(config, key)?))
        }
        "extractive" => Ok(Box::new(ExtractiveModel)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

// ============ OpenAI ============

pub struct OpenAIChat {
    model: String,
    base_url: String,
    api_key: Secret,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl OpenAIChat {
    pub fn new(config: &LlmConfig, api_key: Secret) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            policy: RetryPolicy::with_retries(config.max_retries),
        })
    }

    /// Replace the default backoff curve built from `max_retries`.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn complete_once(&self, body: &Value) -> Result<ChatResponse, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_llm_status(status.as_u16(), &text));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        parse_chat_response(&json)
    }
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = build_chat_body(&self.model, request);
        debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "calling chat model"
        );
        let (result, _attempts) = retry_async(
            &self.policy,
            "chat_completion",
            LlmError::is_retryable,
            || self.complete_once(&body),
        )
        .await;
        result
    }
}

/// Build an OpenAI chat-completions request body.
pub fn build_chat_body(model: &str, request: &ChatRequest) -> Value {
    let mut body = json!({
        "model": model,
        "temperature": request.temperature,
        "messages": request.messages,
    });
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }
    body
}

/// Parse `choices[0].message` into content and requested tool calls.
pub fn parse_chat_response(json: &Value) -> Result<ChatResponse, LlmError> {
    let message = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LlmError::Malformed("missing choices[0].message".to_string()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(|t| t.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let function = call.get("function")?;
                    Some(RequestedCall {
                        name: function.get("name")?.as_str()?.to_string(),
                        arguments: function
                            .get("arguments")
                            .and_then(|a| a.as_str())
                            .unwrap_or("{}")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        content,
        tool_calls,
    })
}

// ============ Extractive ============

/// Offline model that restates the evidence in the synthesis prompt.
///
/// It never calls tools and never produces a value that is not already in
/// the prompt: successful tool payloads are repeated verbatim, failed tools
/// are reported as unavailable, and the best knowledge-base passage is
/// quoted with its source.
pub struct ExtractiveModel;

#[derive(Debug, Default)]
struct Evidence {
    passages: Vec<(String, String)>,
    ok: Vec<(String, String)>,
    failed: Vec<String>,
}

fn parse_evidence(prompt: &str) -> Evidence {
    let mut evidence = Evidence::default();
    let mut section = "";

    for line in prompt.lines() {
        if line.starts_with("=== ") {
            section = if line == KNOWLEDGE_HEADER {
                "kb"
            } else if line == TOOLS_HEADER {
                "tools"
            } else {
                ""
            };
            continue;
        }
        match section {
            "kb" => {
                if let Some(rest) = line.strip_prefix('[') {
                    if let Some(source) = rest
                        .split_once("] Source: ")
                        .map(|(_, s)| s.split(" (score").next().unwrap_or(s).to_string())
                    {
                        evidence.passages.push((source, String::new()));
                        continue;
                    }
                }
                if let Some((_, text)) = evidence.passages.last_mut() {
                    if !line.trim().is_empty() {
                        if !text.is_empty() {
                            text.push(' ');
                        }
                        text.push_str(line.trim());
                    }
                }
            }
            "tools" => {
                if let Some(rest) = line.strip_prefix("[OK] ") {
                    if let Some((tool, payload)) = rest.split_once(": ") {
                        evidence.ok.push((tool.to_string(), payload.to_string()));
                    }
                } else if let Some(rest) = line.strip_prefix("[FAILED] ") {
                    let tool = rest.split_once(": ").map(|(t, _)| t).unwrap_or(rest);
                    evidence.failed.push(tool.to_string());
                }
            }
            _ => {}
        }
    }
    evidence
}

#[async_trait]
impl ChatModel for ExtractiveModel {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .ok_or_else(|| LlmError::Fatal("no user message in request".to_string()))?;

        let evidence = parse_evidence(prompt);
        let mut lines = Vec::new();

        for (tool, payload) in &evidence.ok {
            lines.push(format!("- {}: {}", tool, payload));
        }
        // Error text is left out so no figure from it can pass as data.
        for tool in &evidence.failed {
            lines.push(format!("- {}: data unavailable, the tool call failed.", tool));
        }
        if let Some((source, text)) = evidence.passages.first() {
            let excerpt: String = text.chars().take(400).collect();
            lines.push(format!("- According to {}: {}", source, excerpt));
        }

        let content = if lines.is_empty() {
            "I could not find information to answer this question in the knowledge base or the available tools.".to_string()
        } else {
            format!("Based on the available evidence:\n{}", lines.join("\n"))
        };

        Ok(ChatResponse {
            content,
            tool_calls: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_chat_body_with_tools() {
        let request = ChatRequest {
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
            tools: vec![ToolDescriptor {
                name: "calculator".into(),
                description: "math".into(),
                category: "calculator".into(),
                mutating: false,
                parameters: json!({"type": "object", "properties": {}}),
            }],
            temperature: 0.2,
        };
        let body = build_chat_body("gpt-test", &request);
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["tools"][0]["function"]["name"], "calculator");
    }

    #[test]
    fn test_build_chat_body_without_tools() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            tools: vec![],
            temperature: 0.7,
        };
        assert!(build_chat_body("m", &request).get("tools").is_none());
    }

    #[test]
    fn test_parse_chat_response_tool_calls() {
        let json = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "weather_current", "arguments": "{\"location\":\"Paris\"}" }
                    }]
                }
            }]
        });
        let resp = parse_chat_response(&json).unwrap();
        assert_eq!(resp.content, "");
        assert_eq!(
            resp.tool_calls,
            vec![RequestedCall {
                name: "weather_current".into(),
                arguments: "{\"location\":\"Paris\"}".into()
            }]
        );
    }

    #[test]
    fn test_parse_chat_response_malformed() {
        assert!(matches!(
            parse_chat_response(&json!({"choices": []})),
            Err(LlmError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_extractive_model_restates_evidence() {
        let prompt = format!(
            "Query: q\n\n{}\n[1] Source: refunds.txt (score 0.91)\nRefunds are accepted within 30 days.\n\n{}\n[OK] calculator: {{\"result\":30}}\n[FAILED] weather_current: timed out after 100 ms\n",
            KNOWLEDGE_HEADER, TOOLS_HEADER
        );
        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            tools: vec![],
            temperature: 0.0,
        };
        let resp = ExtractiveModel.complete(&request).await.unwrap();
        assert!(resp.content.contains("calculator: {\"result\":30}"));
        assert!(resp.content.contains("weather_current: data unavailable"));
        assert!(resp
            .content
            .contains("According to refunds.txt: Refunds are accepted within 30 days."));
    }

    #[tokio::test]
    async fn test_extractive_model_without_evidence() {
        let request = ChatRequest {
            messages: vec![ChatMessage::user("Query: hello")],
            tools: vec![],
            temperature: 0.0,
        };
        let resp = ExtractiveModel.complete(&request).await.unwrap();
        assert!(resp.content.starts_with("I could not find"));
    }
}
