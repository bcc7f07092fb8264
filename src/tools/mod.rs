//! Tool capabilities and the registry that dispatches them.
//!
//! Every external capability (calculator, weather service, CRM, notes
//! store) implements [`Tool`] and is invoked through the uniform
//! [`ToolRegistry::invoke`] contract. The orchestration core only ever sees
//! the [`ToolDescriptor`] and the JSON result.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ToolRegistry                 │
//! │ ┌──────────┐ ┌─────────┐ ┌─────┐ ┌─────────┐ │
//! │ │calculator│ │ weather │ │ crm │ │  notes  │ │
//! │ └──────────┘ └─────────┘ └─────┘ └─────────┘ │
//! └───────────────────┬──────────────────────────┘
//!                     ▼
//!      invoke(name, args) → validate → execute
//! ```
//!
//! Categories are registered by [`build_registry`] only when their
//! credentials are present.

pub mod calculator;
pub mod crm;
pub mod notes;
pub mod weather;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use business_assistant_core::models::ToolDescriptor;

use crate::config::{Config, Credentials};
use crate::error::{classify_tool_status, ToolError};

pub use calculator::CalculatorTool;
pub use crm::CrmClient;
pub use notes::NotesStore;
pub use weather::WeatherClient;

/// Per-invocation context handed to [`Tool::execute`].
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Query this invocation belongs to, for log correlation.
    pub query_id: String,
}

impl ToolContext {
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
        }
    }
}

/// An external capability the assistant can call.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
/// use business_assistant::error::ToolError;
/// use business_assistant::tools::{Tool, ToolContext};
///
/// pub struct EchoTool;
///
/// #[async_trait]
/// impl Tool for EchoTool {
///     fn name(&self) -> &str { "echo" }
///     fn description(&self) -> &str { "Echo the input back" }
///     fn category(&self) -> &str { "debug" }
///
///     fn parameters_schema(&self) -> Value {
///         json!({
///             "type": "object",
///             "properties": { "text": { "type": "string" } },
///             "required": ["text"]
///         })
///     }
///
///     async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
///         Ok(json!({ "text": params["text"] }))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores (e.g. `"weather_current"`).
    fn name(&self) -> &str;

    /// One-line description. Selectors use this to decide whether to call
    /// the tool.
    fn description(&self) -> &str;

    /// Category the tool belongs to (`"calculator"`, `"weather"`, ...).
    fn category(&self) -> &str;

    /// Whether the tool changes external state. Mutating tools are never
    /// issued speculatively.
    fn is_mutating(&self) -> bool {
        false
    }

    /// JSON Schema for the parameters: `type: "object"`, `properties`,
    /// and optionally `required`.
    fn parameters_schema(&self) -> Value;

    /// Execute with parameters that already passed [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            category: self.category().to_string(),
            mutating: self.is_mutating(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Catalog of available tools, read-only once built.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Register a tool. A later registration with the same name replaces
    /// the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    /// Distinct categories in registration order.
    pub fn categories(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for tool in &self.tools {
            if !out.iter().any(|c| c == tool.category()) {
                out.push(tool.category().to_string());
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Uniform call contract: look the tool up, validate `args` against its
    /// schema, then execute.
    pub async fn invoke(
        &self,
        name: &str,
        args: &Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        let tool = self
            .find(name)
            .ok_or_else(|| ToolError::NotFound(format!("unknown tool '{}'", name)))?;
        let params = validate_params(&tool.parameters_schema(), args)?;
        tool.execute(params, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the registry for the configured environment.
///
/// The calculator and the notes store are always available. Weather needs
/// `WEATHER_API_KEY`, the CRM needs `HUBSPOT_ACCESS_TOKEN`.
pub async fn build_registry(config: &Config, creds: &Credentials) -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    registry.register(Box::new(CalculatorTool));

    let store = NotesStore::open(&config.tools.notes_db).await?;
    notes::register(&mut registry, store);

    if let Some(key) = &creds.weather {
        let client = WeatherClient::new(
            &config.tools.weather_base_url,
            key.clone(),
            config.executor.timeout_secs,
        )?;
        weather::register(&mut registry, client);
    }

    if let Some(token) = &creds.crm {
        let client = CrmClient::new(
            &config.tools.crm_base_url,
            token.clone(),
            config.executor.timeout_secs,
        )?;
        crm::register(&mut registry, client);
    }

    info!(
        tools = registry.len(),
        categories = ?registry.categories(),
        "tool registry ready"
    );
    Ok(registry)
}

/// Validate parameters against a tool's JSON Schema.
///
/// Checks required fields, primitive types, `enum` membership, and
/// numeric `minimum`/`maximum`, then fills in `default` values for
/// missing optional properties. Non-object params are treated as `{}`.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value, ToolError> {
    let params_obj = params.as_object().cloned().unwrap_or_default();

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<String> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let mut result = params_obj.clone();

    for req_field in &required {
        if !params_obj.contains_key(req_field) {
            return Err(invalid(format!("missing required parameter: {}", req_field)));
        }
    }

    for (prop_name, prop_schema) in &properties {
        let Some(value) = params_obj.get(prop_name) else {
            if let Some(default) = prop_schema.get("default") {
                result.insert(prop_name.clone(), default.clone());
            }
            continue;
        };

        if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
            let type_ok = match expected_type {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !type_ok {
                return Err(invalid(format!(
                    "parameter '{}' must be of type '{}', got {}",
                    prop_name,
                    expected_type,
                    json_type_name(value)
                )));
            }
        }

        if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
            if !enum_values.contains(value) {
                let allowed: Vec<String> = enum_values.iter().map(|v| v.to_string()).collect();
                return Err(invalid(format!(
                    "parameter '{}' must be one of [{}], got {}",
                    prop_name,
                    allowed.join(", "),
                    value
                )));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = prop_schema.get("minimum").and_then(|m| m.as_f64()) {
                if n < min {
                    return Err(invalid(format!(
                        "parameter '{}' must be >= {}, got {}",
                        prop_name, min, value
                    )));
                }
            }
            if let Some(max) = prop_schema.get("maximum").and_then(|m| m.as_f64()) {
                if n > max {
                    return Err(invalid(format!(
                        "parameter '{}' must be <= {}, got {}",
                        prop_name, max, value
                    )));
                }
            }
        }

        if let Some(s) = value.as_str() {
            let min_len = prop_schema.get("minLength").and_then(|m| m.as_u64());
            if min_len.is_some_and(|m| (s.trim().chars().count() as u64) < m) {
                return Err(invalid(format!("parameter '{}' must not be empty", prop_name)));
            }
        }
    }

    Ok(Value::Object(result))
}

fn invalid(message: String) -> ToolError {
    ToolError::InvalidInput(message)
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Send a request to an external JSON API, mapping failures onto
/// [`ToolError`]: network errors are transient, HTTP statuses go through
/// [`classify_tool_status`].
pub(crate) async fn send_json(request: reqwest::RequestBuilder) -> Result<Value, ToolError> {
    // reqwest errors carry the request URL, which may hold an API key
    let response = request.send().await.map_err(|e| {
        let e = e.without_url();
        if e.is_timeout() {
            ToolError::Transient(format!("request timed out: {}", e))
        } else {
            ToolError::Transient(format!("request failed: {}", e))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_tool_status(status.as_u16(), &body));
    }

    response
        .json()
        .await
        .map_err(|e| ToolError::Failed(format!("invalid JSON response: {}", e.without_url())))
}

/// Read a required, non-empty string parameter.
pub(crate) fn required_str<'a>(params: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidInput(format!("{} must not be empty", name)))
}
