//! CRM tools over a HubSpot-compatible REST API (`/crm/v3/objects/...`).
//!
//! Contact search and lookup are read-only. Creating contacts and deals
//! mutates the CRM, so those tools are flagged and never chosen by the
//! keyword selector.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{required_str, send_json, Tool, ToolContext, ToolRegistry};
use crate::config::Secret;
use crate::error::ToolError;

const CONTACT_PROPERTIES: &[&str] = &["firstname", "lastname", "email", "company", "phone"];
const SEARCH_LIMIT: u64 = 10;

pub struct CrmClient {
    base_url: String,
    token: Secret,
    client: reqwest::Client,
}

impl CrmClient {
    pub fn new(base_url: &str, token: Secret, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/crm/v3/objects/{}", self.base_url, path)
    }

    pub async fn search_contacts(&self, query: &str) -> Result<Value, ToolError> {
        let body = json!({
            "query": query,
            "limit": SEARCH_LIMIT,
            "properties": CONTACT_PROPERTIES,
        });
        let raw = send_json(
            self.client
                .post(self.url("contacts/search"))
                .bearer_auth(self.token.expose())
                .json(&body),
        )
        .await?;

        let contacts: Vec<Value> = raw["results"]
            .as_array()
            .map(|a| a.iter().map(contact_summary).collect())
            .unwrap_or_default();
        Ok(json!({
            "total": raw["total"].as_u64().unwrap_or(contacts.len() as u64),
            "contacts": contacts,
        }))
    }

    pub async fn get_contact(&self, contact_id: &str) -> Result<Value, ToolError> {
        let raw = send_json(
            self.client
                .get(self.url(&format!("contacts/{}", contact_id)))
                .query(&[("properties", CONTACT_PROPERTIES.join(","))])
                .bearer_auth(self.token.expose()),
        )
        .await?;
        Ok(contact_summary(&raw))
    }

    async fn create(&self, object: &str, properties: Map<String, Value>) -> Result<Value, ToolError> {
        let raw = send_json(
            self.client
                .post(self.url(object))
                .bearer_auth(self.token.expose())
                .json(&json!({ "properties": properties })),
        )
        .await?;
        Ok(json!({
            "id": raw["id"],
            "properties": raw["properties"],
        }))
    }
}

/// Flatten a CRM object into `{ id, name, email, company, phone }`.
pub fn contact_summary(raw: &Value) -> Value {
    let props = &raw["properties"];
    let name = [props["firstname"].as_str(), props["lastname"].as_str()]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    json!({
        "id": raw["id"],
        "name": name,
        "email": props["email"],
        "company": props["company"],
        "phone": props["phone"],
    })
}

/// Copy the optional string params named in `keys` into a property map.
fn optional_props(params: &Value, keys: &[(&str, &str)]) -> Map<String, Value> {
    let mut props = Map::new();
    for (param, property) in keys {
        if let Some(v) = params.get(*param).filter(|v| !v.is_null()) {
            let text = match v {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            if !text.is_empty() {
                props.insert((*property).to_string(), Value::String(text));
            }
        }
    }
    props
}

pub fn register(registry: &mut ToolRegistry, client: CrmClient) {
    let client = Arc::new(client);
    registry.register(Box::new(SearchContactsTool(client.clone())));
    registry.register(Box::new(GetContactTool(client.clone())));
    registry.register(Box::new(CreateContactTool(client.clone())));
    registry.register(Box::new(CreateDealTool(client)));
}

pub struct SearchContactsTool(pub Arc<CrmClient>);

#[async_trait]
impl Tool for SearchContactsTool {
    fn name(&self) -> &str {
        "crm_search_contacts"
    }

    fn description(&self) -> &str {
        "Search CRM contacts by name, email, or company"
    }

    fn category(&self) -> &str {
        "crm"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "minLength": 1, "description": "Name, email, or company to search for" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let query = required_str(&params, "query")?;
        debug!(query_id = %ctx.query_id, "crm contact search");
        self.0.search_contacts(query).await
    }
}

pub struct GetContactTool(pub Arc<CrmClient>);

#[async_trait]
impl Tool for GetContactTool {
    fn name(&self) -> &str {
        "crm_get_contact"
    }

    fn description(&self) -> &str {
        "Fetch a CRM contact by id"
    }

    fn category(&self) -> &str {
        "crm"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "contact_id": { "type": "string", "minLength": 1 }
            },
            "required": ["contact_id"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let id = required_str(&params, "contact_id")?;
        if !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ToolError::InvalidInput(format!(
                "contact_id must be numeric, got '{}'",
                id
            )));
        }
        self.0.get_contact(id).await
    }
}

pub struct CreateContactTool(pub Arc<CrmClient>);

#[async_trait]
impl Tool for CreateContactTool {
    fn name(&self) -> &str {
        "crm_create_contact"
    }

    fn description(&self) -> &str {
        "Create a new CRM contact. Only use when the user explicitly asks to create one."
    }

    fn category(&self) -> &str {
        "crm"
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "email": { "type": "string", "minLength": 1 },
                "firstname": { "type": "string" },
                "lastname": { "type": "string" },
                "company": { "type": "string" }
            },
            "required": ["email"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let email = required_str(&params, "email")?;
        if !email.contains('@') {
            return Err(ToolError::InvalidInput(format!("invalid email '{}'", email)));
        }
        let mut props = optional_props(
            &params,
            &[
                ("firstname", "firstname"),
                ("lastname", "lastname"),
                ("company", "company"),
            ],
        );
        props.insert("email".to_string(), Value::String(email.to_string()));

        info!(query_id = %ctx.query_id, "creating crm contact");
        self.0.create("contacts", props).await
    }
}

pub struct CreateDealTool(pub Arc<CrmClient>);

#[async_trait]
impl Tool for CreateDealTool {
    fn name(&self) -> &str {
        "crm_create_deal"
    }

    fn description(&self) -> &str {
        "Create a new CRM deal. Only use when the user explicitly asks to create one."
    }

    fn category(&self) -> &str {
        "crm"
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "minLength": 1 },
                "amount": { "type": "number", "minimum": 0 },
                "stage": { "type": "string" }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let name = required_str(&params, "name")?;
        let mut props = optional_props(&params, &[("amount", "amount"), ("stage", "dealstage")]);
        props.insert("dealname".to_string(), Value::String(name.to_string()));

        info!(query_id = %ctx.query_id, "creating crm deal");
        self.0.create("deals", props).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_summary_joins_name() {
        let raw = json!({
            "id": "501",
            "properties": { "firstname": "Ada", "lastname": "Lovelace", "email": "ada@example.com", "company": "Analytical" }
        });
        let s = contact_summary(&raw);
        assert_eq!(s["id"], "501");
        assert_eq!(s["name"], "Ada Lovelace");
        assert_eq!(s["email"], "ada@example.com");
        assert_eq!(s["phone"], Value::Null);
    }

    #[test]
    fn test_optional_props_skips_blank_and_stringifies() {
        let params = json!({ "amount": 1500, "stage": "  ", "other": "x" });
        let props = optional_props(&params, &[("amount", "amount"), ("stage", "dealstage")]);
        assert_eq!(props.get("amount"), Some(&json!("1500")));
        assert!(!props.contains_key("dealstage"));
    }

    #[test]
    fn test_mutating_flags() {
        let client = Arc::new(CrmClient::new("http://localhost", Secret::new("t"), 1).unwrap());
        assert!(!SearchContactsTool(client.clone()).is_mutating());
        assert!(!GetContactTool(client.clone()).is_mutating());
        assert!(CreateContactTool(client.clone()).is_mutating());
        assert!(CreateDealTool(client).descriptor().mutating);
    }
}
