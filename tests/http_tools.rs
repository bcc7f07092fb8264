//! HTTP clients against local stub services: status mapping, retries and
//! partial results over real sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use business_assistant::config::{LlmConfig, Secret};
use business_assistant::error::{AssistantError, LlmError};
use business_assistant::executor::ToolExecutor;
use business_assistant::llm::{ChatMessage, ChatModel, ChatRequest, OpenAIChat};
use business_assistant::retry::RetryPolicy;
use business_assistant::synthesizer::Synthesizer;
use business_assistant::tools::{crm, weather, CrmClient, ToolContext, ToolRegistry, WeatherClient};
use business_assistant_core::models::{RetrievalResult, ToolCall, ToolResult};

#[derive(Default)]
struct Hits {
    weather: AtomicU32,
    bergen: AtomicU32,
    crm: AtomicU32,
    chat: AtomicU32,
    chat_down: AtomicU32,
}

type Stub = Arc<Hits>;

fn error_body(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "message": message })))
}

/// `Atlantis` and `Lemuria` are unknown, `Stormhaven` is always
/// unavailable and `Bergen` fails once before answering.
async fn stub_weather(
    State(hits): State<Stub>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    hits.weather.fetch_add(1, Ordering::SeqCst);
    if params.get("appid").map(String::as_str) != Some("weather-key") {
        return error_body(StatusCode::UNAUTHORIZED, "invalid api key");
    }
    let city = params.get("q").cloned().unwrap_or_default();
    match city.as_str() {
        "Atlantis" | "Lemuria" => return error_body(StatusCode::NOT_FOUND, "city not found"),
        "Stormhaven" => return error_body(StatusCode::SERVICE_UNAVAILABLE, "upstream busy"),
        "Bergen" if hits.bergen.fetch_add(1, Ordering::SeqCst) == 0 => {
            return error_body(StatusCode::SERVICE_UNAVAILABLE, "upstream busy")
        }
        _ => {}
    }
    (
        StatusCode::OK,
        Json(json!({
            "name": city,
            "main": { "temp": 11.5, "feels_like": 9.0, "humidity": 80 },
            "weather": [{ "description": "overcast clouds" }],
            "wind": { "speed": 6.2 }
        })),
    )
}

async fn stub_crm_search(State(hits): State<Stub>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    let n = hits.crm.fetch_add(1, Ordering::SeqCst);
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
    if auth != Some("Bearer crm-token") {
        return error_body(StatusCode::UNAUTHORIZED, "missing token");
    }
    if n == 0 {
        return error_body(StatusCode::TOO_MANY_REQUESTS, "rate limited");
    }
    (
        StatusCode::OK,
        Json(json!({
            "total": 1,
            "results": [{
                "id": "7",
                "properties": {
                    "firstname": "Ada",
                    "lastname": "Lovelace",
                    "email": "ada@example.com",
                    "company": "Analytical Engines",
                    "phone": null
                }
            }]
        })),
    )
}

async fn stub_chat(State(hits): State<Stub>) -> (StatusCode, Json<Value>) {
    if hits.chat.fetch_add(1, Ordering::SeqCst) == 0 {
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, "overloaded");
    }
    (
        StatusCode::OK,
        Json(json!({ "choices": [{ "message": { "role": "assistant", "content": "hello" } }] })),
    )
}

async fn stub_chat_down(State(hits): State<Stub>) -> (StatusCode, Json<Value>) {
    hits.chat_down.fetch_add(1, Ordering::SeqCst);
    error_body(StatusCode::BAD_GATEWAY, "no healthy upstream")
}

/// Serve the stub on an ephemeral port and return its base URL.
async fn spawn_stub() -> (String, Stub) {
    let hits: Stub = Arc::new(Hits::default());
    let app = Router::new()
        .route("/weather", get(stub_weather))
        .route("/crm/v3/objects/contacts/search", post(stub_crm_search))
        .route("/chat/completions", post(stub_chat))
        .route("/down/chat/completions", post(stub_chat_down))
        .with_state(hits.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), hits)
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    }
}

fn executor(registry: ToolRegistry) -> ToolExecutor {
    ToolExecutor::new(Arc::new(registry), fast_policy(), Duration::from_secs(5))
}

fn weather_executor(base: &str) -> ToolExecutor {
    let mut registry = ToolRegistry::new();
    weather::register(
        &mut registry,
        WeatherClient::new(base, Secret::new("weather-key"), 5).unwrap(),
    );
    executor(registry)
}

async fn run(executor: &ToolExecutor, tool: &str, arguments: Value) -> ToolResult {
    let call = ToolCall {
        id: format!("call-{}", tool),
        query_id: "q-http".into(),
        tool: tool.into(),
        arguments,
    };
    let mut results = executor.execute(&[call], &ToolContext::new("q-http")).await;
    assert_eq!(results.len(), 1);
    results.remove(0)
}

#[tokio::test]
async fn test_weather_retries_unavailable_then_succeeds() {
    let (base, hits) = spawn_stub().await;
    let result = run(&weather_executor(&base), "weather_current", json!({ "location": "Bergen" })).await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.attempts, 2);
    assert_eq!(hits.weather.load(Ordering::SeqCst), 2);
    let payload = result.payload.unwrap();
    assert_eq!(payload["location"], "Bergen");
    assert_eq!(payload["temperature_c"], 11.5);
    assert_eq!(payload["conditions"], "overcast clouds");
}

#[tokio::test]
async fn test_weather_unknown_city_is_not_retried() {
    let (base, hits) = spawn_stub().await;
    let result = run(&weather_executor(&base), "weather_current", json!({ "location": "Atlantis" })).await;

    assert!(!result.success);
    assert_eq!(result.attempts, 1);
    assert_eq!(hits.weather.load(Ordering::SeqCst), 1);
    let error = result.error.unwrap();
    assert!(error.starts_with("not found: HTTP 404"), "{}", error);
    assert!(!error.contains("weather-key"));
}

#[tokio::test]
async fn test_weather_gives_up_after_max_retries() {
    let (base, hits) = spawn_stub().await;
    let result = run(&weather_executor(&base), "weather_current", json!({ "location": "Stormhaven" })).await;

    assert!(!result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(hits.weather.load(Ordering::SeqCst), 3);
    assert!(result.error.unwrap().starts_with("transient failure: HTTP 503"));
}

#[tokio::test]
async fn test_unreachable_service_error_hides_api_key() {
    // nothing listens on the discard port
    let result = run(
        &weather_executor("http://127.0.0.1:9"),
        "weather_current",
        json!({ "location": "Paris" }),
    )
    .await;

    assert!(!result.success);
    assert_eq!(result.attempts, 3);
    let error = result.error.unwrap();
    assert!(error.starts_with("transient failure: request failed"), "{}", error);
    assert!(!error.contains("weather-key"));
}

#[tokio::test]
async fn test_compare_keeps_cities_that_succeeded() {
    let (base, hits) = spawn_stub().await;
    let result = run(
        &weather_executor(&base),
        "weather_compare",
        json!({ "locations": ["London", "Atlantis"] }),
    )
    .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.attempts, 1);
    assert_eq!(hits.weather.load(Ordering::SeqCst), 2);
    let payload = result.payload.unwrap();
    assert_eq!(payload["failed"], 1);
    assert_eq!(payload["locations"][0]["location"], "London");
    assert_eq!(payload["locations"][0]["temperature_c"], 11.5);
    assert_eq!(
        payload["locations"][1],
        json!({ "location": "Atlantis", "error": "data unavailable" })
    );
}

#[tokio::test]
async fn test_compare_fails_when_every_city_fails() {
    let (base, hits) = spawn_stub().await;
    let result = run(
        &weather_executor(&base),
        "weather_compare",
        json!({ "locations": ["Atlantis", "Stormhaven"] }),
    )
    .await;

    // the transient cause wins, so the whole comparison is retried
    assert!(!result.success);
    assert_eq!(result.attempts, 3);
    assert_eq!(hits.weather.load(Ordering::SeqCst), 6);
    assert!(result.error.unwrap().starts_with("transient failure"));

    let result = run(
        &weather_executor(&base),
        "weather_compare",
        json!({ "locations": ["Atlantis", "Lemuria"] }),
    )
    .await;
    assert!(!result.success);
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn test_crm_search_retries_rate_limit() {
    let (base, hits) = spawn_stub().await;
    let mut registry = ToolRegistry::new();
    crm::register(
        &mut registry,
        CrmClient::new(&base, Secret::new("crm-token"), 5).unwrap(),
    );

    let result = run(
        &executor(registry),
        "crm_search_contacts",
        json!({ "query": "Lovelace" }),
    )
    .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.attempts, 2);
    assert_eq!(hits.crm.load(Ordering::SeqCst), 2);
    let payload = result.payload.unwrap();
    assert_eq!(payload["total"], 1);
    assert_eq!(payload["contacts"][0]["id"], "7");
    assert_eq!(payload["contacts"][0]["name"], "Ada Lovelace");
    assert_eq!(payload["contacts"][0]["company"], "Analytical Engines");
}

fn chat_model(base_url: String) -> OpenAIChat {
    let config = LlmConfig {
        base_url,
        max_retries: 2,
        ..LlmConfig::default()
    };
    OpenAIChat::new(&config, Secret::new("sk-test"))
        .unwrap()
        .with_retry_policy(fast_policy())
}

#[tokio::test]
async fn test_chat_retries_server_error() {
    let (base, hits) = spawn_stub().await;
    let request = ChatRequest {
        messages: vec![ChatMessage::user("hi")],
        tools: Vec::new(),
        temperature: 0.0,
    };

    let response = chat_model(base).complete(&request).await.unwrap();
    assert_eq!(response.content, "hello");
    assert!(response.tool_calls.is_empty());
    assert_eq!(hits.chat.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_synthesis_fails_after_chat_retries_exhausted() {
    let (base, hits) = spawn_stub().await;
    let synthesizer = Synthesizer::new(Arc::new(chat_model(format!("{}/down", base))), 0.0, 500);

    let err = synthesizer
        .synthesize("What is our refund policy?", &RetrievalResult::empty(), &[], &[])
        .await
        .unwrap_err();
    assert!(
        matches!(err, AssistantError::Synthesis(LlmError::Transient(_))),
        "{:?}",
        err
    );
    assert_eq!(hits.chat_down.load(Ordering::SeqCst), 3);
}
