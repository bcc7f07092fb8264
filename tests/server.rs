use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use business_assistant::assistant::Assistant;
use business_assistant::embedding::HashEmbedder;
use business_assistant::error::LlmError;
use business_assistant::executor::ToolExecutor;
use business_assistant::llm::{ChatModel, ChatRequest, ChatResponse, ExtractiveModel};
use business_assistant::retrieval::Retriever;
use business_assistant::retry::RetryPolicy;
use business_assistant::selector::KeywordSelector;
use business_assistant::server::{router, AppState};
use business_assistant::synthesizer::Synthesizer;
use business_assistant::tools::{CalculatorTool, ToolRegistry};
use business_assistant_core::index::InMemoryIndex;

struct UnreachableModel;

#[async_trait]
impl ChatModel for UnreachableModel {
    fn name(&self) -> &str {
        "unreachable"
    }
    async fn complete(&self, _request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        Err(LlmError::Fatal("HTTP 401: invalid api key".into()))
    }
}

fn assistant(model: Arc<dyn ChatModel>) -> Assistant {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CalculatorTool));
    Assistant::new(
        Retriever::new(
            Arc::new(InMemoryIndex::new()),
            Arc::new(HashEmbedder::new(64)),
            Duration::from_secs(1),
        ),
        Arc::new(KeywordSelector::new()),
        ToolExecutor::new(
            Arc::new(registry),
            RetryPolicy::with_retries(0),
            Duration::from_secs(1),
        ),
        Synthesizer::new(model, 0.0, 500),
        3,
        2,
    )
}

/// Serve the router on an ephemeral port and return its base URL.
async fn spawn(model: Arc<dyn ChatModel>) -> String {
    let app = router(AppState::new(Arc::new(assistant(model))));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_health() {
    let base = spawn(Arc::new(ExtractiveModel)).await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_tools_list() {
    let base = spawn(Arc::new(ExtractiveModel)).await;
    let body: Value = reqwest::get(format!("{}/tools/list", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let tools = body["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "calculator");
    assert_eq!(tools[0]["mutating"], false);
}

#[tokio::test]
async fn test_answer_and_session_lifecycle() {
    let base = spawn(Arc::new(ExtractiveModel)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/answer", base))
        .json(&json!({ "query": "What is 15% of 200?", "session": "alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let answer: Value = resp.json().await.unwrap();
    assert!(answer["response"].as_str().unwrap().contains("30"));
    assert_eq!(answer["tools_used"], json!(["calculator"]));

    let history: Value = client
        .get(format!("{}/sessions/alice/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["turns"].as_array().unwrap().len(), 1);
    assert_eq!(history["turns"][0]["query_id"], answer["query_id"]);

    // other sessions are isolated
    let resp = client
        .get(format!("{}/sessions/bob/history", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let reset: Value = client
        .delete(format!("{}/sessions/alice", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reset["cleared"], 1);

    // a removed session is gone, not just emptied
    let resp = client
        .get(format!("{}/sessions/alice/history", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let resp = client
        .delete(format!("{}/sessions/alice", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // the name can be reused and starts fresh
    let resp = client
        .post(format!("{}/answer", base))
        .json(&json!({ "query": "What is 10% of 50?", "session": "alice" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let history: Value = client
        .get(format!("{}/sessions/alice/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["turns"].as_array().unwrap().len(), 1);
    assert_eq!(history["total_appended"], 1);
}

#[tokio::test]
async fn test_default_session_window() {
    let base = spawn(Arc::new(ExtractiveModel)).await;
    let client = reqwest::Client::new();

    for pct in [10, 20, 30] {
        let resp = client
            .post(format!("{}/answer", base))
            .json(&json!({ "query": format!("What is {}% of 50?", pct) }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
    }

    let history: Value = client
        .get(format!("{}/sessions/default/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let turns = history["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(history["total_appended"], 3);
    assert_eq!(turns[1]["query"], "What is 30% of 50?");
}

#[tokio::test]
async fn test_empty_query_is_bad_request() {
    let base = spawn(Arc::new(ExtractiveModel)).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/answer", base))
        .json(&json!({ "query": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_synthesis_failure_is_bad_gateway() {
    let base = spawn(Arc::new(UnreachableModel)).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{}/answer", base))
        .json(&json!({ "query": "What is 15% of 200?", "session": "s1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "synthesis_failed");

    // the session exists but holds no turn
    let history: Value = client
        .get(format!("{}/sessions/s1/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(history["turns"].as_array().unwrap().is_empty());
}
