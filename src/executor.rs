//! Concurrent tool execution with per-attempt timeouts and bounded retry.
//!
//! Every call yields exactly one [`ToolResult`], in input order. A failing
//! call never aborts the batch: its error becomes a failed result that the
//! synthesizer reports as unavailable data.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{info, warn};

use business_assistant_core::models::{ToolCall, ToolResult};

use crate::error::{AssistantError, ToolError};
use crate::retry::{duration_ms, retry_async, RetryPolicy};
use crate::tools::{ToolContext, ToolRegistry};

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            registry,
            policy,
            timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run all `calls` concurrently. Results come back in input order.
    pub async fn execute(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<ToolResult> {
        join_all(calls.iter().map(|call| self.execute_one(call, ctx))).await
    }

    async fn execute_one(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let started = Instant::now();
        let timeout_ms = duration_ms(self.timeout);

        let (outcome, attempts) = retry_async(&self.policy, &call.tool, ToolError::is_retryable, || async move {
            let invocation = self.registry.invoke(&call.tool, &call.arguments, ctx);
            match tokio::time::timeout(self.timeout, invocation).await {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout(timeout_ms)),
            }
        })
        .await;

        let elapsed_ms = duration_ms(started.elapsed());
        match outcome {
            Ok(payload) => {
                info!(
                    query_id = %ctx.query_id,
                    tool = %call.tool,
                    call_id = %call.id,
                    attempts,
                    elapsed_ms,
                    "tool call succeeded"
                );
                ToolResult::ok(call, payload, attempts)
            }
            Err(source) => {
                let message = source.to_string();
                let err = AssistantError::ToolExecution {
                    tool: call.tool.clone(),
                    source,
                };
                warn!(
                    query_id = %ctx.query_id,
                    component = "executor",
                    call_id = %call.id,
                    attempts,
                    elapsed_ms,
                    error = %err,
                    "tool call failed"
                );
                ToolResult::failed(call, message, attempts)
            }
        }
    }
}
