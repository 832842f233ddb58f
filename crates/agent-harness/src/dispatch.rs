use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::{AbortHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::content::ToolCall;
use crate::json::parse_and_validate;
use crate::tool::{ToolContext, ToolError, ToolErrorKind, ToolResult, ToolSet};

/// Resolves completed tool calls against a shared [`ToolSet`].
///
/// Every failure mode becomes an error [`ToolResult`] for the model; nothing
/// here aborts a run.
#[derive(Clone)]
pub struct ToolDispatcher {
    tools: Arc<ToolSet>,
}

impl ToolDispatcher {
    pub fn new(tools: Arc<ToolSet>) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Validates the call's arguments and invokes the tool.
    ///
    /// Empty argument text is treated as `{}`. The tool runs on its own task
    /// so a panic is contained; `cancellation` firing mid-invocation aborts
    /// that task and yields a `Cancelled` result. Dropping the returned future
    /// cancels the tool's token and aborts its task.
    pub async fn dispatch(&self, call: &ToolCall, cancellation: &CancellationToken) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            debug!(tool = %call.name, call_id = %call.id, "unknown tool requested");
            return ToolResult::failure(
                &call.id,
                &call.name,
                ToolErrorKind::UnknownTool,
                format!("unknown tool: {}", call.name),
            );
        };

        let arguments = match call.arguments.trim() {
            "" => "{}",
            text => text,
        };
        let input: Value = match parse_and_validate(arguments, &tool.definition().input_schema) {
            Ok(value) => value,
            Err(err) => {
                debug!(tool = %call.name, call_id = %call.id, error = %err, "invalid tool arguments");
                return ToolResult::failure(
                    &call.id,
                    &call.name,
                    ToolErrorKind::InvalidArguments,
                    err.to_string(),
                );
            }
        };

        let token = cancellation.child_token();
        if token.is_cancelled() {
            return cancelled(call);
        }
        let context = ToolContext {
            call_id: call.id.clone(),
            cancellation: token.clone(),
        };
        let handle = tokio::spawn(async move { tool.invoke(input, context).await });
        // The tool must not outlive this future.
        let _abort_on_drop = AbortOnDrop(handle.abort_handle());
        let _cancel_on_drop = token.clone().drop_guard();
        debug!(tool = %call.name, call_id = %call.id, "tool invoked");

        tokio::select! {
            biased;
            _ = token.cancelled() => cancelled(call),
            joined = handle => match joined {
                Ok(Ok(output)) => ToolResult::success(&call.id, &call.name, output),
                Ok(Err(ToolError::Cancelled)) => cancelled(call),
                Ok(Err(ToolError::InvalidInput(message))) => ToolResult::failure(
                    &call.id,
                    &call.name,
                    ToolErrorKind::InvalidArguments,
                    message,
                ),
                Ok(Err(err)) => {
                    ToolResult::failure(&call.id, &call.name, ToolErrorKind::Execution, err.to_string())
                }
                Err(err) if err.is_panic() => {
                    warn!(tool = %call.name, call_id = %call.id, "tool panicked");
                    ToolResult::failure(&call.id, &call.name, ToolErrorKind::Execution, "tool panicked")
                }
                Err(_) => cancelled(call),
            }
        }
    }

    /// Starts every call concurrently, one task per call.
    pub fn spawn_all(&self, calls: &[ToolCall], cancellation: &CancellationToken) -> InFlightTools {
        let mut set = JoinSet::new();
        for call in calls {
            let dispatcher = self.clone();
            let call = call.clone();
            let cancellation = cancellation.clone();
            set.spawn(async move { dispatcher.dispatch(&call, &cancellation).await });
        }
        InFlightTools {
            set,
            calls: calls.to_vec(),
            seen: HashSet::new(),
            backfilled: false,
        }
    }

    /// Runs every call concurrently and returns results in completion order.
    pub async fn dispatch_all(
        &self,
        calls: &[ToolCall],
        cancellation: &CancellationToken,
    ) -> Vec<ToolResult> {
        let mut in_flight = self.spawn_all(calls, cancellation);
        let mut results = Vec::with_capacity(calls.len());
        while let Some(result) = in_flight.next().await {
            results.push(result);
        }
        results
    }
}

/// Tool calls of one step still running.
pub struct InFlightTools {
    set: JoinSet<ToolResult>,
    calls: Vec<ToolCall>,
    seen: HashSet<String>,
    backfilled: bool,
}

impl InFlightTools {
    /// Next result in completion order; `None` once every call has one.
    ///
    /// A dispatch task lost to the runtime still yields an error result, so
    /// each call id gets exactly one.
    pub async fn next(&mut self) -> Option<ToolResult> {
        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok(result) => {
                    self.seen.insert(result.tool_call_id.clone());
                    return Some(result);
                }
                Err(err) => warn!(error = %err, "tool dispatch task failed"),
            }
        }
        if !self.backfilled {
            self.backfilled = true;
            let missing: Vec<ToolCall> = self
                .calls
                .iter()
                .filter(|call| !self.seen.contains(&call.id))
                .cloned()
                .collect();
            self.calls = missing;
        }
        let call = self.calls.pop()?;
        Some(ToolResult::failure(
            &call.id,
            &call.name,
            ToolErrorKind::Execution,
            "tool task did not complete",
        ))
    }
}

/// Aborts a tool task when the dispatch that owns it goes away.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn cancelled(call: &ToolCall) -> ToolResult {
    ToolResult::failure(&call.id, &call.name, ToolErrorKind::Cancelled, "tool call cancelled")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{counter_tool, failing_tool, panicking_tool, slow_tool, tool_call};
    use crate::tool::{FnTool, Tool, ToolDefinition};
    use serde_json::json;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn dispatcher(tools: Vec<Arc<dyn Tool>>) -> ToolDispatcher {
        ToolDispatcher::new(Arc::new(ToolSet::new(tools).expect("tool set")))
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let dispatcher = dispatcher(vec![]);
        let result = dispatcher
            .dispatch(&tool_call("c1", "missing", "{}"), &CancellationToken::new())
            .await;
        assert!(result.is_error);
        assert_eq!(result.error_kind, Some(ToolErrorKind::UnknownTool));
    }

    #[tokio::test]
    async fn invalid_arguments_are_reported_without_invoking() {
        let (tool, calls) = counter_tool("count");
        let dispatcher = dispatcher(vec![tool]);
        let result = dispatcher
            .dispatch(&tool_call("c1", "count", r#"{"step":"x"}"#), &CancellationToken::new())
            .await;
        assert_eq!(result.error_kind, Some(ToolErrorKind::InvalidArguments));
        assert!(result.output_text().contains("no object generated"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_and_truncated_arguments_are_accepted() {
        let (tool, calls) = counter_tool("count");
        let dispatcher = dispatcher(vec![tool]);
        let token = CancellationToken::new();
        let empty = dispatcher.dispatch(&tool_call("c1", "count", ""), &token).await;
        let truncated = dispatcher
            .dispatch(&tool_call("c2", "count", r#"{"step":2"#), &token)
            .await;
        assert!(!empty.is_error);
        assert_eq!(truncated.output, json!({"count": 3}));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn tool_failures_and_panics_are_contained() {
        let dispatcher = dispatcher(vec![failing_tool("fail"), panicking_tool("panic")]);
        let token = CancellationToken::new();
        let failed = dispatcher.dispatch(&tool_call("a", "fail", "{}"), &token).await;
        let panicked = dispatcher.dispatch(&tool_call("b", "panic", "{}"), &token).await;
        assert_eq!(failed.error_kind, Some(ToolErrorKind::Execution));
        assert!(failed.output_text().contains("boom"));
        assert_eq!(panicked.error_kind, Some(ToolErrorKind::Execution));
        assert_eq!(panicked.tool_call_id, "b");
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_running_tool() {
        let slow: Arc<dyn Tool> = Arc::new(FnTool::new(
            ToolDefinition::new("slow", "", json!({"type":"object"})),
            |_input, _ctx| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            },
        ));
        let dispatcher = dispatcher(vec![slow]);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.dispatch(&tool_call("s", "slow", "{}"), &token),
        )
        .await
        .expect("dispatch returns promptly");
        assert_eq!(result.error_kind, Some(ToolErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn dropping_a_dispatch_aborts_the_tool() {
        let (slow, finished) = slow_tool("slow", Duration::from_millis(100));
        let dispatcher = dispatcher(vec![slow]);
        let token = CancellationToken::new();
        let dispatched = tokio::time::timeout(
            Duration::from_millis(20),
            dispatcher.dispatch(&tool_call("s", "slow", "{}"), &token),
        )
        .await;
        assert!(dispatched.is_err());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!finished.load(Ordering::SeqCst));
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn calls_run_concurrently_and_complete_in_completion_order() {
        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let make = |name: &'static str, delay_ms: u64| -> Arc<dyn Tool> {
            let barrier = barrier.clone();
            Arc::new(FnTool::new(
                ToolDefinition::new(name, "", json!({"type":"object"})),
                move |_input, _ctx| {
                    let barrier = barrier.clone();
                    async move {
                        barrier.wait().await;
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        Ok(json!(name))
                    }
                },
            ))
        };
        let dispatcher = dispatcher(vec![make("slow", 80), make("fast", 0)]);
        let results = tokio::time::timeout(
            Duration::from_secs(5),
            dispatcher.dispatch_all(
                &[tool_call("1", "slow", "{}"), tool_call("2", "fast", "{}")],
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("both tools must run at the same time");
        let order: Vec<_> = results.iter().map(|r| r.tool_call_id.as_str()).collect();
        assert_eq!(order, vec!["2", "1"]);
    }
}
