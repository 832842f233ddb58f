use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::HarnessError;

/// Describes a tool's interface for model consumption.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name within a run (for example `get_weather`).
    pub name: String,
    /// Human-readable description for the model.
    pub description: String,
    /// JSON Schema the arguments are validated against before invocation.
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Per-invocation context handed to a tool.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Call identifier assigned by the model.
    pub call_id: String,
    /// Cancelled when the run is cancelled or times out.
    pub cancellation: CancellationToken,
}

/// Errors a tool may return. They are reported to the model, never to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("cancelled")]
    Cancelled,
}

/// Category of a failed tool result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    UnknownTool,
    InvalidArguments,
    Execution,
    Cancelled,
}

/// Outcome of one tool call, sent back to the model as the tool's output.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolResult {
    /// Matches the originating `ToolCall::id`.
    pub tool_call_id: String,
    pub tool_name: String,
    /// Tool response, or an error description when `is_error` is set.
    pub output: Value,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, tool_name: impl Into<String>, output: Value) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            output,
            is_error: false,
            error_kind: None,
        }
    }

    pub fn failure(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        kind: ToolErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            output: Value::String(message.into()),
            is_error: true,
            error_kind: Some(kind),
        }
    }

    /// Output rendered as text for transports that only accept strings.
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// The extension point every tool implements.
///
/// Tools are object-safe, `Send + Sync`, and async. `input` has already been
/// validated against `definition().input_schema`.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn invoke(&self, input: Value, context: ToolContext) -> Result<Value, ToolError>;
}

type ToolFuture = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>;
type ToolHandler = dyn Fn(Value, ToolContext) -> ToolFuture + Send + Sync;

/// Tool backed by an async closure.
pub struct FnTool {
    definition: ToolDefinition,
    handler: Box<ToolHandler>,
}

impl FnTool {
    pub fn new<F, Fut>(definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        Self {
            definition,
            handler: Box::new(move |input, context| Box::pin(handler(input, context))),
        }
    }
}

#[async_trait::async_trait]
impl Tool for FnTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn invoke(&self, input: Value, context: ToolContext) -> Result<Value, ToolError> {
        (self.handler)(input, context).await
    }
}

/// Immutable set of registered tools, shared read-only for a run.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Registration order, so definitions reach the model deterministically.
    order: Vec<String>,
}

impl ToolSet {
    /// Builds a set and rejects duplicate names.
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Result<Self, HarnessError> {
        let mut set = Self::default();
        for tool in tools {
            let name = tool.definition().name;
            if name.trim().is_empty() {
                return Err(HarnessError::Validation("tool name must not be empty".into()));
            }
            if set.tools.contains_key(&name) {
                return Err(HarnessError::Validation(format!(
                    "duplicate tool registration: {name}"
                )));
            }
            set.order.push(name.clone());
            set.tools.insert(name, tool);
        }
        Ok(set)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
