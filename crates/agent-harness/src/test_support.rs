//! Scripted fakes shared by the crate's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use std::sync::{Arc, Mutex};

use futures::{StreamExt as _, stream};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::content::ToolCall;
use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::normalize::{AnthropicNormalizer, ChunkNormalizer, OpenAiChatNormalizer};
use crate::provider::{ProviderAdapter, ProviderRequest, ProviderResponseMeta, ProviderStreamHandle};
use crate::sse::RawChunk;
use crate::tool::{FnTool, Tool, ToolContext, ToolDefinition, ToolError};

/// One scripted model response.
pub(crate) enum Script {
    Chunks(Vec<Result<RawChunk, ProviderError>>),
    /// Yields the chunks, then never completes.
    ChunksThenPending(Vec<RawChunk>),
    Fail(ProviderError),
}

impl Script {
    pub fn chunks(chunks: Vec<RawChunk>) -> Self {
        Self::Chunks(chunks.into_iter().map(Ok).collect())
    }

    pub fn chunks_then_pending(chunks: Vec<RawChunk>) -> Self {
        Self::ChunksThenPending(chunks)
    }

    pub fn fail(error: ProviderError) -> Self {
        Self::Fail(error)
    }
}

/// Provider that replays one [`Script`] per model call and records requests.
pub(crate) struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
    calls: AtomicUsize,
    /// Scripts hold Messages API events instead of Chat Completions chunks.
    anthropic: bool,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            anthropic: false,
        })
    }

    pub fn anthropic(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            anthropic: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new("scripted")
    }

    async fn start_stream(
        &self,
        request: ProviderRequest,
        _cancellation: CancellationToken,
    ) -> Result<ProviderStreamHandle, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().expect("requests lock").push(request);
        let script = self.scripts.lock().expect("scripts lock").pop_front();
        let stream = match script {
            Some(Script::Chunks(chunks)) => stream::iter(chunks).boxed(),
            Some(Script::ChunksThenPending(chunks)) => stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed(),
            Some(Script::Fail(error)) => return Err(error),
            None => return Err(ProviderError::protocol("scripted", "script exhausted")),
        };
        Ok(ProviderStreamHandle {
            stream,
            metadata: ProviderResponseMeta::default(),
        })
    }

    fn normalizer(&self) -> Box<dyn ChunkNormalizer> {
        if self.anthropic {
            Box::new(AnthropicNormalizer::new("scripted"))
        } else {
            Box::new(OpenAiChatNormalizer::new("scripted"))
        }
    }
}

fn delta_chunk(delta: Value) -> RawChunk {
    RawChunk::data(
        json!({"id":"resp-1","choices":[{"index":0,"delta":delta,"finish_reason":null}]}).to_string(),
    )
}

pub(crate) fn text_chunk(text: &str) -> RawChunk {
    delta_chunk(json!({"content": text}))
}

pub(crate) fn reasoning_chunk(text: &str) -> RawChunk {
    delta_chunk(json!({"reasoning_content": text}))
}

pub(crate) fn tool_call_chunk(index: u64, id: &str, name: &str, arguments: &str) -> RawChunk {
    delta_chunk(json!({"tool_calls":[{
        "index": index,
        "id": id,
        "type": "function",
        "function": {"name": name, "arguments": arguments}
    }]}))
}

pub(crate) fn finish_chunk(reason: &str) -> RawChunk {
    RawChunk::data(
        json!({"id":"resp-1","choices":[{"index":0,"delta":{},"finish_reason":reason}]}).to_string(),
    )
}

pub(crate) fn usage_chunk(input: u64, output: u64) -> RawChunk {
    RawChunk::data(
        json!({"id":"resp-1","choices":[],"usage":{"prompt_tokens":input,"completion_tokens":output}})
            .to_string(),
    )
}

/// Messages API frame with the event name repeated as `event:`.
pub(crate) fn anthropic_event(payload: Value) -> RawChunk {
    let name = payload["type"].as_str().unwrap_or_default().to_string();
    RawChunk::new(Some(&name), payload.to_string())
}

pub(crate) fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }
}

/// Adds `step` (default 1) to a shared total and returns the new total.
pub(crate) fn counter_tool(name: &str) -> (Arc<dyn Tool>, Arc<AtomicUsize>) {
    let total = Arc::new(AtomicUsize::new(0));
    let shared = total.clone();
    let tool = FnTool::new(
        ToolDefinition::new(
            name,
            "Adds to a running total",
            json!({"type":"object","properties":{"step":{"type":"integer","minimum":1}}}),
        ),
        move |input: Value, _ctx| {
            let shared = shared.clone();
            async move {
                let step = input.get("step").and_then(Value::as_u64).unwrap_or(1) as usize;
                let count = shared.fetch_add(step, Ordering::SeqCst) + step;
                Ok(json!({ "count": count }))
            }
        },
    );
    (Arc::new(tool), total)
}

/// Sleeps for `delay` without watching its token, then raises the flag.
pub(crate) fn slow_tool(name: &str, delay: Duration) -> (Arc<dyn Tool>, Arc<AtomicBool>) {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let tool = FnTool::new(
        ToolDefinition::new(name, "Finishes after a delay", json!({"type":"object"})),
        move |_input: Value, _ctx| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(delay).await;
                flag.store(true, Ordering::SeqCst);
                Ok(json!("done"))
            }
        },
    );
    (Arc::new(tool), finished)
}

pub(crate) fn failing_tool(name: &str) -> Arc<dyn Tool> {
    Arc::new(FnTool::new(
        ToolDefinition::new(name, "Always fails", json!({"type":"object"})),
        |_input, _ctx| async { Err(ToolError::Execution("boom".into())) },
    ))
}

struct PanickingTool(String);

#[async_trait::async_trait]
impl Tool for PanickingTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(&self.0, "Panics", json!({"type":"object"}))
    }

    async fn invoke(&self, _input: Value, _context: ToolContext) -> Result<Value, ToolError> {
        panic!("tool bug")
    }
}

pub(crate) fn panicking_tool(name: &str) -> Arc<dyn Tool> {
    Arc::new(PanickingTool(name.to_string()))
}
