use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use serde_json::{Value, json};

use super::options::OpenAiRequestOptions;
use crate::content::{ContentPart, Message, Role};
use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::provider::ProviderRequest;
use crate::sse::{RawChunk, SseDecoder};

pub(crate) type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Builds a streaming Chat Completions body from the conversation and tools.
pub(crate) fn build_request_body(request: &ProviderRequest, options: &OpenAiRequestOptions) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system_prompt) = request
        .system_prompt
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        messages.push(json!({"role": "system", "content": system_prompt}));
    }
    for message in &request.messages {
        render_message(message, &mut messages);
    }

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
        "stream_options": {"include_usage": true},
    });
    if !request.tools.is_empty() {
        body["tools"] = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    }
                })
            })
            .collect();
        if let Some(parallel) = options.parallel_tool_calls {
            body["parallel_tool_calls"] = json!(parallel);
        }
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = options.max_tokens {
        body["max_completion_tokens"] = json!(max_tokens);
    }
    if let Some(effort) = options.reasoning_effort {
        body["reasoning_effort"] = json!(effort);
    }
    body
}

fn render_message(message: &Message, out: &mut Vec<Value>) {
    match message.role {
        Role::User => out.push(json!({"role": "user", "content": message.text()})),
        Role::Assistant => {
            let text = message.text();
            let tool_calls: Vec<Value> = message
                .tool_calls()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {"name": call.name, "arguments": call.arguments},
                    })
                })
                .collect();
            let content = if text.is_empty() {
                Value::Null
            } else {
                Value::String(text)
            };
            let mut rendered = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                rendered["tool_calls"] = Value::Array(tool_calls);
            }
            out.push(rendered);
        }
        // Chat Completions takes one message per tool result.
        Role::Tool => {
            for part in &message.parts {
                if let ContentPart::ToolResult(result) = part {
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": result.tool_call_id,
                        "content": result.output_text(),
                    }));
                }
            }
        }
    }
}

/// Frames a response body into raw SSE chunks.
pub(crate) fn chunk_stream(
    provider_id: ProviderId,
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<RawChunk, ProviderError>> + Send {
    struct State {
        provider_id: ProviderId,
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<RawChunk>,
        done: bool,
    }

    stream::try_unfold(
        State {
            provider_id,
            bytes_stream,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(chunk) = state.pending.pop_front() {
                    return Ok(Some((chunk, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(bytes)) => {
                        state.pending.extend(state.decoder.push_chunk(&bytes));
                    }
                    Some(Err(e)) => {
                        return Err(ProviderError::transport(
                            state.provider_id,
                            format!("OpenAI streaming read failed: {e}"),
                        ));
                    }
                    None => {
                        state.pending.extend(state.decoder.finish());
                        state.done = true;
                    }
                }
            }
        },
    )
}
