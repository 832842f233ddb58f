use std::collections::BTreeMap;

use serde_json::Value;

use super::{BlockKind, ChunkNormalizer, NormalizerState, ReasoningPolicy, ResponseMeta, parse_payload};
use crate::errors::RunFailure;
use crate::model::ProviderId;
use crate::sse::RawChunk;
use crate::stream::{StreamEvent, Usage};

/// Normalizer for OpenAI-compatible Chat Completions streams.
///
/// Reasoning arrives as `delta.reasoning_content` (or `delta.reasoning`), text
/// as `delta.content` and tool calls as `delta.tool_calls[]` keyed by `index`.
/// The vendor has no explicit block boundaries, so text and reasoning ids are
/// synthesized and tool calls close on `finish_reason` or at stream end.
pub struct OpenAiChatNormalizer {
    provider: ProviderId,
    policy: ReasoningPolicy,
    state: NormalizerState,
    text_id: Option<String>,
    reasoning_id: Option<String>,
    text_seq: usize,
    reasoning_seq: usize,
    /// Tool-call `index` to the call id first seen for it.
    tool_calls: BTreeMap<u64, String>,
}

impl Default for OpenAiChatNormalizer {
    fn default() -> Self {
        Self::new("openai")
    }
}

impl OpenAiChatNormalizer {
    pub fn new(provider: impl Into<ProviderId>) -> Self {
        Self {
            provider: provider.into(),
            policy: ReasoningPolicy::Implicit,
            state: NormalizerState::default(),
            text_id: None,
            reasoning_id: None,
            text_seq: 0,
            reasoning_seq: 0,
            tool_calls: BTreeMap::new(),
        }
    }

    pub fn with_reasoning_policy(mut self, policy: ReasoningPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn apply(&mut self, value: &Value, out: &mut Vec<StreamEvent>) -> Result<(), RunFailure> {
        if let Some(error) = value.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("provider stream error");
            return Err(RunFailure::Provider {
                provider: self.provider.to_string(),
                message: message.to_string(),
            });
        }
        if let Some(id) = value.get("id").and_then(Value::as_str)
            && self.state.meta.response_id.is_none()
        {
            self.state.meta.response_id = Some(id.to_string());
        }
        if let Some(usage) = value.get("usage").filter(|usage| !usage.is_null()) {
            self.state.meta.usage = Some(map_usage(usage));
        }
        let choices = value
            .get("choices")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        // Only the first choice is tracked; `n > 1` is not requested.
        let Some(choice) = choices
            .iter()
            .find(|choice| choice.get("index").and_then(Value::as_u64).unwrap_or(0) == 0)
        else {
            return Ok(());
        };
        if let Some(delta) = choice.get("delta") {
            self.apply_delta(delta, out)?;
        }
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.state.meta.finish_reason = Some(reason.to_string());
            self.close_reasoning(out);
            self.state.table.close_kind(BlockKind::ToolCall, out);
        }
        Ok(())
    }

    fn apply_delta(&mut self, delta: &Value, out: &mut Vec<StreamEvent>) -> Result<(), RunFailure> {
        let reasoning = delta
            .get("reasoning_content")
            .or_else(|| delta.get("reasoning"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !reasoning.is_empty() {
            let id = self.reasoning_block();
            self.state.table.reasoning_delta(&id, reasoning, out)?;
        }

        if let Some(text) = delta.get("content").and_then(Value::as_str)
            && !text.is_empty()
        {
            if self.policy == ReasoningPolicy::Implicit {
                self.close_reasoning(out);
            }
            let id = self.text_block();
            self.state.table.text_delta(&id, text, out)?;
        }

        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            if self.policy == ReasoningPolicy::Implicit && !calls.is_empty() {
                self.close_reasoning(out);
            }
            for call in calls {
                self.apply_tool_call(call, out)?;
            }
        }
        Ok(())
    }

    fn apply_tool_call(&mut self, call: &Value, out: &mut Vec<StreamEvent>) -> Result<(), RunFailure> {
        let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
        let function = call.get("function");
        let id = match self.tool_calls.get(&index) {
            Some(id) => id.clone(),
            None => {
                let id = call
                    .get("id")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| format!("call_{index}"));
                let name = function
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                self.state.table.tool_start(&id, name, out)?;
                self.tool_calls.insert(index, id.clone());
                id
            }
        };
        let arguments = function
            .and_then(|f| f.get("arguments"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        self.state.table.tool_delta(&id, arguments, out)
    }

    fn text_block(&mut self) -> String {
        if let Some(id) = &self.text_id {
            return id.clone();
        }
        let id = format!("text-{}", self.text_seq);
        self.text_seq += 1;
        self.text_id = Some(id.clone());
        id
    }

    fn reasoning_block(&mut self) -> String {
        if let Some(id) = &self.reasoning_id {
            return id.clone();
        }
        let id = format!("reasoning-{}", self.reasoning_seq);
        self.reasoning_seq += 1;
        self.reasoning_id = Some(id.clone());
        id
    }

    fn close_reasoning(&mut self, out: &mut Vec<StreamEvent>) {
        if let Some(id) = self.reasoning_id.take()
            && self.state.table.is_open(&id)
        {
            let _ = self.state.table.end(&id, out);
        }
    }
}

impl ChunkNormalizer for OpenAiChatNormalizer {
    fn normalize(&mut self, chunk: RawChunk) -> Vec<StreamEvent> {
        if self.state.is_terminated() {
            return Vec::new();
        }
        let data = chunk.data.trim();
        if data.is_empty() || data == "[DONE]" {
            return Vec::new();
        }
        let mut out = Vec::new();
        let result = parse_payload(&chunk).and_then(|value| self.apply(&value, &mut out));
        self.state.settle(out, result)
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        self.state.finish()
    }

    fn response_meta(&self) -> &ResponseMeta {
        &self.state.meta
    }
}

fn map_usage(usage: &Value) -> Usage {
    let field = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0);
    Usage {
        input_tokens: field("prompt_tokens"),
        output_tokens: field("completion_tokens"),
    }
}
