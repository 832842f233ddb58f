use std::collections::HashMap;

use serde_json::Value;

use super::{BlockKind, ChunkNormalizer, NormalizerState, ResponseMeta, parse_payload};
use crate::errors::RunFailure;
use crate::model::ProviderId;
use crate::sse::RawChunk;
use crate::stream::{StreamEvent, Usage};

/// Normalizer for Anthropic Messages API streams.
///
/// Boundaries are explicit (`content_block_start` / `content_block_stop`), so
/// reasoning is never closed implicitly. Blocks are keyed by their `index`;
/// `tool_use` blocks take the vendor call id, other blocks a synthesized one.
pub struct AnthropicNormalizer {
    provider: ProviderId,
    state: NormalizerState,
    /// Block index to canonical id. Entries stay after close so a second
    /// start for the same index is detected.
    blocks: HashMap<u64, String>,
}

impl Default for AnthropicNormalizer {
    fn default() -> Self {
        Self::new("anthropic")
    }
}

impl AnthropicNormalizer {
    pub fn new(provider: impl Into<ProviderId>) -> Self {
        Self {
            provider: provider.into(),
            state: NormalizerState::default(),
            blocks: HashMap::new(),
        }
    }

    fn apply(
        &mut self,
        event_name: Option<&str>,
        value: &Value,
        out: &mut Vec<StreamEvent>,
    ) -> Result<(), RunFailure> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .or(event_name)
            .unwrap_or_default();
        match kind {
            "message_start" => {
                let message = value.get("message").unwrap_or(&Value::Null);
                if let Some(id) = message.get("id").and_then(Value::as_str) {
                    self.state.meta.response_id = Some(id.to_string());
                }
                if let Some(usage) = message.get("usage") {
                    self.merge_usage(usage);
                }
                Ok(())
            }
            "content_block_start" => self.block_start(value, out),
            "content_block_delta" => self.block_delta(value, out),
            "content_block_stop" => {
                let index = block_index(value)?;
                let Some(id) = self.blocks.get(&index).cloned() else {
                    return Err(RunFailure::protocol(format!(
                        "content block index {index}: stop before start"
                    )));
                };
                self.state.table.end(&id, out)
            }
            "message_delta" => {
                if let Some(reason) = value
                    .get("delta")
                    .and_then(|delta| delta.get("stop_reason"))
                    .and_then(Value::as_str)
                {
                    self.state.meta.finish_reason = Some(reason.to_string());
                }
                if let Some(usage) = value.get("usage") {
                    self.merge_usage(usage);
                }
                Ok(())
            }
            "error" => {
                let message = value
                    .get("error")
                    .and_then(|error| error.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("provider stream error");
                Err(RunFailure::Provider {
                    provider: self.provider.to_string(),
                    message: message.to_string(),
                })
            }
            // message_stop, ping and unknown event types carry no content.
            _ => Ok(()),
        }
    }

    fn block_start(&mut self, value: &Value, out: &mut Vec<StreamEvent>) -> Result<(), RunFailure> {
        let index = block_index(value)?;
        if let Some(id) = self.blocks.get(&index) {
            let what = if self.state.table.is_open(id) {
                "started while open"
            } else {
                "reopened after close"
            };
            return Err(RunFailure::protocol(format!(
                "content block index {index}: {what}"
            )));
        }
        let block = value.get("content_block").unwrap_or(&Value::Null);
        let block_type = block.get("type").and_then(Value::as_str).unwrap_or_default();
        let str_field = |name: &str| block.get(name).and_then(Value::as_str).unwrap_or_default();
        match block_type {
            "tool_use" => {
                let id = match str_field("id") {
                    "" => format!("tool-{index}"),
                    id => id.to_string(),
                };
                self.state.table.tool_start(&id, str_field("name"), out)?;
                self.blocks.insert(index, id);
            }
            "thinking" | "redacted_thinking" => {
                let id = format!("reasoning-{index}");
                self.state.table.declare(&id, BlockKind::Reasoning)?;
                self.state.table.reasoning_delta(&id, str_field("thinking"), out)?;
                self.blocks.insert(index, id);
            }
            _ => {
                let id = format!("text-{index}");
                self.state.table.declare(&id, BlockKind::Text)?;
                self.state.table.text_delta(&id, str_field("text"), out)?;
                self.blocks.insert(index, id);
            }
        }
        Ok(())
    }

    fn block_delta(&mut self, value: &Value, out: &mut Vec<StreamEvent>) -> Result<(), RunFailure> {
        let index = block_index(value)?;
        let Some(id) = self.blocks.get(&index).cloned() else {
            return Err(RunFailure::protocol(format!(
                "content block index {index}: delta before start"
            )));
        };
        let delta = value.get("delta").unwrap_or(&Value::Null);
        let str_field = |name: &str| delta.get(name).and_then(Value::as_str).unwrap_or_default();
        match delta.get("type").and_then(Value::as_str).unwrap_or_default() {
            "text_delta" => self.state.table.text_delta(&id, str_field("text"), out),
            "thinking_delta" => self.state.table.reasoning_delta(&id, str_field("thinking"), out),
            "input_json_delta" => self.state.table.tool_delta(&id, str_field("partial_json"), out),
            // signature_delta and future delta kinds carry no canonical content.
            _ => Ok(()),
        }
    }

    fn merge_usage(&mut self, usage: &Value) {
        let current = self.state.meta.usage.get_or_insert_with(Usage::default);
        if let Some(input) = usage.get("input_tokens").and_then(Value::as_u64) {
            current.input_tokens = input;
        }
        if let Some(output) = usage.get("output_tokens").and_then(Value::as_u64) {
            current.output_tokens = output;
        }
    }
}

impl ChunkNormalizer for AnthropicNormalizer {
    fn normalize(&mut self, chunk: RawChunk) -> Vec<StreamEvent> {
        if self.state.is_terminated() || chunk.data.trim().is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        let result = parse_payload(&chunk)
            .and_then(|value| self.apply(chunk.event.as_deref(), &value, &mut out));
        self.state.settle(out, result)
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        self.state.finish()
    }

    fn response_meta(&self) -> &ResponseMeta {
        &self.state.meta
    }
}

fn block_index(value: &Value) -> Result<u64, RunFailure> {
    value
        .get("index")
        .and_then(Value::as_u64)
        .ok_or_else(|| RunFailure::protocol("content block event without index"))
}
