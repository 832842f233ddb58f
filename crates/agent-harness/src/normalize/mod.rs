//! Vendor chunk normalization into canonical [`StreamEvent`]s.
//!
//! Each adapter owns a [`BlockTable`] that enforces the per-block lifecycle
//! `absent -> open -> closed`. A lifecycle violation or an unparseable chunk
//! emits a single `error` event and terminates the normalizer; nothing is
//! emitted after that, including from [`ChunkNormalizer::finish`].

pub mod anthropic;
pub mod openai_chat;

use std::collections::HashMap;

use crate::errors::RunFailure;
use crate::sse::RawChunk;
use crate::stream::{StreamEvent, Usage};

pub use anthropic::AnthropicNormalizer;
pub use openai_chat::OpenAiChatNormalizer;

/// Converts one model response's raw chunks into canonical events.
///
/// One instance per response; instances are never shared between runs.
pub trait ChunkNormalizer: Send {
    /// Events produced by one chunk, in emission order.
    fn normalize(&mut self, chunk: RawChunk) -> Vec<StreamEvent>;

    /// Called once the transport ended; closes blocks that are still open.
    fn finish(&mut self) -> Vec<StreamEvent>;

    /// Response-level metadata seen so far.
    fn response_meta(&self) -> &ResponseMeta;
}

/// Response-level data that does not belong to any content block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub response_id: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// Whether non-reasoning content implicitly ends an open reasoning block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReasoningPolicy {
    /// Text or a tool call closes reasoning the moment it appears.
    #[default]
    Implicit,
    /// Reasoning stays open until the vendor closes it or the response ends.
    Explicit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Text,
    Reasoning,
    ToolCall,
}

#[derive(Debug)]
enum BlockState {
    /// Announced by the vendor, but no canonical event emitted yet.
    Pending(BlockKind),
    Open(OpenBlock),
    Closed,
}

#[derive(Debug)]
enum OpenBlock {
    Text,
    Reasoning,
    ToolCall { name: String, arguments: String },
}

impl OpenBlock {
    fn kind(&self) -> BlockKind {
        match self {
            Self::Text => BlockKind::Text,
            Self::Reasoning => BlockKind::Reasoning,
            Self::ToolCall { .. } => BlockKind::ToolCall,
        }
    }
}

/// Per-response open/closed table of content blocks.
#[derive(Debug, Default)]
pub(crate) struct BlockTable {
    blocks: HashMap<String, BlockState>,
    /// Ids in opening order; closing all blocks walks this.
    order: Vec<String>,
}

impl BlockTable {
    /// Registers a block whose start event is emitted lazily.
    pub fn declare(&mut self, id: &str, kind: BlockKind) -> Result<(), RunFailure> {
        if self.blocks.contains_key(id) {
            return Err(violation(id, "started twice"));
        }
        self.insert(id, BlockState::Pending(kind));
        Ok(())
    }

    pub fn tool_start(
        &mut self,
        id: &str,
        name: &str,
        out: &mut Vec<StreamEvent>,
    ) -> Result<(), RunFailure> {
        match self.blocks.get(id) {
            None | Some(BlockState::Pending(BlockKind::ToolCall)) => {}
            Some(BlockState::Closed) => return Err(violation(id, "reopened after close")),
            Some(_) => return Err(violation(id, "started twice")),
        }
        self.insert(
            id,
            BlockState::Open(OpenBlock::ToolCall {
                name: name.to_string(),
                arguments: String::new(),
            }),
        );
        out.push(StreamEvent::ToolCallStart {
            id: id.to_string(),
            tool_name: name.to_string(),
        });
        Ok(())
    }

    pub fn text_delta(
        &mut self,
        id: &str,
        text: &str,
        out: &mut Vec<StreamEvent>,
    ) -> Result<(), RunFailure> {
        if text.is_empty() {
            return self.ensure_accepts(id, BlockKind::Text);
        }
        self.open_lazily(id, BlockKind::Text, OpenBlock::Text)?;
        out.push(StreamEvent::TextDelta {
            id: id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    /// Emits `reasoning-start` before the first non-empty reasoning token.
    pub fn reasoning_delta(
        &mut self,
        id: &str,
        text: &str,
        out: &mut Vec<StreamEvent>,
    ) -> Result<(), RunFailure> {
        if text.is_empty() {
            return self.ensure_accepts(id, BlockKind::Reasoning);
        }
        if self.open_lazily(id, BlockKind::Reasoning, OpenBlock::Reasoning)? {
            out.push(StreamEvent::ReasoningStart { id: id.to_string() });
        }
        out.push(StreamEvent::ReasoningDelta {
            id: id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    pub fn tool_delta(
        &mut self,
        id: &str,
        fragment: &str,
        out: &mut Vec<StreamEvent>,
    ) -> Result<(), RunFailure> {
        match self.blocks.get_mut(id) {
            Some(BlockState::Open(OpenBlock::ToolCall { arguments, .. })) => {
                if fragment.is_empty() {
                    return Ok(());
                }
                arguments.push_str(fragment);
                out.push(StreamEvent::ToolCallDelta {
                    id: id.to_string(),
                    arguments_delta: fragment.to_string(),
                });
                Ok(())
            }
            Some(BlockState::Closed) => Err(violation(id, "delta after close")),
            Some(_) => Err(violation(id, "argument delta for a non tool-call block")),
            None => Err(violation(id, "delta before start")),
        }
    }

    /// Closes `id`, emitting the matching end event if the block was started.
    pub fn end(&mut self, id: &str, out: &mut Vec<StreamEvent>) -> Result<(), RunFailure> {
        let state = match self.blocks.get_mut(id) {
            None => return Err(violation(id, "end before start")),
            Some(BlockState::Closed) => return Err(violation(id, "closed twice")),
            Some(state) => std::mem::replace(state, BlockState::Closed),
        };
        if let BlockState::Open(block) = state {
            match block {
                OpenBlock::Text => {}
                OpenBlock::Reasoning => out.push(StreamEvent::ReasoningEnd { id: id.to_string() }),
                OpenBlock::ToolCall { name, arguments } => out.push(StreamEvent::ToolCallEnd {
                    id: id.to_string(),
                    tool_name: name,
                    arguments,
                }),
            }
        }
        Ok(())
    }

    /// Closes every block of `kind` that is still open, in opening order.
    pub fn close_kind(&mut self, kind: BlockKind, out: &mut Vec<StreamEvent>) {
        let ids: Vec<String> = self
            .order
            .iter()
            .filter(|id| match self.blocks.get(id.as_str()) {
                Some(BlockState::Open(block)) => block.kind() == kind,
                Some(BlockState::Pending(pending)) => *pending == kind,
                _ => false,
            })
            .cloned()
            .collect();
        for id in ids {
            // Only open or pending ids were selected, so `end` cannot fail.
            let _ = self.end(&id, out);
        }
    }

    /// Closes every open block, in opening order.
    pub fn close_all(&mut self, out: &mut Vec<StreamEvent>) {
        let ids: Vec<String> = self
            .order
            .iter()
            .filter(|id| self.is_open(id))
            .cloned()
            .collect();
        for id in ids {
            let _ = self.end(&id, out);
        }
    }

    pub fn is_open(&self, id: &str) -> bool {
        matches!(
            self.blocks.get(id),
            Some(BlockState::Open(_) | BlockState::Pending(_))
        )
    }

    fn insert(&mut self, id: &str, state: BlockState) {
        if self.blocks.insert(id.to_string(), state).is_none() {
            self.order.push(id.to_string());
        }
    }

    /// Opens `id` if absent or pending; returns whether it was newly opened.
    fn open_lazily(
        &mut self,
        id: &str,
        kind: BlockKind,
        block: OpenBlock,
    ) -> Result<bool, RunFailure> {
        self.ensure_accepts(id, kind)?;
        match self.blocks.get(id) {
            Some(BlockState::Open(_)) => Ok(false),
            _ => {
                self.insert(id, BlockState::Open(block));
                Ok(true)
            }
        }
    }

    fn ensure_accepts(&self, id: &str, kind: BlockKind) -> Result<(), RunFailure> {
        match self.blocks.get(id) {
            None => Ok(()),
            Some(BlockState::Pending(pending)) if *pending == kind => Ok(()),
            Some(BlockState::Open(block)) if block.kind() == kind => Ok(()),
            Some(BlockState::Closed) => Err(violation(id, "delta after close")),
            Some(_) => Err(violation(id, "content kind changed mid-block")),
        }
    }
}

fn violation(id: &str, what: &str) -> RunFailure {
    RunFailure::protocol(format!("content block {id}: {what}"))
}

/// Lifecycle shared by adapters: the block table, metadata and the terminal
/// latch.
#[derive(Debug, Default)]
pub(crate) struct NormalizerState {
    pub table: BlockTable,
    pub meta: ResponseMeta,
    terminated: bool,
}

impl NormalizerState {
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Keeps events produced before a failure and appends the single error.
    pub fn settle(
        &mut self,
        mut out: Vec<StreamEvent>,
        result: Result<(), RunFailure>,
    ) -> Vec<StreamEvent> {
        if let Err(error) = result {
            tracing::debug!(%error, "normalizer terminated");
            self.terminated = true;
            out.push(StreamEvent::Error { error });
        }
        out
    }

    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        self.terminated = true;
        let mut out = Vec::new();
        self.table.close_all(&mut out);
        out
    }
}

pub(crate) fn parse_payload(chunk: &RawChunk) -> Result<serde_json::Value, RunFailure> {
    serde_json::from_str(&chunk.data)
        .map_err(|err| RunFailure::protocol(format!("unparseable chunk: {err}")))
}
