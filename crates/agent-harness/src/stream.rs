use std::ops::AddAssign;

use crate::errors::RunFailure;
use crate::run::TerminalReason;
use crate::tool::ToolResult;

/// Token accounting reported by the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.input_tokens += rhs.input_tokens;
        self.output_tokens += rhs.output_tokens;
    }
}

/// Vendor-neutral streaming events.
///
/// Every event except `Error` and `Finish` carries the id of the content block
/// it belongs to. For a given id, the start event precedes every delta, which
/// precede the end event. Tool-call blocks use the vendor call id as block id.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    /// Incremental answer text.
    TextDelta { id: String, text: String },
    /// First reasoning token of a block arrived.
    ReasoningStart { id: String },
    ReasoningDelta { id: String, text: String },
    ReasoningEnd { id: String },
    /// The model started a tool call.
    ToolCallStart { id: String, tool_name: String },
    /// Raw argument text fragment for an open tool call.
    ToolCallDelta { id: String, arguments_delta: String },
    /// Tool call is complete; `arguments` is the full accumulated text.
    ToolCallEnd {
        id: String,
        tool_name: String,
        arguments: String,
    },
    /// A dispatched tool call resolved (successfully or not).
    ToolResult { id: String, result: ToolResult },
    /// One model-call-and-consume cycle finished.
    StepFinish {
        id: String,
        step: usize,
        finish_reason: Option<String>,
        usage: Option<Usage>,
    },
    /// Fatal failure. Nothing follows except `Finish`.
    Error { error: RunFailure },
    /// Terminal run event.
    Finish { reason: TerminalReason, usage: Usage },
}

/// Fieldless discriminant of [`StreamEvent`], used to key observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    TextDelta,
    ReasoningStart,
    ReasoningDelta,
    ReasoningEnd,
    ToolCallStart,
    ToolCallDelta,
    ToolCallEnd,
    ToolResult,
    StepFinish,
    Error,
    Finish,
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TextDelta { .. } => EventKind::TextDelta,
            Self::ReasoningStart { .. } => EventKind::ReasoningStart,
            Self::ReasoningDelta { .. } => EventKind::ReasoningDelta,
            Self::ReasoningEnd { .. } => EventKind::ReasoningEnd,
            Self::ToolCallStart { .. } => EventKind::ToolCallStart,
            Self::ToolCallDelta { .. } => EventKind::ToolCallDelta,
            Self::ToolCallEnd { .. } => EventKind::ToolCallEnd,
            Self::ToolResult { .. } => EventKind::ToolResult,
            Self::StepFinish { .. } => EventKind::StepFinish,
            Self::Error { .. } => EventKind::Error,
            Self::Finish { .. } => EventKind::Finish,
        }
    }

    /// Content-block id, absent for `Error` and `Finish`.
    pub fn block_id(&self) -> Option<&str> {
        match self {
            Self::TextDelta { id, .. }
            | Self::ReasoningStart { id }
            | Self::ReasoningDelta { id, .. }
            | Self::ReasoningEnd { id }
            | Self::ToolCallStart { id, .. }
            | Self::ToolCallDelta { id, .. }
            | Self::ToolCallEnd { id, .. }
            | Self::ToolResult { id, .. }
            | Self::StepFinish { id, .. } => Some(id),
            Self::Error { .. } | Self::Finish { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_kebab_case_tag() {
        let event = StreamEvent::ReasoningDelta {
            id: "r0".into(),
            text: "hmm".into(),
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["type"], "reasoning-delta");
        assert_eq!(event.kind(), EventKind::ReasoningDelta);
        assert_eq!(event.block_id(), Some("r0"));
    }

    #[test]
    fn terminal_events_have_no_block_id() {
        let finish = StreamEvent::Finish {
            reason: TerminalReason::Finished,
            usage: Usage::default(),
        };
        assert_eq!(finish.block_id(), None);
    }

    #[test]
    fn usage_accumulates() {
        let mut usage = Usage {
            input_tokens: 3,
            output_tokens: 4,
        };
        usage += Usage {
            input_tokens: 1,
            output_tokens: 1,
        };
        assert_eq!(usage.total_tokens(), 9);
    }
}
