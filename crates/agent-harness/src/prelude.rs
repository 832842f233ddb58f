//! Common imports for typical agent usage.
pub use crate::{
    AbortHandle, Agent, AgentBuilder, Conversation, EventKind, EventObservers, FnTool,
    HarnessError, Message, RunOptions, RunOutcome, RunStream, StreamEvent, TerminalReason, Tool,
    ToolContext, ToolDefinition, ToolError, ToolResult,
};
