//! Agent harness: a streaming agent loop over vendor-neutral events.
//!
//! The crate turns vendor chunk formats into one canonical event stream,
//! recovers and validates JSON from incomplete model output, and drives a
//! bounded, cancellable loop of model calls and concurrent tool invocations.
//! Vendor-specific APIs are namespaced under `vendors::*`.
//!
//! # Writing a provider adapter
//!
//! A [`ProviderAdapter`] only has to produce raw SSE frames ([`RawChunk`]); the
//! loop turns them into [`StreamEvent`]s with the [`ChunkNormalizer`] the
//! adapter returns. Two normalizers ship with the crate:
//!
//! - [`normalize::OpenAiChatNormalizer`] for Chat Completions chunks, used by
//!   [`vendors::openai::OpenAiProvider`] and any OpenAI-compatible endpoint.
//! - [`normalize::AnthropicNormalizer`] for Messages API events
//!   (`content_block_start`/`delta`/`stop`, `thinking`, `tool_use`). Adapters
//!   for Anthropic-style endpoints return it from `normalizer()` and frame the
//!   body with [`sse::SseDecoder`].
//!
//! # Builder-first usage (OpenAI)
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use agent_harness::prelude::*;
//! use agent_harness::vendors::openai::{
//!     OpenAiAgentBuilderExt, OpenAiProvider, OpenAiRequestOptions,
//! };
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), HarnessError> {
//! let add = FnTool::new(
//!     ToolDefinition::new(
//!         "add",
//!         "Adds two integers",
//!         json!({"type":"object","properties":{"a":{"type":"integer"},"b":{"type":"integer"}}}),
//!     ),
//!     |input, _ctx| async move {
//!         Ok(json!(input["a"].as_i64().unwrap_or(0) + input["b"].as_i64().unwrap_or(0)))
//!     },
//! );
//!
//! let agent = Agent::builder(Arc::new(OpenAiProvider::from_env()?), "gpt-4o-mini")
//!     .system_prompt("Answer briefly.")
//!     .tool(Arc::new(add))
//!     .max_steps(4)
//!     .openai_options(OpenAiRequestOptions::default().temperature(0.0))?
//!     .build()?;
//!
//! let outcome = agent.run("What is 2 + 40?").await?;
//! println!("{:?}: {}", outcome.reason, outcome.text());
//! # Ok(())
//! # }
//! ```

/// Agent configuration and the public run entry points.
pub mod agent;
/// Conversation and message content types.
pub mod content;
/// Concurrent tool-call resolution.
pub mod dispatch;
/// Public error types.
pub mod errors;
/// JSON recovery, schema validation and structured output.
pub mod json;
/// Provider identifiers and generic run options.
pub mod model;
/// Vendor chunk normalizers.
pub mod normalize;
/// Opt-in `tracing` subscriber setup.
pub mod observability;
/// Per-event-kind callbacks.
pub mod observer;
/// Common imports for typical usage.
pub mod prelude;
/// Provider adapter contracts used by vendor integrations.
pub mod provider;
/// The agent loop, run outcome and streaming handle.
pub mod run;
/// Server-sent-events framing.
pub mod sse;
/// Canonical stream events.
pub mod stream;
/// Tool contracts and registration.
pub mod tool;
/// Vendor-specific integrations.
pub mod vendors;

#[cfg(test)]
pub(crate) mod test_support;

pub use agent::{Agent, AgentBuilder};
pub use content::{ContentPart, Conversation, Message, Role, ToolCall};
pub use dispatch::ToolDispatcher;
pub use errors::{
    HarnessError, NoObjectGeneratedError, ProviderError, RunFailure, SchemaValidationError,
};
pub use json::{ParseState, Recovered, parse_and_validate, recover};
pub use model::{ProviderId, RunOptions};
pub use normalize::{ChunkNormalizer, ResponseMeta};
pub use observer::EventObservers;
pub use provider::{ProviderAdapter, ProviderRequest, ProviderResponseMeta, ProviderStreamHandle};
pub use run::{AbortHandle, AgentStep, RunOutcome, RunStream, StepOutcome, TerminalReason};
pub use sse::RawChunk;
pub use stream::{EventKind, StreamEvent, Usage};
pub use tool::{FnTool, Tool, ToolContext, ToolDefinition, ToolError, ToolResult, ToolSet};
