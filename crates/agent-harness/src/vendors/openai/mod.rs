//! OpenAI-compatible Chat Completions integration and request options.
//!
//! Vendor-specific configuration lives here so the agent API can remain
//! provider-agnostic.
mod adapter;
mod config;
mod options;
pub(crate) mod transport;

pub use adapter::OpenAiProvider;
pub use config::OpenAiClientConfig;
pub use options::{OpenAiReasoningEffort, OpenAiRequestOptions};

use crate::agent::AgentBuilder;
use crate::errors::HarnessError;

/// Extension trait for attaching OpenAI-specific options to an `AgentBuilder`.
pub trait OpenAiAgentBuilderExt: Sized {
    /// Forwards `options` with every model call of the agent.
    ///
    /// They are read only by `OpenAiProvider`.
    fn openai_options(self, options: OpenAiRequestOptions) -> Result<Self, HarnessError>;
}

impl OpenAiAgentBuilderExt for AgentBuilder {
    fn openai_options(self, options: OpenAiRequestOptions) -> Result<Self, HarnessError> {
        let value = serde_json::to_value(options)
            .map_err(|e| HarnessError::Config(format!("invalid OpenAI options: {e}")))?;
        Ok(self.vendor_options(value))
    }
}
