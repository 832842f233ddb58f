use crate::model::ProviderId;

/// Failure reported by a provider adapter while starting or reading a model
/// stream. Every variant is fatal to the run; nothing here is retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The vendor rejected the call (HTTP status, auth, quota).
    #[error("{provider} rejected the model call{}: {message}", status_suffix(.status_code))]
    Provider {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    /// The connection or the body stream broke.
    #[error("{provider} stream failed: {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    /// The vendor answered with something the adapter cannot use.
    #[error("{provider} sent an unusable response: {message}")]
    Protocol {
        provider: ProviderId,
        message: String,
    },
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code
        .map(|code| format!(" (status {code})"))
        .unwrap_or_default()
}

impl ProviderError {
    pub fn provider(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    pub fn transport(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// HTTP status of a rejected call, when the vendor sent one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Provider { status_code, .. } => *status_code,
            Self::Transport { .. } | Self::Protocol { .. } => None,
        }
    }
}

/// Fatal run failure carried by `StreamEvent::Error` and `RunOutcome::error`.
///
/// Cancellation is not a failure; it surfaces as `TerminalReason::Cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    #[error("provider failure ({provider}): {message}")]
    Provider { provider: String, message: String },
    #[error("transport failure ({provider}): {message}")]
    Transport { provider: String, message: String },
    /// A vendor chunk could not be parsed or violated the block protocol.
    #[error("protocol failure: {message}")]
    Protocol { message: String },
}

impl RunFailure {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

impl From<&ProviderError> for RunFailure {
    fn from(err: &ProviderError) -> Self {
        match err {
            ProviderError::Provider {
                provider, message, ..
            } => Self::Provider {
                provider: provider.to_string(),
                message: message.clone(),
            },
            ProviderError::Transport { provider, message } => Self::Transport {
                provider: provider.to_string(),
                message: message.clone(),
            },
            ProviderError::Protocol { provider, message } => Self::Protocol {
                message: format!("provider={provider}: {message}"),
            },
        }
    }
}

/// Error type of the public agent API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HarnessError {
    /// Provider client or environment configuration is unusable.
    #[error("config error: {0}")]
    Config(String),
    /// Rejected builder or prompt input.
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    RunFailed(#[from] RunFailure),
    /// The run ended before producing a result (cancelled or errored).
    #[error("run ended without a result: {0}")]
    Incomplete(String),
    /// Structured output could not be recovered from the model text.
    #[error(transparent)]
    NoObject(#[from] NoObjectGeneratedError),
    /// The run task went away without reporting an outcome.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Strict or post-repair JSON parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("json parse error at line {line}, column {column}: {message}")]
pub struct JsonParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl From<serde_json::Error> for JsonParseError {
    fn from(value: serde_json::Error) -> Self {
        Self {
            message: value.to_string(),
            line: value.line(),
            column: value.column(),
        }
    }
}

/// One violating location reported by the schema validator.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SchemaIssue {
    /// JSON pointer to the offending value (`/` for the root).
    pub path: String,
    pub message: String,
}

/// Schema compilation or validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaValidationError {
    /// The schema itself could not be compiled.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// The value violated the schema; issues are in validator order.
    #[error("schema validation failed: {}", join_issues(.0))]
    Violations(Vec<SchemaIssue>),
}

fn join_issues(issues: &[SchemaIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{}: {}", issue.path, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a structured object could not be produced.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NoObjectCause {
    #[error(transparent)]
    Parse(JsonParseError),
    #[error(transparent)]
    Validation(SchemaValidationError),
}

/// Typed failure of the structured output pipeline.
///
/// Carries the raw text that was examined and exactly one cause.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("no object generated: {cause}")]
pub struct NoObjectGeneratedError {
    pub text: String,
    pub cause: NoObjectCause,
}

impl NoObjectGeneratedError {
    /// Returns the parse error, when parsing failed.
    pub fn parse_error(&self) -> Option<&JsonParseError> {
        match &self.cause {
            NoObjectCause::Parse(err) => Some(err),
            NoObjectCause::Validation(_) => None,
        }
    }

    /// Returns the validation error, when parsing succeeded but validation did not.
    pub fn validation_error(&self) -> Option<&SchemaValidationError> {
        match &self.cause {
            NoObjectCause::Validation(err) => Some(err),
            NoObjectCause::Parse(_) => None,
        }
    }
}
