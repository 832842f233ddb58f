use std::fmt;
use std::time::Duration;

use crate::errors::HarnessError;

/// Stable identifier for a provider implementation (for example `openai`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ProviderId(pub String);

impl ProviderId {
    /// Creates a provider id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the provider id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ProviderId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Step cap applied when the caller does not set one.
pub const DEFAULT_MAX_STEPS: usize = 8;

/// Generic run behavior options.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RunOptions {
    /// Maximum number of model calls in one run.
    pub max_steps: usize,
    /// Optional whole-run deadline. Expiry cancels the run.
    pub timeout: Option<Duration>,
    /// Bounded event buffer size used by the streaming channel.
    pub stream_buffer_capacity: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            timeout: None,
            stream_buffer_capacity: 128,
        }
    }
}

impl RunOptions {
    /// Builds options from the defaults overlaid with environment variables.
    ///
    /// - `AGENT_HARNESS_MAX_STEPS`: step cap.
    /// - `AGENT_HARNESS_TIMEOUT_SECS`: whole-run timeout in seconds.
    /// - `AGENT_HARNESS_STREAM_BUFFER`: streaming channel capacity.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, HarnessError> {
        let mut options = Self::default();
        if let Some(raw) = lookup("AGENT_HARNESS_MAX_STEPS") {
            options.max_steps = parse_env_number("AGENT_HARNESS_MAX_STEPS", &raw)?;
        }
        if let Some(raw) = lookup("AGENT_HARNESS_TIMEOUT_SECS") {
            let secs: u64 = parse_env_number("AGENT_HARNESS_TIMEOUT_SECS", &raw)?;
            options.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(raw) = lookup("AGENT_HARNESS_STREAM_BUFFER") {
            options.stream_buffer_capacity =
                parse_env_number("AGENT_HARNESS_STREAM_BUFFER", &raw)?;
        }
        Ok(options)
    }
}

fn parse_env_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, HarnessError> {
    raw.trim()
        .parse()
        .map_err(|_| HarnessError::Config(format!("{key} must be a non-negative integer, got {raw:?}")))
}
