use std::time::Duration;

use crate::errors::HarnessError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Configuration for the OpenAI-compatible client.
#[derive(Clone, Debug)]
pub struct OpenAiClientConfig {
    /// API key used for bearer auth.
    pub api_key: String,
    /// Base URL of the OpenAI-compatible endpoint, without the `/v1` suffix.
    ///
    /// Useful for proxies, gateways or local servers.
    pub base_url: String,
    /// Default HTTP timeout for requests.
    pub timeout: Duration,
}

impl OpenAiClientConfig {
    /// Creates a config with default base URL and timeout.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Builds a config from `OPENAI_API_KEY` and the optional `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, HarnessError> {
        let api_key = lookup("OPENAI_API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(HarnessError::Config(
                "missing OPENAI_API_KEY for OpenAI provider".into(),
            ));
        }
        let mut config = Self::new(api_key.trim());
        if let Some(base_url) = lookup("OPENAI_BASE_URL").filter(|url| !url.trim().is_empty()) {
            config = config.base_url(base_url.trim());
        }
        Ok(config)
    }

    /// Overrides the API base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the default HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn chat_completions_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{base}/v1/chat/completions")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_lookup_requires_a_key() {
        let err = OpenAiClientConfig::from_lookup(|_| None).expect_err("missing key");
        assert!(matches!(err, HarnessError::Config(msg) if msg.contains("OPENAI_API_KEY")));
    }

    #[test]
    fn base_url_override_is_normalized() {
        let config = OpenAiClientConfig::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-test".into()),
            "OPENAI_BASE_URL" => Some("http://localhost:8080/v1/".into()),
            _ => None,
        })
        .expect("config");
        assert_eq!(
            config.chat_completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(
            OpenAiClientConfig::new("k").chat_completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
