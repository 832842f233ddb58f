use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{HarnessError, ProviderError};
use crate::model::ProviderId;
use crate::normalize::{ChunkNormalizer, OpenAiChatNormalizer};
use crate::provider::{ProviderAdapter, ProviderRequest, ProviderResponseMeta, ProviderStreamHandle};

use super::config::OpenAiClientConfig;
use super::options::OpenAiRequestOptions;
use super::transport::{ByteStream, build_request_body, chunk_stream};

const OPENAI_PROVIDER: &str = "openai";

/// Provider adapter for OpenAI-compatible Chat Completions (streaming).
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: OpenAiClientConfig,
}

impl OpenAiProvider {
    /// Creates a provider from explicit client configuration.
    pub fn new(config: OpenAiClientConfig) -> Result<Self, HarnessError> {
        if config.api_key.trim().is_empty() {
            return Err(HarnessError::Config(
                "OpenAI client config api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("failed to build OpenAI client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a provider using `OPENAI_API_KEY` and `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::new(OpenAiClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(OPENAI_PROVIDER)
    }

    async fn start_stream(
        &self,
        request: ProviderRequest,
        cancellation: CancellationToken,
    ) -> Result<ProviderStreamHandle, ProviderError> {
        let provider_id = self.id();
        let options = read_openai_options(&request, &provider_id)?;
        let body = build_request_body(&request, &options);
        debug!(
            run_id = %request.run_id,
            step = request.step,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "starting OpenAI chat completions stream"
        );

        let send = self
            .client
            .post(self.config.chat_completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send();
        let response = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                return Err(ProviderError::transport(provider_id, "request cancelled"));
            }
            response = send => response.map_err(|e| {
                ProviderError::transport(provider_id.clone(), format!("OpenAI request failed: {e}"))
            })?,
        };

        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .map(ToOwned::to_owned);
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ProviderError::provider(
                provider_id,
                format!("OpenAI chat completions request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(ProviderStreamHandle {
            stream: Box::pin(chunk_stream(provider_id, bytes_stream)),
            metadata: ProviderResponseMeta {
                request_id,
                status_code: Some(status.as_u16()),
            },
        })
    }

    fn normalizer(&self) -> Box<dyn ChunkNormalizer> {
        Box::new(OpenAiChatNormalizer::new(OPENAI_PROVIDER))
    }
}

fn read_openai_options(
    request: &ProviderRequest,
    provider_id: &ProviderId,
) -> Result<OpenAiRequestOptions, ProviderError> {
    match &request.vendor_options {
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            ProviderError::protocol(provider_id.clone(), format!("invalid OpenAI options: {e}"))
        }),
        None => Ok(OpenAiRequestOptions::default()),
    }
}
