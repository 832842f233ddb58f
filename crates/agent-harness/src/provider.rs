use std::pin::Pin;

use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::content::Message;
use crate::errors::ProviderError;
use crate::model::ProviderId;
use crate::normalize::ChunkNormalizer;
use crate::sse::RawChunk;
use crate::tool::ToolDefinition;

/// Provider-facing request for one model call (one agent step).
#[derive(Clone, Debug)]
pub struct ProviderRequest {
    pub run_id: uuid::Uuid,
    /// Zero-based step index within the run.
    pub step: usize,
    /// Provider-specific model name.
    pub model: String,
    pub system_prompt: Option<String>,
    /// Full conversation so far, oldest first.
    pub messages: Vec<Message>,
    /// Tools the model may call, in registration order.
    pub tools: Vec<ToolDefinition>,
    /// Opaque vendor options (for example `OpenAiRequestOptions` as JSON).
    pub vendor_options: Option<serde_json::Value>,
}

/// Streaming handle returned by a provider adapter.
///
/// The stream is lazy: chunks are only read when polled.
pub struct ProviderStreamHandle {
    pub stream: Pin<Box<dyn Stream<Item = Result<RawChunk, ProviderError>> + Send>>,
    pub metadata: ProviderResponseMeta,
}

/// Response metadata known before the first chunk.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderResponseMeta {
    pub request_id: Option<String>,
    pub status_code: Option<u16>,
}

/// Adapter contract implemented by vendor integrations.
///
/// An adapter owns the transport (HTTP, auth, request shapes) and names the
/// [`ChunkNormalizer`] that understands its wire chunks. It holds no per-run
/// state, so one instance may serve concurrent runs.
#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Returns the stable provider identifier.
    fn id(&self) -> ProviderId;

    /// Starts one model call.
    ///
    /// Implementations should abort the underlying request when `cancellation`
    /// fires; the run loop also stops polling the stream at that point.
    async fn start_stream(
        &self,
        request: ProviderRequest,
        cancellation: CancellationToken,
    ) -> Result<ProviderStreamHandle, ProviderError>;

    /// Fresh normalizer for one response.
    fn normalizer(&self) -> Box<dyn ChunkNormalizer>;
}
