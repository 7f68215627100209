use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use crate::errors::PilotResult;
use crate::llm::types::{CallConfig, ChatMessage, StreamChunk, ToolDef};

/// Unified completion-provider trait. Implementations turn a conversation
/// into an ordered stream of text / tool-call deltas.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider identifier for logging.
    fn name(&self) -> &str;

    /// Starts one streaming chat completion. Transport failures (connect,
    /// non-success status) surface here; per-chunk failures surface through
    /// the returned stream.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDef],
        cfg: &CallConfig,
    ) -> PilotResult<CompletionStream>;
}

/// Ordered stream of parsed completion chunks, ending with a Done chunk.
pub struct CompletionStream {
    inner: Pin<Box<dyn Stream<Item = PilotResult<StreamChunk>> + Send>>,
}

impl CompletionStream {
    pub fn new(stream: impl Stream<Item = PilotResult<StreamChunk>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }

    pub async fn next_chunk(&mut self) -> Option<PilotResult<StreamChunk>> {
        self.inner.next().await
    }
}
