//! Provider-agnostic LLM adapter layer (§4.A).
//!
//! [`LlmProvider`] is the seam every conversation-manager call goes through;
//! concrete adapters translate [`Message`]/[`ToolDescriptor`] into a vendor's
//! wire format and normalize the reply back into [`Response`]/[`StreamChunk`].
//! `create_provider` is the single construction point, mirroring the
//! original's `llm/factory.py` dispatch-on-config-enum shape, except every
//! variant below actually builds a client instead of raising
//! `UnsupportedProviderError`.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::config::{LlmConfig, LlmProviderKind};
use crate::error::Result;
use crate::types::{Message, Response, StreamChunk, ToolDescriptor};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// A chat-completion backend. Implementors own their own HTTP client and
/// vendor-specific request/response shapes; callers never see either.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short identifier used in logs and in [`crate::error::Error::Provider`].
    fn name(&self) -> &str;

    /// The model identifier this provider was configured with.
    fn model(&self) -> &str;

    /// Run one non-streamed completion over `messages`, offering `tools` to
    /// the model. `system` is the system prompt, kept separate from
    /// `messages` since several vendors (Anthropic) take it out-of-band.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<Response>;

    /// Streamed variant of [`LlmProvider::complete`]. The returned stream
    /// yields zero or more delta chunks followed by exactly one
    /// [`StreamChunk::Final`] carrying the assembled [`Response`].
    async fn stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ChunkStream>;
}

/// Build the provider configured by `config.provider`. Every variant named
/// in [`LlmProviderKind`] is implemented here; the original project's
/// per-provider "Coming in Phase 6" stubs have no counterpart in this crate.
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn LlmProvider>> {
    match config.provider {
        LlmProviderKind::Anthropic => Ok(Box::new(anthropic::AnthropicProvider::new(config)?)),
        LlmProviderKind::OpenAi | LlmProviderKind::Azure | LlmProviderKind::Ollama | LlmProviderKind::VLlm => {
            Ok(Box::new(openai::OpenAiProvider::new(config)?))
        }
        LlmProviderKind::Gemini => Ok(Box::new(gemini::GeminiProvider::new(config)?)),
    }
}
