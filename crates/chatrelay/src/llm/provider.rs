//! LLM provider capability traits.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::LLMError;
use super::registry::AvailableProvider;
use super::types::{ChatRequest, ChatStream};

/// A backend able to serve streaming chat completions.
///
/// Implemented once per provider family. The stream engine only talks to
/// this trait, so it carries no HTTP dependency of its own.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Open a streaming chat completion.
    ///
    /// Resolves once the provider accepted the request; fragments then
    /// arrive on the returned stream.
    async fn chat_stream(&self, request: ChatRequest) -> Result<ChatStream, LLMError>;
}

/// Creates backend handles for available providers.
pub trait BackendFactory: Send + Sync {
    fn create(&self, provider: &AvailableProvider) -> Arc<dyn LLMProvider>;
}
