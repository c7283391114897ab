//! LLM provider clients for streaming chat completions.

mod error;
mod openai;
mod provider;
mod registry;
mod types;

pub use error::{FailureKind, LLMError};
pub use openai::{OpenAIBackendFactory, OpenAICompatibleProvider};
pub use provider::{BackendFactory, LLMProvider};
pub use registry::{
    AvailableProvider, DEFAULT_PROVIDER, ModelSpec, ProviderConfig, ProviderRegistry,
    ProviderTableError, RegistryError, builtin_providers, validate_providers,
};
pub use types::{ChatRequest, ChatStream, Fragment, Message, Role, StreamEvent};
