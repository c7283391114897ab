//! Per-connection conversation state.

use std::sync::Arc;

use tokio::time::Instant;

use super::device::DeviceInfo;
use super::SelectionError;
use crate::llm::{
    AvailableProvider, LLMProvider, Message, ModelSpec, ProviderConfig, ProviderRegistry,
};
use crate::stream::TurnRequest;

/// One conversation: active provider and model plus the message history.
///
/// History always starts with the system message, which only a full reset
/// can leave behind on its own.
pub struct Session {
    connection_id: String,
    provider: ProviderConfig,
    model_id: String,
    backend: Arc<dyn LLMProvider>,
    history: Vec<Message>,
    origin_address: String,
    device: DeviceInfo,
    last_active: Instant,
}

impl Session {
    /// Create a session on the registry's default provider and model.
    pub fn new(
        registry: &ProviderRegistry,
        system_prompt: &str,
        connection_id: impl Into<String>,
        origin_address: impl Into<String>,
        device: DeviceInfo,
    ) -> Self {
        let provider = registry.default_provider();
        Self {
            connection_id: connection_id.into(),
            provider: provider.config.clone(),
            model_id: provider.config.default_model.clone(),
            backend: registry.create_backend(provider),
            history: vec![Message::system(system_prompt)],
            origin_address: origin_address.into(),
            device,
            last_active: Instant::now(),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub(crate) fn set_connection_id(&mut self, connection_id: String) {
        self.connection_id = connection_id;
    }

    pub fn provider_id(&self) -> &str {
        &self.provider.id
    }

    pub fn display_name(&self) -> &str {
        &self.provider.display_name
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Model ids offered by the active provider.
    pub fn models(&self) -> Vec<String> {
        self.provider.model_ids()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn origin_address(&self) -> &str {
        &self.origin_address
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Switch to another available provider, resetting to its default model.
    ///
    /// History is kept.
    pub fn switch_provider(
        &mut self,
        registry: &ProviderRegistry,
        provider_id: &str,
    ) -> Result<(), SelectionError> {
        let provider = registry
            .get(provider_id)
            .ok_or_else(|| SelectionError::UnknownProvider(provider_id.to_string()))?;
        self.apply_provider(registry, provider);
        Ok(())
    }

    /// Switch provider by 1-based position in the provider table.
    pub fn switch_provider_index(
        &mut self,
        registry: &ProviderRegistry,
        index: u32,
    ) -> Result<(), SelectionError> {
        let provider = registry
            .by_index(index)
            .ok_or(SelectionError::UnknownIndex(index))?;
        self.apply_provider(registry, provider);
        Ok(())
    }

    /// Provider, model and backend always change together.
    fn apply_provider(&mut self, registry: &ProviderRegistry, provider: &AvailableProvider) {
        self.backend = registry.create_backend(provider);
        self.model_id = provider.config.default_model.clone();
        self.provider = provider.config.clone();
        self.touch();
    }

    /// Switch model within the active provider.
    pub fn switch_model(&mut self, model_id: &str) -> Result<(), SelectionError> {
        if self.provider.model(model_id).is_none() {
            return Err(SelectionError::UnknownModel(model_id.to_string()));
        }
        self.model_id = model_id.to_string();
        self.touch();
        Ok(())
    }

    /// Switch model by 1-based position in the active provider's model list.
    pub fn select_model_index(&mut self, index: u32) -> Result<(), SelectionError> {
        let model_id = usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.provider.models.get(i))
            .map(|m| m.id.clone())
            .ok_or(SelectionError::UnknownIndex(index))?;
        self.switch_model(&model_id)
    }

    /// Drop the conversation, keeping the system message.
    pub fn clear_history(&mut self) {
        self.history.truncate(1);
        self.touch();
    }

    fn active_model(&self) -> ModelSpec {
        self.provider
            .model(&self.model_id)
            .cloned()
            .unwrap_or_else(|| ModelSpec::chat(&self.model_id))
    }

    /// Record a user message and snapshot what the engine needs for the turn.
    ///
    /// Models without history support always see a single-turn context.
    pub fn begin_turn(&mut self, text: &str) -> TurnRequest {
        let model = self.active_model();
        if !model.supports_history {
            self.history.truncate(1);
        }
        self.history.push(Message::user(text));
        self.touch();

        TurnRequest {
            backend: self.backend.clone(),
            provider_id: self.provider.id.clone(),
            display_name: self.provider.display_name.clone(),
            model,
            messages: self.history.clone(),
        }
    }

    /// Record the assistant answer. Empty answers (failed turns) are dropped.
    pub fn append_assistant(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.history.push(Message::assistant(text));
        self.touch();
    }
}
