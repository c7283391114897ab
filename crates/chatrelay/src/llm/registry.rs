//! Provider registry: the static provider table and the backends usable at runtime.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::provider::{BackendFactory, LLMProvider};

/// Provider preferred at startup when its credential is present.
pub const DEFAULT_PROVIDER: &str = "qwen";

// ============================================================================
// Static configuration
// ============================================================================

/// A model offered by a provider, with the capabilities the relay cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    /// Streams a thinking channel and may stall silently before the first fragment.
    #[serde(default)]
    pub reasoning: bool,
    /// Accepts multi-turn context. When false every turn is sent single-turn.
    #[serde(default = "default_true")]
    pub supports_history: bool,
}

impl ModelSpec {
    pub fn chat(id: &str) -> Self {
        Self {
            id: id.to_string(),
            reasoning: false,
            supports_history: true,
        }
    }

    /// A reasoning-only model without conversational memory.
    pub fn reasoner(id: &str) -> Self {
        Self {
            id: id.to_string(),
            reasoning: true,
            supports_history: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One OpenAI-compatible backend as declared at process start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub base_url: String,
    /// Environment variable holding the credential.
    pub credential_env_var: String,
    pub models: Vec<ModelSpec>,
    pub default_model: String,
    pub display_name: String,
}

impl ProviderConfig {
    pub fn model(&self, id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.models.iter().map(|m| m.id.clone()).collect()
    }
}

/// The built-in provider table, in declaration order.
pub fn builtin_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            id: "deepseek".to_string(),
            base_url: "https://api.deepseek.com/v1".to_string(),
            credential_env_var: "DEEPSEEK_API_KEY".to_string(),
            models: vec![
                ModelSpec::chat("deepseek-chat"),
                ModelSpec::reasoner("deepseek-reasoner"),
            ],
            default_model: "deepseek-chat".to_string(),
            display_name: "DeepSeek".to_string(),
        },
        ProviderConfig {
            id: "qwen".to_string(),
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            credential_env_var: "DASHSCOPE_API_KEY".to_string(),
            models: vec![ModelSpec::chat("qwen-max-2025-01-25")],
            default_model: "qwen-max-2025-01-25".to_string(),
            display_name: "Qwen".to_string(),
        },
        ProviderConfig {
            id: "yunwu_1".to_string(),
            base_url: "https://yunwu.ai/v1".to_string(),
            credential_env_var: "YUNWU_API_KEY_1".to_string(),
            models: vec![
                ModelSpec::chat("gpt-4o"),
                ModelSpec::chat("o3-mini-high-all"),
                ModelSpec::chat("claude-3-5-sonnet-20241022"),
            ],
            default_model: "gpt-4o".to_string(),
            display_name: "Yunwu (reverse)".to_string(),
        },
        ProviderConfig {
            id: "yunwu_2".to_string(),
            base_url: "https://yunwu.ai/v1".to_string(),
            credential_env_var: "YUNWU_API_KEY_2".to_string(),
            models: vec![
                ModelSpec::chat("claude-3-opus-20240229"),
                ModelSpec::chat("gemini-2.0-pro-exp-02-05"),
                ModelSpec::chat("gemini-2.0-flash-thinking-exp-01-21"),
                ModelSpec::chat("claude-3-5-sonnet-20241022"),
            ],
            default_model: "claude-3-opus-20240229".to_string(),
            display_name: "Yunwu (relay)".to_string(),
        },
    ]
}

/// A provider table that breaks one of its invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProviderTableError {
    #[error("duplicate provider id '{0}'")]
    DuplicateId(String),

    #[error("provider '{0}' lists no models")]
    NoModels(String),

    #[error("provider '{provider}' default model '{model}' is not in its model list")]
    UnknownDefaultModel { provider: String, model: String },
}

/// Check the table invariants: unique ids, non-empty model lists, default listed.
pub fn validate_providers(providers: &[ProviderConfig]) -> Result<(), ProviderTableError> {
    let mut seen = HashSet::new();
    for provider in providers {
        if !seen.insert(provider.id.as_str()) {
            return Err(ProviderTableError::DuplicateId(provider.id.clone()));
        }
        if provider.models.is_empty() {
            return Err(ProviderTableError::NoModels(provider.id.clone()));
        }
        if provider.model(&provider.default_model).is_none() {
            return Err(ProviderTableError::UnknownDefaultModel {
                provider: provider.id.clone(),
                model: provider.default_model.clone(),
            });
        }
    }
    Ok(())
}

// ============================================================================
// Runtime registry
// ============================================================================

/// A provider whose credential was present at startup.
#[derive(Debug, Clone)]
pub struct AvailableProvider {
    pub config: ProviderConfig,
    pub credential: String,
}

/// Errors raised while resolving providers.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No credential was found for any provider.
    #[error("no usable provider; set at least one of: {}", .env_vars.join(", "))]
    NoProviders { env_vars: Vec<String> },
}

/// Registry of usable providers; also the factory for their backends.
pub struct ProviderRegistry {
    /// Every configured provider id, in declaration order.
    declared: Vec<String>,
    available: Vec<AvailableProvider>,
    default_id: String,
    factory: Arc<dyn BackendFactory>,
}

impl ProviderRegistry {
    /// Resolve providers using process environment variables.
    pub fn from_env(
        configs: Vec<ProviderConfig>,
        preferred_default: &str,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<Self, RegistryError> {
        Self::resolve(
            configs,
            preferred_default,
            |var| std::env::var(var).ok(),
            factory,
        )
    }

    /// Resolve providers whose credential `lookup` yields a non-empty value.
    ///
    /// The initial provider is `preferred_default` when available, otherwise
    /// the first available provider in declaration order.
    pub fn resolve(
        configs: Vec<ProviderConfig>,
        preferred_default: &str,
        lookup: impl Fn(&str) -> Option<String>,
        factory: Arc<dyn BackendFactory>,
    ) -> Result<Self, RegistryError> {
        let declared = configs.iter().map(|c| c.id.clone()).collect();
        let mut env_vars = Vec::new();
        let mut available = Vec::new();

        for config in configs {
            match lookup(&config.credential_env_var).filter(|v| !v.trim().is_empty()) {
                Some(credential) => {
                    info!(provider = %config.id, "Registered {} provider", config.display_name);
                    available.push(AvailableProvider { config, credential });
                }
                None => env_vars.push(config.credential_env_var.clone()),
            }
        }

        let Some(first) = available.first() else {
            return Err(RegistryError::NoProviders { env_vars });
        };

        let default_id = if available.iter().any(|p| p.config.id == preferred_default) {
            preferred_default.to_string()
        } else {
            warn!(
                preferred = %preferred_default,
                fallback = %first.config.id,
                "Default provider unavailable, falling back"
            );
            first.config.id.clone()
        };

        Ok(Self {
            declared,
            available,
            default_id,
            factory,
        })
    }

    /// Get an available provider by id.
    pub fn get(&self, id: &str) -> Option<&AvailableProvider> {
        self.available.iter().find(|p| p.config.id == id)
    }

    /// Get an available provider by its 1-based position in the provider table.
    pub fn by_index(&self, index: u32) -> Option<&AvailableProvider> {
        let position = usize::try_from(index).ok()?.checked_sub(1)?;
        self.declared.get(position).and_then(|id| self.get(id))
    }

    /// The provider new sessions start on.
    pub fn default_provider(&self) -> &AvailableProvider {
        self.get(&self.default_id).unwrap_or(&self.available[0])
    }

    /// Available providers in declaration order.
    pub fn available(&self) -> impl Iterator<Item = &AvailableProvider> {
        self.available.iter()
    }

    /// Every declared provider with its 1-based index and availability.
    pub fn table(&self) -> impl Iterator<Item = (u32, &str, bool)> {
        self.declared
            .iter()
            .zip(1u32..)
            .map(|(id, index)| (index, id.as_str(), self.get(id).is_some()))
    }

    /// Create a backend handle for an available provider.
    pub fn backend(&self, id: &str) -> Option<Arc<dyn LLMProvider>> {
        self.get(id).map(|p| self.create_backend(p))
    }

    pub fn create_backend(&self, provider: &AvailableProvider) -> Arc<dyn LLMProvider> {
        self.factory.create(provider)
    }
}
