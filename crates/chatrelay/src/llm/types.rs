//! Common types for streaming chat completions.

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use super::error::LLMError;

/// A chat completion request (OpenAI-compatible format).
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A chunk of streamed text, tagged by the channel it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    /// Internal "thinking" output of reasoning models.
    Reasoning(String),
    /// The answer itself.
    Answer(String),
}

impl Fragment {
    pub fn text(&self) -> &str {
        match self {
            Fragment::Reasoning(text) | Fragment::Answer(text) => text,
        }
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(self, Fragment::Reasoning(_))
    }

    pub fn is_empty(&self) -> bool {
        self.text().is_empty()
    }
}

/// Events produced by a provider's streaming endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Fragment(Fragment),
    Done,
}

/// Boxed fragment stream returned by [`super::LLMProvider::chat_stream`].
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LLMError>> + Send>>;
