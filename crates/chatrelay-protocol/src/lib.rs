//! Push-channel protocol for chatrelay web clients.
//!
//! Every WebSocket text frame carries exactly one JSON object tagged by its
//! `type` field:
//!
//! - [`ClientEvent`]: messages from the browser to the relay
//! - [`ServerEvent`]: messages from the relay to one specific connection
//!
//! # Turn Flow
//!
//! ```text
//!  client                                relay
//!    │  {"type":"user_message", ...}       │
//!    │ ───────────────────────────────────▶│
//!    │   reasoning_start (optional)        │
//!    │◀─────────────────────────────────── │
//!    │   reasoning_content *               │
//!    │◀─────────────────────────────────── │
//!    │   assistant_start                   │
//!    │◀─────────────────────────────────── │
//!    │   assistant_content *               │
//!    │◀─────────────────────────────────── │
//!    │   system (only on failure/retry)    │
//!    │◀─────────────────────────────────── │
//! ```

use serde::{Deserialize, Serialize};

/// Literal marker sent with `reasoning_start`.
pub const REASONING_MARKER: &str = "(thinking)";

/// Events sent by the web client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// A chat turn.
    UserMessage { message: String },
    /// Switch provider by its 1-based position in the provider table.
    SwitchApi { api_num: u32 },
    /// Switch model within the active provider.
    SwitchModel { model: String },
    /// Drop the conversation, keeping the system prompt.
    ClearChat,
    /// Ask for the active provider's model list.
    GetModels,
}

/// Events pushed to a single connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// First answer fragment of a turn follows; `content` is the provider display name.
    AssistantStart { content: String },
    /// One answer fragment.
    AssistantContent { content: String },
    /// Reasoning fragments follow; `content` is [`REASONING_MARKER`].
    ReasoningStart { content: String },
    /// One reasoning fragment.
    ReasoningContent { content: String },
    /// Human-readable status or failure notice.
    System { content: String },
    /// Model list of the active provider.
    ApiModels {
        models: Vec<String>,
        default_model: String,
    },
    /// Acknowledges a successful `switch_model`.
    ModelSwitched { model: String },
}

impl ServerEvent {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }
}
