//! Push-channel surface: forwards a turn to one WebSocket connection.

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use chatrelay_protocol::{REASONING_MARKER, ServerEvent};

use super::printer::{Notice, Surface};

/// Pushes typed events into the egress queue of a single connection.
pub struct ChannelSurface {
    connection_id: String,
    tx: UnboundedSender<ServerEvent>,
}

impl ChannelSurface {
    pub fn new(connection_id: impl Into<String>, tx: UnboundedSender<ServerEvent>) -> Self {
        Self {
            connection_id: connection_id.into(),
            tx,
        }
    }

    fn push(&self, event: ServerEvent) {
        if self.tx.send(event).is_err() {
            debug!(connection_id = %self.connection_id, "Connection gone, dropping event");
        }
    }
}

impl Surface for ChannelSurface {
    fn assistant_start(&mut self, display_name: &str) {
        self.push(ServerEvent::AssistantStart {
            content: display_name.to_string(),
        });
    }

    fn answer(&mut self, text: &str) {
        self.push(ServerEvent::AssistantContent {
            content: text.to_string(),
        });
    }

    fn reasoning_start(&mut self) {
        self.push(ServerEvent::ReasoningStart {
            content: REASONING_MARKER.to_string(),
        });
    }

    fn reasoning(&mut self, text: &str) {
        self.push(ServerEvent::ReasoningContent {
            content: text.to_string(),
        });
    }

    fn notice(&mut self, notice: &Notice) {
        self.push(ServerEvent::system(notice.message.clone()));
    }

    fn end_turn(&mut self) {}
}
