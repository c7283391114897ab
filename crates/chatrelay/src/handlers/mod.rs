//! HTTP and WebSocket request handlers.

mod health;
mod labels;
pub(crate) mod ws;

pub use health::{livez, readyz};
pub use labels::{list_labels, remove_label, set_label};
pub use ws::ws_upgrade;
