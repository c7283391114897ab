//! Session state, registry, and device classification.

mod device;
mod registry;
mod state;

use thiserror::Error;

pub use device::{DeviceInfo, DeviceKind};
pub use registry::{SessionHandle, SessionRegistry, SessionSettings, spawn_reaper};
pub use state::Session;

/// A provider or model selection that does not exist; state is left unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("provider '{0}' is not configured or unavailable")]
    UnknownProvider(String),

    #[error("model '{0}' is not offered by the active provider")]
    UnknownModel(String),

    #[error("no entry at position {0}")]
    UnknownIndex(u32),
}
