//! Caller bookkeeping: address labels and interaction logs.

mod labels;
mod logger;

pub use labels::{FileLabelStore, LABELS_FILE, LabelError, LabelStore};
pub use logger::{
    FileInteractionLogger, Interaction, InteractionLogger, LogFileWriter, NoopInteractionLogger,
    format_entry, table_header,
};
