//! Streaming turn execution and output delivery.

mod channel;
mod console;
mod engine;
mod printer;

pub use channel::ChannelSurface;
pub use console::ConsoleSurface;
pub use engine::{ChatStreamEngine, StreamError, StreamResult, StreamSettings, TurnRequest};
pub use printer::{Notice, NoticeLevel, OutputSink, StreamPrinter, Surface};
