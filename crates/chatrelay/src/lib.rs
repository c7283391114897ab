//! chatrelay - A multi-backend chat relay for terminals and web clients.

pub mod config;
pub mod handlers;
pub mod interaction;
pub mod llm;
pub mod response;
pub mod server;
pub mod session;
pub mod stream;
pub mod terminal;

#[cfg(test)]
mod testing;
