//! Control plane: a local administrative socket beside the host protocol.
//!
//! Accepts one newline-terminated JSON command per connection (`reload`,
//! `list`, `ping`), answers with one JSON line, then closes.

pub mod client;
pub mod commands;
pub mod server;

pub use client::send_command;
pub use commands::{ControlCommand, ControlResponse, ToolSummary, ToolsField};
pub use server::ControlPlane;
