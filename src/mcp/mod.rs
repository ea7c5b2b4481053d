//! Stdio MCP surface.
//!
//! Newline-delimited JSON-RPC 2.0 on stdin/stdout. Each `tools/call` runs on
//! its own task; responses are serialized by a single writer task.

pub mod codec;
pub mod server;

pub use server::{McpServer, PROTOCOL_VERSION};
