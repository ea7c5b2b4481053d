//! # Redix Gate - Gate-Enforced Conversion Dispatch
//!
//! Tool dispatch core for the Redix AnyToAny healthcare conversion engine:
//! - Static catalog of 12 conversion, validation, and discovery tools
//! - Gate 1 input validation before X12-consuming conversions
//! - Gate 5 output validation before generated X12 is returned
//! - Normalization of engine responses into one typed result
//! - Stdio MCP transport with per-call cancellation
//!
//! ## Architecture
//!
//! ```text
//!                    ┌─────────────────────────────────┐
//!   tools/call   →   │           Dispatcher            │
//!                    │  ┌─────────┐ ┌─────────┐        │
//!                    │  │ Registry│ │  Gates  │        │
//!                    │  │ (static)│ │ (1 / 5) │        │
//!                    │  └─────────┘ └─────────┘        │
//!                    │  ┌─────────┐ ┌─────────┐        │
//!                    │  │Normalize│ │ Backend │ → HTTP │
//!                    │  └─────────┘ └─────────┘        │
//!                    └─────────────────────────────────┘
//! ```
//!
//! Every call resolves to exactly one [`ResultEnvelope`]; nothing escapes as a
//! panic or a bare transport error.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod backend;
pub mod dispatch;
pub mod envelope;
pub mod gates;
pub mod mcp;
pub mod normalize;
pub mod tools;
pub mod types;

// Internal utilities
pub mod observability;

pub use dispatch::Dispatcher;
pub use envelope::{ResultEnvelope, ToolResult};
pub use types::{Config, Error, Result};
