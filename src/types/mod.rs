//! Core types for the gate dispatcher.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (TransactionId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for backend, gates, and transport

mod config;
mod errors;
mod ids;

pub use config::{
    BackendConfig, CallerAttestation, Config, GateConfig, ObservabilityConfig, TransportConfig,
};
pub use errors::{Error, Result, TransportFault};
pub use ids::TransactionId;
