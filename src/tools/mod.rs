//! Tool surface: parameter catalog and the fixed registry of conversion tools.

pub mod catalog;
pub mod registry;

pub use catalog::{fill_defaults, input_schema, validate_params, ParamDef, ParamType};
pub use registry::{
    Endpoint, GateId, GateRequirement, HttpMethod, InputKind, OutputKind,
    ToolDefinition, ToolName, ToolRegistry, CAPABILITY_SOURCES, VALIDATE_ENDPOINT,
};
