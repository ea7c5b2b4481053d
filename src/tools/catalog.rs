//! Tool parameter metadata: typed definitions, argument checks, JSON schemas.
//!
//! Every registered tool describes its arguments with [`ParamDef`]s. The same
//! definitions drive three things: rejecting malformed calls before any
//! network traffic, filling defaults, and the `inputSchema` advertised to the
//! agent.

use serde::Serialize;
use serde_json::{json, Map, Value};

// =============================================================================
// Parameter types
// =============================================================================

/// Accepted JSON shape of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Bool,
    /// String from a fixed set, compared case-insensitively.
    Enum(&'static [&'static str]),
    /// JSON document passed either inline or as serialized text.
    Document,
}

impl ParamType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Int => value.is_i64() || value.is_u64(),
            ParamType::Bool => value.is_boolean(),
            ParamType::Enum(_) => value.is_string(),
            ParamType::Document => value.is_string() || value.is_object(),
        }
    }

    fn expected(self) -> &'static str {
        match self {
            ParamType::String | ParamType::Enum(_) => "string",
            ParamType::Int => "integer",
            ParamType::Bool => "boolean",
            ParamType::Document => "JSON object or string",
        }
    }

    /// Check a JSON value against this type.
    pub fn validate(self, value: &Value) -> Result<(), String> {
        if !self.accepts(value) {
            return Err(format!("expected {}, got {}", self.expected(), json_kind(value)));
        }
        if let (ParamType::Enum(allowed), Some(s)) = (self, value.as_str()) {
            if !allowed.iter().any(|a| a.eq_ignore_ascii_case(s)) {
                return Err(format!("'{}' is not one of: {}", s, allowed.join(", ")));
            }
        }
        Ok(())
    }

    /// JSON Schema fragment for this type.
    pub fn json_schema(self) -> Value {
        match self {
            ParamType::Enum(allowed) => json!({"type": "string", "enum": allowed}),
            ParamType::Document => json!({"type": ["object", "string"]}),
            other => json!({"type": other.expected()}),
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Parameter definition
// =============================================================================

/// One named argument of a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ParamDef {
    pub name: &'static str,
    pub param_type: ParamType,
    pub description: &'static str,
    optional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamDef {
    pub fn required(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            description,
            optional: false,
            default: None,
        }
    }

    /// Optional argument; `null` counts as absent.
    pub fn optional(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            optional: true,
            ..Self::required(name, param_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// A caller must supply it: not optional and no default to fall back on.
    pub fn is_required(&self) -> bool {
        !self.optional && self.default.is_none()
    }
}

// =============================================================================
// Checking and schema generation
// =============================================================================

/// Problems with `args` (empty when valid). Every problem is reported, not
/// just the first.
pub fn validate_params(params: &[ParamDef], args: &Value) -> Vec<String> {
    let Some(supplied) = args.as_object() else {
        return vec![format!("Arguments must be a JSON object, got {}", json_kind(args))];
    };

    let missing = params
        .iter()
        .filter(|p| p.is_required() && supplied.get(p.name).map_or(true, Value::is_null))
        .map(|p| format!("Missing required parameter: {}", p.name));

    let invalid = supplied.iter().filter_map(|(key, value)| {
        match params.iter().find(|p| p.name == key.as_str()) {
            None => Some(format!("Unknown parameter: {}", key)),
            // Absent: either acceptable or already reported as missing.
            Some(_) if value.is_null() => None,
            Some(p) => p
                .param_type
                .validate(value)
                .err()
                .map(|e| format!("Parameter '{}': {}", key, e)),
        }
    });

    missing.chain(invalid).collect()
}

/// Insert defaults for absent or `null` arguments.
pub fn fill_defaults(params: &[ParamDef], args: &mut Value) {
    let Some(map) = args.as_object_mut() else {
        return;
    };
    for p in params {
        let Some(default) = &p.default else { continue };
        if map.get(p.name).map_or(true, Value::is_null) {
            map.insert(p.name.to_string(), default.clone());
        }
    }
}

/// JSON Schema (`type: object`) describing the arguments.
pub fn input_schema(params: &[ParamDef]) -> Value {
    let mut properties = Map::new();
    for p in params {
        let mut schema = p.param_type.json_schema();
        schema["description"] = json!(p.description);
        if let Some(default) = &p.default {
            schema["default"] = default.clone();
        }
        properties.insert(p.name.to_string(), schema);
    }
    let required: Vec<&str> = params
        .iter()
        .filter(|p| p.is_required())
        .map(|p| p.name)
        .collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}
