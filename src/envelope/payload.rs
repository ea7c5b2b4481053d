//! Typed success payloads: one struct per result shape.
//!
//! Callers branch on shape, so nothing here is a generic "data" bag: each
//! output kind gets its own fields. Extra backend fields that have no fixed
//! slot are kept under `details`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::enums::{DocumentFormat, Severity};

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Machine-readable code (segment id, IK3/IK4 code, or engine error code).
    pub code: String,
    /// Segment position or loop path, when the engine reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub message: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            location: None,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message)
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Structural validation report for an X12 interchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ValidationReport {
    /// Engine verdict: `PASSED`, `WARNING`, `FAILED` or `UNKNOWN`.
    pub validation_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_name: Option<String>,
    pub error_count: u64,
    pub warning_count: u64,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_levels: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ta1: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack999: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_report: Option<Value>,
}

impl ValidationReport {
    /// No blocking errors.
    pub fn is_conformant(&self) -> bool {
        !self.validation_status.eq_ignore_ascii_case("FAILED")
            && self.errors.is_empty()
            && self.error_count == 0
    }

    pub fn has_warnings(&self) -> bool {
        self.validation_status.eq_ignore_ascii_case("WARNING")
            || !self.warnings.is_empty()
            || self.warning_count > 0
    }
}

/// Document body: structured JSON (FHIR) or text (X12, RMap).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentContent {
    Json(Value),
    Text(String),
}

impl DocumentContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            DocumentContent::Text(text) => Some(text),
            DocumentContent::Json(_) => None,
        }
    }
}

/// Converted document (FHIR bundle, RMap, or X12).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub format: DocumentFormat,
    pub content: DocumentContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub details: Map<String, Value>,
}

/// Inline binary body for engines that stream the artifact directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineBinary {
    pub content_type: String,
    pub size_bytes: usize,
    /// Standard base64 of the raw bytes.
    pub data_base64: String,
}

/// Rendered artifacts (PDF claim forms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BinaryArtifact {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_type: Option<String>,
    pub file_count: usize,
    /// Download descriptors as returned by the engine.
    pub files: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline: Option<InlineBinary>,
}

/// Summary of rows loaded into the engine database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TableRows {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<String>,
    pub tables_created: u64,
    pub tables_with_data: u64,
    pub total_rows: u64,
    /// Table name → row count.
    pub table_counts: Map<String, Value>,
}

/// Capability manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CapabilityList {
    /// Discovery route name → engine response.
    pub sources: Map<String, Value>,
    /// Discovery routes that did not answer.
    pub unavailable_sources: Vec<String>,
    pub conversion_paths: Vec<String>,
    pub compliance_gates: Map<String, Value>,
}

/// Shape-discriminated success payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ToolOutput {
    Report(ValidationReport),
    Document(Document),
    Binary(BinaryArtifact),
    Tabular(TableRows),
    Capabilities(CapabilityList),
}

impl ToolOutput {
    /// X12 text of a document-shaped X12 output.
    pub fn x12_text(&self) -> Option<&str> {
        match self {
            ToolOutput::Document(doc) if doc.format == DocumentFormat::X12 => doc.content.as_text(),
            _ => None,
        }
    }
}
