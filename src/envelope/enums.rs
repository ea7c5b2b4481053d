//! Core enumerations for the result envelope.

use serde::{Deserialize, Serialize};

/// Top-level verdict an agent can relay without reading the details.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Approved,
    ApprovedWithConditions,
    Blocked,
    Error,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Approved | Status::ApprovedWithConditions)
    }
}

/// Document family carried by a document-shaped success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    FhirBundle,
    #[serde(rename = "rmap")]
    RMap,
    X12,
}

impl DocumentFormat {
    pub fn display_name(self) -> &'static str {
        match self {
            DocumentFormat::FhirBundle => "FHIR R4 Bundle",
            DocumentFormat::RMap => "RMap v5",
            DocumentFormat::X12 => "X12",
        }
    }
}

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}
