//! Tool registry: the closed, versioned set of twelve conversion tools.
//!
//! Built once on first use and never mutated. Each entry fixes the tool's
//! payload shape, its gate requirement, the backend route it forwards to, and
//! the result shape the normalizer must produce.

use crate::tools::catalog::{input_schema, ParamDef, ParamType};
use crate::types::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

// =============================================================================
// Classification enums
// =============================================================================

/// The twelve tools exposed to the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ValidateX12,
    ConvertX12ToFhir,
    ConvertX12ToRmap,
    ConvertRmapToX12,
    ConvertX12ToDatabase,
    GenerateX12FromDatabase,
    ConvertHl7ToFhir,
    ConvertCdaToFhir,
    ConvertFhirToX12,
    ConvertFhirToRmap,
    GenerateClaimPdf,
    ListSupportedFormats,
}

impl ToolName {
    pub const ALL: [ToolName; 12] = [
        ToolName::ValidateX12,
        ToolName::ConvertX12ToFhir,
        ToolName::ConvertX12ToRmap,
        ToolName::ConvertRmapToX12,
        ToolName::ConvertX12ToDatabase,
        ToolName::GenerateX12FromDatabase,
        ToolName::ConvertHl7ToFhir,
        ToolName::ConvertCdaToFhir,
        ToolName::ConvertFhirToX12,
        ToolName::ConvertFhirToRmap,
        ToolName::GenerateClaimPdf,
        ToolName::ListSupportedFormats,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::ValidateX12 => "validate_x12",
            ToolName::ConvertX12ToFhir => "convert_x12_to_fhir",
            ToolName::ConvertX12ToRmap => "convert_x12_to_rmap",
            ToolName::ConvertRmapToX12 => "convert_rmap_to_x12",
            ToolName::ConvertX12ToDatabase => "convert_x12_to_database",
            ToolName::GenerateX12FromDatabase => "generate_x12_from_database",
            ToolName::ConvertHl7ToFhir => "convert_hl7_to_fhir",
            ToolName::ConvertCdaToFhir => "convert_cda_to_fhir",
            ToolName::ConvertFhirToX12 => "convert_fhir_to_x12",
            ToolName::ConvertFhirToRmap => "convert_fhir_to_rmap",
            ToolName::GenerateClaimPdf => "generate_claim_pdf",
            ToolName::ListSupportedFormats => "list_supported_formats",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ToolName::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::not_found(format!("Unknown tool: {}", s)))
    }
}

/// Expected payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    X12,
    RMap,
    FhirBundle,
    Hl7,
    Cda,
    /// Rows already loaded in the engine's database, addressed by record id.
    DatabaseRows,
    None,
}

/// Expected result shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    ValidationReport,
    FhirBundle,
    RMapDoc,
    X12,
    TableRows,
    BinaryArtifact,
    CapabilityList,
}

/// Named data-integrity gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateId {
    /// Inbound document must be structurally valid before conversion.
    Gate1Input,
    /// Generated X12 must validate before it is reported as a deliverable.
    Gate5Output,
}

impl GateId {
    pub fn label(self) -> &'static str {
        match self {
            GateId::Gate1Input => "gate1_input_validation",
            GateId::Gate5Output => "gate5_output_validation",
        }
    }

    /// Inbound trust is delegable; outbound correctness is not.
    pub fn caller_attestable(self) -> bool {
        matches!(self, GateId::Gate1Input)
    }

    /// Output gates run after the primary call, input gates before it.
    pub fn is_post_check(self) -> bool {
        matches!(self, GateId::Gate5Output)
    }
}

/// Gate requirement attached to a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "gate")]
pub enum GateRequirement {
    None,
    /// The tool's own call is the gate.
    SelfValidating,
    Requires(GateId),
}

impl GateRequirement {
    pub fn gate(self) -> Option<GateId> {
        match self {
            GateRequirement::Requires(gate) => Some(gate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

/// Backend route descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub method: HttpMethod,
    pub path: &'static str,
    /// Query parameters fixed by the route itself.
    pub fixed_query: &'static [(&'static str, &'static str)],
}

impl Endpoint {
    const fn post(path: &'static str) -> Self {
        Self {
            method: HttpMethod::Post,
            path,
            fixed_query: &[],
        }
    }

    pub const fn get(path: &'static str) -> Self {
        Self {
            method: HttpMethod::Get,
            path,
            fixed_query: &[],
        }
    }

    const fn with_query(self, fixed_query: &'static [(&'static str, &'static str)]) -> Self {
        Self {
            fixed_query,
            ..self
        }
    }
}

/// Structural validation route shared by `validate_x12` and both gates.
pub const VALIDATE_ENDPOINT: Endpoint =
    Endpoint::post("/api/v2/hipaa-validate/validate-content");

/// Discovery routes queried by `list_supported_formats`, keyed by manifest name.
pub const CAPABILITY_SOURCES: [(&str, Endpoint); 4] = [
    (
        "hipaa_validate",
        Endpoint::get("/api/v2/hipaa-validate/supported-transactions"),
    ),
    (
        "hipaa_to_rmap",
        Endpoint::get("/api/v2/hipaa-to-rmap/supported-transactions"),
    ),
    (
        "hipaa_to_fhir",
        Endpoint::get("/api/v2/hipaa-to-fhir/supported-transactions"),
    ),
    (
        "database_to_hipaa",
        Endpoint::get("/api/v2/database-to-hipaa/transaction-types"),
    ),
];

// =============================================================================
// Tool definition
// =============================================================================

/// Complete, immutable tool entry.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: ToolName,
    pub description: &'static str,
    pub input_kind: InputKind,
    /// Argument carrying the document, if any.
    pub payload_param: Option<&'static str>,
    pub gate: GateRequirement,
    pub endpoint: Endpoint,
    pub output_kind: OutputKind,
    pub params: Vec<ParamDef>,
}

impl ToolDefinition {
    pub fn input_schema(&self) -> Value {
        input_schema(&self.params)
    }

    /// Entry for an MCP `tools/list` response.
    pub fn to_listing(&self) -> Value {
        json!({
            "name": self.name.as_str(),
            "description": self.description,
            "inputSchema": self.input_schema(),
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Read-only lookup over the fixed tool table.
#[derive(Debug)]
pub struct ToolRegistry {
    entries: Vec<ToolDefinition>,
}

static REGISTRY: OnceLock<ToolRegistry> = OnceLock::new();

impl ToolRegistry {
    /// Process-wide registry, built on first access.
    pub fn global() -> &'static ToolRegistry {
        REGISTRY.get_or_init(|| ToolRegistry {
            entries: ToolName::ALL.into_iter().map(build_definition).collect(),
        })
    }

    /// Resolve a tool by wire name.
    pub fn lookup(&self, name: &str) -> Result<&ToolDefinition> {
        let tool: ToolName = name.parse()?;
        Ok(self.get(tool))
    }

    pub fn get(&self, tool: ToolName) -> &ToolDefinition {
        // Entries are built in ToolName::ALL order.
        &self.entries[tool as usize]
    }

    pub fn list_entries(&self) -> &[ToolDefinition] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

const CLAIM_TYPES: &[&str] = &["auto", "837p", "837i", "837d"];

fn tx_param() -> ParamDef {
    ParamDef::optional(
        "transaction_type",
        ParamType::String,
        "HIPAA transaction type (837p, 837i, 837d, 835, 834, 270, 271, 276, 277, 278). Auto-detected if omitted.",
    )
}

fn strict_param() -> ParamDef {
    ParamDef::optional(
        "strict_mode",
        ParamType::Bool,
        "If true, validation warnings also block the conversion.",
    )
    .with_default(json!(false))
}

fn pre_validated_param() -> ParamDef {
    ParamDef::optional(
        "pre_validated",
        ParamType::Bool,
        "Caller asserts the input already passed validation. Honored only for input gates when policy allows.",
    )
    .with_default(json!(false))
}

fn build_definition(name: ToolName) -> ToolDefinition {
    use GateId::*;

    let (description, input_kind, payload_param, gate, endpoint, output_kind, mut params) =
        match name {
            ToolName::ValidateX12 => (
                "Validate HIPAA X12 EDI content against 5010 implementation guide rules. Returns the validation report with TA1/999 acknowledgments.",
                InputKind::X12,
                Some("x12_content"),
                GateRequirement::SelfValidating,
                VALIDATE_ENDPOINT,
                OutputKind::ValidationReport,
                vec![
                    ParamDef::required("x12_content", ParamType::String, "Raw X12 EDI content starting with ISA segment."),
                    tx_param(),
                ],
            ),
            ToolName::ConvertX12ToFhir => (
                "Convert HIPAA X12 EDI to FHIR R4 resources. Input is validated first and the conversion is BLOCKED if it is malformed.",
                InputKind::X12,
                Some("x12_content"),
                GateRequirement::Requires(Gate1Input),
                Endpoint::post("/api/v2/hipaa-to-fhir/convert"),
                OutputKind::FhirBundle,
                vec![
                    ParamDef::required("x12_content", ParamType::String, "Raw X12 EDI content with ISA/GS/ST envelope."),
                    tx_param(),
                    strict_param(),
                ],
            ),
            ToolName::ConvertX12ToRmap => (
                "Convert HIPAA X12 EDI to the RMap v5 intermediate record layout. Input is validated first.",
                InputKind::X12,
                Some("x12_content"),
                GateRequirement::Requires(Gate1Input),
                Endpoint::post("/api/v2/hipaa-to-rmap/convert"),
                OutputKind::RMapDoc,
                vec![
                    ParamDef::required("x12_content", ParamType::String, "Raw X12 EDI content."),
                    tx_param(),
                    strict_param(),
                ],
            ),
            ToolName::ConvertRmapToX12 => (
                "Convert RMap v5 content to HIPAA X12 EDI. The generated X12 is re-validated and BLOCKED if it fails; do not submit blocked output to payers.",
                InputKind::RMap,
                Some("rmap_content"),
                GateRequirement::Requires(Gate5Output),
                Endpoint::post("/api/v2/rmap-to-hipaa/convert"),
                OutputKind::X12,
                vec![
                    ParamDef::required("rmap_content", ParamType::String, "RMap v5 text content."),
                    tx_param(),
                ],
            ),
            ToolName::ConvertX12ToDatabase => (
                "Load HIPAA X12 EDI into relational tables scoped to a session. Input is validated first.",
                InputKind::X12,
                Some("x12_content"),
                GateRequirement::Requires(Gate1Input),
                Endpoint::post("/api/v2/hipaa-to-database/load"),
                OutputKind::TableRows,
                vec![
                    ParamDef::required("x12_content", ParamType::String, "Raw X12 EDI content."),
                    tx_param(),
                    ParamDef::optional("session_id", ParamType::String, "Session id for table scoping. Generated if omitted."),
                    strict_param(),
                ],
            ),
            ToolName::GenerateX12FromDatabase => (
                "Generate HIPAA X12 EDI from database records (DB to RMap to X12). The generated X12 is re-validated and BLOCKED if it fails.",
                InputKind::DatabaseRows,
                None,
                GateRequirement::Requires(Gate5Output),
                Endpoint::post("/api/v2/database-to-hipaa/convert"),
                OutputKind::X12,
                vec![
                    tx_param(),
                    ParamDef::optional("record_id", ParamType::Int, "Database record id. Uses the default record if omitted."),
                ],
            ),
            ToolName::ConvertHl7ToFhir => (
                "Convert HL7 v2.x messages to FHIR R4 resources. No X12 gate applies.",
                InputKind::Hl7,
                Some("hl7_content"),
                GateRequirement::None,
                Endpoint::post("/api/v2/ai/hl7-convert"),
                OutputKind::FhirBundle,
                vec![ParamDef::required("hl7_content", ParamType::String, "Raw HL7 v2.x message (pipe-delimited).")],
            ),
            ToolName::ConvertCdaToFhir => (
                "Convert CDA or C-CDA clinical documents to FHIR R4 resources. No X12 gate applies.",
                InputKind::Cda,
                Some("cda_content"),
                GateRequirement::None,
                Endpoint::post("/api/v2/ai/hl7-convert"),
                OutputKind::FhirBundle,
                vec![ParamDef::required("cda_content", ParamType::String, "CDA or C-CDA XML document.")],
            ),
            ToolName::ConvertFhirToX12 => (
                "Convert a FHIR R4 Bundle (Da Vinci PAS Claim or ClaimResponse) to X12 278. The generated X12 is re-validated and BLOCKED if it fails.",
                InputKind::FhirBundle,
                Some("fhir_bundle"),
                GateRequirement::Requires(Gate5Output),
                Endpoint::post("/api/v2/fhir-to-hipaa/convert")
                    .with_query(&[("output_format", "x12")]),
                OutputKind::X12,
                vec![ParamDef::required("fhir_bundle", ParamType::Document, "FHIR R4 Bundle as JSON (object or string).")],
            ),
            ToolName::ConvertFhirToRmap => (
                "Convert a FHIR R4 Bundle to the RMap v5 intermediate format. No output gate; RMap is not a final deliverable.",
                InputKind::FhirBundle,
                Some("fhir_bundle"),
                GateRequirement::None,
                Endpoint::post("/api/v2/fhir-to-hipaa/convert")
                    .with_query(&[("output_format", "rmap")]),
                OutputKind::RMapDoc,
                vec![ParamDef::required("fhir_bundle", ParamType::Document, "FHIR R4 Bundle as JSON (object or string).")],
            ),
            ToolName::GenerateClaimPdf => (
                "Generate PDF claim forms (CMS-1500, UB-04, ADA J400) from X12 837. Input is validated first; the response carries download URLs.",
                InputKind::X12,
                Some("x12_837_content"),
                GateRequirement::Requires(Gate1Input),
                Endpoint::post("/api/v2/claims-to-pdf/convert"),
                OutputKind::BinaryArtifact,
                vec![
                    ParamDef::required("x12_837_content", ParamType::String, "Raw X12 837 EDI content."),
                    ParamDef::required(
                        "claim_type",
                        ParamType::Enum(CLAIM_TYPES),
                        "837p, 837i, 837d, or auto for detection.",
                    )
                    .with_default(json!("auto")),
                    strict_param(),
                ],
            ),
            ToolName::ListSupportedFormats => (
                "List supported conversion paths, transaction types, and compliance gates. No gates apply.",
                InputKind::None,
                None,
                GateRequirement::None,
                CAPABILITY_SOURCES[0].1,
                OutputKind::CapabilityList,
                Vec::new(),
            ),
        };

    params.push(pre_validated_param());

    ToolDefinition {
        name,
        description,
        input_kind,
        payload_param,
        gate,
        endpoint,
        output_kind,
        params,
    }
}

// =============================================================================
// Tests
// =============================================================================
