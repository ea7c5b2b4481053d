//! Result envelope: the one outcome contract every tool call returns.
//!
//! [`ToolResult`] is the discriminated outcome; [`ResultEnvelope`] wraps it
//! with the audit metadata (transaction id, timestamp), an overall
//! [`Status`] and a plain-English ruling an agent can relay to its user.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::tools::{GateId, OutputKind, ToolName};
use crate::types::{Error, TransactionId, TransportFault};

pub mod enums;
pub mod payload;

pub use enums::{DocumentFormat, Severity, Status};
pub use payload::{
    BinaryArtifact, CapabilityList, Document, DocumentContent, InlineBinary, TableRows,
    ToolOutput, ValidationIssue, ValidationReport,
};

// =============================================================================
// Success
// =============================================================================

/// A backend result that parsed according to its output kind.
///
/// Only the normalizer constructs this.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Success {
    output_kind: OutputKind,
    payload: ToolOutput,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<ValidationIssue>,
}

impl Success {
    pub(crate) fn new(
        output_kind: OutputKind,
        payload: ToolOutput,
        warnings: Vec<ValidationIssue>,
    ) -> Self {
        Self {
            output_kind,
            payload,
            warnings,
        }
    }

    pub fn output_kind(&self) -> OutputKind {
        self.output_kind
    }

    pub fn payload(&self) -> &ToolOutput {
        &self.payload
    }

    pub fn warnings(&self) -> &[ValidationIssue] {
        &self.warnings
    }

    /// Attach non-blocking findings from a passed post-check.
    pub(crate) fn add_warnings(&mut self, extra: Vec<ValidationIssue>) {
        self.warnings.extend(extra);
    }
}

// =============================================================================
// Tool result
// =============================================================================

/// Discriminated outcome of one tool invocation. Exactly one variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ToolResult {
    Success(Success),

    /// The produced (or submitted) X12 is not conformant.
    ValidationFailure {
        #[serde(rename = "gate_id", skip_serializing_if = "Option::is_none")]
        gate: Option<GateId>,
        errors: Vec<ValidationIssue>,
        #[serde(skip_serializing_if = "Option::is_none")]
        report: Option<ValidationReport>,
        /// Rejected output, kept for diagnosis. Never a deliverable.
        #[serde(skip_serializing_if = "Option::is_none")]
        artifact: Option<String>,
    },

    /// A pre-check failed; the primary endpoint was never called.
    GateBlocked {
        #[serde(rename = "gate_id")]
        gate: GateId,
        reason: String,
        errors: Vec<ValidationIssue>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<ValidationIssue>,
    },

    BackendError {
        http_status: u16,
        message: String,
    },

    TransportError {
        cause: TransportFault,
    },

    /// Rejected before any network call.
    ClientError {
        code: String,
        message: String,
    },
}

impl ToolResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success(_))
    }

    pub fn as_success(&self) -> Option<&Success> {
        match self {
            ToolResult::Success(success) => Some(success),
            _ => None,
        }
    }

    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolResult::Success(_) => "success",
            ToolResult::ValidationFailure { .. } => "validation_failure",
            ToolResult::GateBlocked { .. } => "gate_blocked",
            ToolResult::BackendError { .. } => "backend_error",
            ToolResult::TransportError { .. } => "transport_error",
            ToolResult::ClientError { .. } => "client_error",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ToolResult::Success(success) if success.warnings.is_empty() => Status::Approved,
            ToolResult::Success(_) => Status::ApprovedWithConditions,
            ToolResult::ValidationFailure { .. } | ToolResult::GateBlocked { .. } => {
                Status::Blocked
            }
            ToolResult::BackendError { .. }
            | ToolResult::TransportError { .. }
            | ToolResult::ClientError { .. } => Status::Error,
        }
    }
}

impl From<Error> for ToolResult {
    fn from(err: Error) -> Self {
        if err.is_client_error() {
            return ToolResult::ClientError {
                code: err.to_rpc_code().to_string(),
                message: err.to_string(),
            };
        }
        match err {
            Error::Backend { status, message } => ToolResult::BackendError {
                http_status: status,
                message,
            },
            Error::Transport(cause) => ToolResult::TransportError { cause },
            // Local failures while preparing or reading a call.
            other => ToolResult::TransportError {
                cause: TransportFault::Other(other.to_string()),
            },
        }
    }
}

impl Error {
    /// Typed outcome for an error raised while serving a call.
    pub fn to_tool_result(self) -> ToolResult {
        self.into()
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// Serialized response for one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ResultEnvelope {
    pub status: Status,
    pub ruling: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolName>,
    /// Gate that produced a block, when one did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate: Option<&'static str>,
    pub transaction_id: TransactionId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub result: ToolResult,
}

impl ResultEnvelope {
    pub fn new(tool: Option<ToolName>, result: ToolResult) -> Self {
        Self {
            status: result.status(),
            ruling: ruling(tool, &result),
            tool,
            gate: gate_label(tool, &result),
            transaction_id: TransactionId::new(),
            timestamp: Utc::now(),
            result,
        }
    }
}

fn gate_label(tool: Option<ToolName>, result: &ToolResult) -> Option<&'static str> {
    match result {
        ToolResult::GateBlocked { gate, .. } => Some(gate.label()),
        ToolResult::ValidationFailure { gate: Some(gate), .. } => Some(gate.label()),
        ToolResult::ValidationFailure { gate: None, .. } => Some("validation"),
        ToolResult::Success(_) if tool == Some(ToolName::ValidateX12) => Some("validation"),
        _ => None,
    }
}

fn issue_summary(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .take(5)
        .map(|i| match &i.location {
            Some(loc) => format!("{} at {}: {}", i.code, loc, i.message),
            None => format!("{}: {}", i.code, i.message),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn warning_suffix(count: usize) -> String {
    if count == 0 {
        String::new()
    } else {
        format!(" {} warning(s) noted.", count)
    }
}

/// Plain-English sentence an agent can relay directly.
fn ruling(tool: Option<ToolName>, result: &ToolResult) -> String {
    let tool_label = tool.map_or("request", ToolName::as_str);
    match result {
        ToolResult::Success(success) => {
            let warnings = warning_suffix(success.warnings.len());
            match &success.payload {
                ToolOutput::Report(report) => format!(
                    "Validation PASSED. The {} content is structurally valid.{}",
                    report.transaction_name.as_deref().unwrap_or("X12"),
                    warnings
                ),
                ToolOutput::Document(doc) => {
                    let tx = doc
                        .transaction_type
                        .as_deref()
                        .map(|t| format!(" ({})", t.to_ascii_uppercase()))
                        .unwrap_or_default();
                    let gated = if doc.format == DocumentFormat::X12 {
                        " and passed output validation"
                    } else {
                        ""
                    };
                    format!(
                        "{} produced {}{}{}.{}",
                        tool_label,
                        doc.format.display_name(),
                        tx,
                        gated,
                        warnings
                    )
                }
                ToolOutput::Binary(artifact) => format!(
                    "Generated {} {} file(s).{}",
                    artifact.file_count,
                    artifact.form_name.as_deref().unwrap_or("claim form"),
                    warnings
                ),
                ToolOutput::Tabular(rows) => format!(
                    "Loaded into database session '{}': {} tables created, {} total rows.{}",
                    rows.session_id, rows.tables_created, rows.total_rows, warnings
                ),
                ToolOutput::Capabilities(caps) => format!(
                    "Capability manifest retrieved: {} conversion paths, {} of {} discovery sources answered.",
                    caps.conversion_paths.len(),
                    caps.sources.len(),
                    caps.sources.len() + caps.unavailable_sources.len()
                ),
            }
        }
        ToolResult::ValidationFailure {
            gate, errors, report, ..
        } => {
            let desc = report
                .as_ref()
                .and_then(|r| r.error_description.as_deref())
                .map(|d| format!(" {}.", d))
                .unwrap_or_default();
            match gate {
                Some(GateId::Gate5Output) => format!(
                    "X12 was generated by {} but FAILED output validation with {} error(s).{} The source data may be incomplete. DO NOT submit this to payers. Details: {}",
                    tool_label,
                    errors.len(),
                    desc,
                    issue_summary(errors)
                ),
                _ => format!(
                    "Validation FAILED with {} error(s).{} Details: {}",
                    errors.len(),
                    desc,
                    issue_summary(errors)
                ),
            }
        }
        ToolResult::GateBlocked { reason, errors, .. } => {
            if errors.is_empty() {
                format!("Conversion REFUSED. {}", reason)
            } else {
                format!(
                    "Conversion REFUSED. {} Details: {}",
                    reason,
                    issue_summary(errors)
                )
            }
        }
        ToolResult::BackendError {
            http_status,
            message,
        } => format!(
            "{} failed: backend returned HTTP {}. {}",
            tool_label,
            http_status,
            truncate(message, 300)
        ),
        ToolResult::TransportError { cause } => match cause {
            TransportFault::Timeout => format!(
                "{} failed: the conversion engine did not answer before the timeout. The request was not retried.",
                tool_label
            ),
            TransportFault::Cancelled => format!("{} was cancelled by the caller.", tool_label),
            other => format!(
                "{} failed: the conversion engine is unreachable ({}).",
                tool_label, other
            ),
        },
        ToolResult::ClientError { message, .. } => {
            format!("Request rejected before contacting the engine: {}", message)
        }
    }
}

/// Truncate on a char boundary.
pub(crate) fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// =============================================================================
// Tests
// =============================================================================
