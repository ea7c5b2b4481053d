//! Data-integrity gates.
//!
//! Gate 1 validates the inbound X12 before a conversion is attempted. Gate 5
//! validates X12 the engine produced before it is reported as a deliverable.
//! Both use the engine's structural validation route; they differ only in
//! when they run and in whether a caller may vouch for the payload instead.

use std::sync::Arc;

use serde_json::json;

use crate::backend::{Backend, BackendRequest, RequestBody, ResponseBody};
use crate::envelope::{ValidationIssue, ValidationReport};
use crate::normalize::parse_report;
use crate::tools::{GateId, VALIDATE_ENDPOINT};
use crate::types::{CallerAttestation, Error, Result};

/// Outcome of one gate evaluation that reached the validation service.
#[derive(Debug, Clone, PartialEq)]
pub enum GateVerdict {
    Passed {
        report: ValidationReport,
    },
    Blocked {
        reason: String,
        errors: Vec<ValidationIssue>,
        warnings: Vec<ValidationIssue>,
        report: ValidationReport,
    },
}

impl GateVerdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, GateVerdict::Passed { .. })
    }
}

/// Runs gate checks against the validation route.
#[derive(Clone)]
pub struct GateEvaluator {
    backend: Arc<dyn Backend>,
    attestation: CallerAttestation,
}

impl std::fmt::Debug for GateEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateEvaluator")
            .field("attestation", &self.attestation)
            .finish_non_exhaustive()
    }
}

impl GateEvaluator {
    pub fn new(backend: Arc<dyn Backend>, attestation: CallerAttestation) -> Self {
        Self {
            backend,
            attestation,
        }
    }

    /// Whether a `pre_validated` claim lets this gate be skipped.
    pub fn may_skip(&self, gate: GateId, pre_validated: bool) -> bool {
        pre_validated && gate.caller_attestable() && self.attestation == CallerAttestation::Allow
    }

    /// Call the validation route and parse its report.
    ///
    /// A failure to reach the route, or a body that is not a JSON report, is
    /// returned as an error: no verdict exists in that case.
    pub async fn validate(&self, content: &str, transaction_type: Option<&str>) -> Result<ValidationReport> {
        let mut body = json!({ "content": content });
        if let Some(tx) = transaction_type.filter(|t| !t.is_empty()) {
            body["transaction_type"] = json!(tx);
        }
        let raw = self
            .backend
            .call(BackendRequest::new(VALIDATE_ENDPOINT, RequestBody::Json(body)))
            .await?;
        match raw.decode()? {
            ResponseBody::Json(value) if value.is_object() => Ok(parse_report(&value)),
            _ => Err(Error::backend(
                raw.status,
                "validation route did not return a JSON report",
            )),
        }
    }

    /// Validate `content` and judge it for `gate`.
    pub async fn check(
        &self,
        gate: GateId,
        content: &str,
        transaction_type: Option<&str>,
        strict_mode: bool,
    ) -> Result<GateVerdict> {
        tracing::debug!(gate = gate.label(), transaction_type, strict_mode, "gate_check");
        let report = self.validate(content, transaction_type).await?;
        let verdict = judge(gate, report, strict_mode);
        tracing::info!(gate = gate.label(), passed = verdict.is_passed(), "gate_verdict");
        Ok(verdict)
    }
}

/// Decide a gate from a report.
///
/// Errors always block. Warnings block Gate 1 only in strict mode and never
/// block Gate 5.
pub fn judge(gate: GateId, report: ValidationReport, strict_mode: bool) -> GateVerdict {
    if !report.is_conformant() {
        let reason = match gate {
            GateId::Gate1Input => format!(
                "Input X12 has {} validation error(s).",
                report.error_count
            ),
            GateId::Gate5Output => format!(
                "Generated X12 has {} validation error(s).",
                report.error_count
            ),
        };
        return GateVerdict::Blocked {
            reason,
            errors: report.errors.clone(),
            warnings: Vec::new(),
            report,
        };
    }

    if strict_mode && gate == GateId::Gate1Input && report.has_warnings() {
        return GateVerdict::Blocked {
            reason: format!(
                "Strict mode: input X12 has {} warning(s). Disable strict_mode or fix warnings before retrying.",
                report.warning_count
            ),
            errors: Vec::new(),
            warnings: report.warnings.clone(),
            report,
        };
    }

    GateVerdict::Passed { report }
}
