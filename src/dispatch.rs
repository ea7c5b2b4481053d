//! Dispatcher: one tool invocation from arguments to result envelope.
//!
//! Per call: resolve the tool, check arguments, run the input gate, call the
//! primary route, normalize, run the output gate. Steps are strictly ordered
//! within a call and calls share no mutable state, so one `Dispatcher` is
//! cloned into every task.
//!
//! ```text
//! Received -> GateChecking -> Blocked
//!                          -> Dispatching -> Completed
//!                                         -> PostGateChecking -> Completed
//!                                                             -> Downgraded
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::backend::{Backend, BackendRequest, HttpBackend, RequestBody, ResponseBody, Upload};
use crate::envelope::{ResultEnvelope, Success, ToolResult};
use crate::gates::{GateEvaluator, GateVerdict};
use crate::normalize;
use crate::tools::{
    fill_defaults, validate_params, GateId, ToolDefinition, ToolName, ToolRegistry,
    CAPABILITY_SOURCES,
};
use crate::types::{CallerAttestation, Config, Error, Result};

/// Static conversion-path manifest reported by `list_supported_formats`.
pub const CONVERSION_PATHS: [&str; 9] = [
    "X12 → FHIR R4 (hipaa-to-fhir)",
    "X12 → RMap v5 (hipaa-to-rmap)",
    "RMap v5 → X12 (rmap-to-hipaa)",
    "X12 → Database (hipaa-to-database)",
    "Database → X12 (database-to-hipaa)",
    "FHIR R4 → X12 278 (fhir-to-hipaa)",
    "FHIR R4 → RMap v5 (fhir-to-hipaa?output_format=rmap)",
    "HL7 v2 / CDA → FHIR R4 (ai/hl7-convert)",
    "X12 837 → PDF claim forms (claims-to-pdf)",
];

/// Transaction type the FHIR → X12 route always produces.
const FHIR_OUTPUT_TRANSACTION: &str = "278";

// =============================================================================
// State
// =============================================================================

/// Dispatch lifecycle, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Received,
    GateChecking,
    Blocked,
    Dispatching,
    PostGateChecking,
    Completed,
    Downgraded,
}

impl DispatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            DispatchState::Received => "received",
            DispatchState::GateChecking => "gate_checking",
            DispatchState::Blocked => "blocked",
            DispatchState::Dispatching => "dispatching",
            DispatchState::PostGateChecking => "post_gate_checking",
            DispatchState::Completed => "completed",
            DispatchState::Downgraded => "downgraded",
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn transition(tool: ToolName, state: DispatchState) {
    tracing::info!("dispatch_transition: tool={}, state={}", tool, state);
}

// =============================================================================
// Arguments
// =============================================================================

/// Arguments after defaults and schema checks.
#[derive(Debug)]
struct CallArgs<'a> {
    def: &'a ToolDefinition,
    args: Map<String, Value>,
}

impl<'a> CallArgs<'a> {
    fn text(&self, key: &str) -> Option<&str> {
        self.args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn flag(&self, key: &str) -> bool {
        self.args.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Raw payload text. Not trimmed; X12 segment terminators matter.
    fn payload(&self) -> &str {
        self.def
            .payload_param
            .and_then(|p| self.args.get(p))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    fn transaction_type(&self) -> Option<&str> {
        self.text("transaction_type")
    }

    fn strict_mode(&self) -> bool {
        self.flag("strict_mode")
    }

    fn pre_validated(&self) -> bool {
        self.flag("pre_validated")
    }

    /// `claim_type` normalized to lowercase; `auto` when absent.
    fn claim_type(&self) -> String {
        self.text("claim_type")
            .unwrap_or("auto")
            .to_ascii_lowercase()
    }

    /// Transaction type sent to the validation route for a gate.
    fn gate_transaction_type(&self, gate: GateId) -> Option<String> {
        match (self.def.name, gate) {
            (ToolName::GenerateClaimPdf, GateId::Gate1Input) => {
                let claim = self.claim_type();
                Some(if claim == "auto" { "837p".to_string() } else { claim })
            }
            (ToolName::ConvertFhirToX12, GateId::Gate5Output) => {
                Some(FHIR_OUTPUT_TRANSACTION.to_string())
            }
            _ => self.transaction_type().map(str::to_string),
        }
    }

    /// FHIR bundle argument as JSON. A string must parse as a JSON object.
    fn fhir_bundle(&self) -> Result<Value> {
        match self.args.get("fhir_bundle") {
            Some(Value::String(text)) => {
                let parsed: Value = serde_json::from_str(text)
                    .map_err(|e| Error::validation(format!("Invalid JSON in fhir_bundle: {}", e)))?;
                if parsed.is_object() {
                    Ok(parsed)
                } else {
                    Err(Error::validation("fhir_bundle must be a JSON object"))
                }
            }
            Some(value @ Value::Object(_)) => Ok(value.clone()),
            _ => Err(Error::validation("Missing required parameter: fhir_bundle")),
        }
    }
}

/// Short transaction codes to the long names the X12 → FHIR route expects.
pub fn fhir_transaction_type(tx: &str) -> String {
    let long = match tx.to_ascii_lowercase().as_str() {
        "837p" => "837-professional",
        "837i" => "837-institutional",
        "837d" => "837-dental",
        "835" => "835-remittance",
        "834" => "834-enrollment",
        "270" => "270-eligibility",
        "271" => "271-eligibility",
        "276" => "276-claim-status",
        "277" => "277-claim-status",
        "278" | "278-request" => "278-request",
        "278-response" => "278-response",
        _ => return tx.to_string(),
    };
    long.to_string()
}

fn upload_name(tx: Option<&str>, extension: &str) -> String {
    match tx {
        Some(tx) => format!("input.{}.{}", tx, extension),
        None => format!("input.{}", extension),
    }
}

/// Build the primary-route request for a tool.
fn build_request(call: &CallArgs<'_>) -> Result<BackendRequest> {
    let def = call.def;
    let tx = call.transaction_type();
    let x12_upload = || Some(Upload::text(upload_name(tx, "x12"), call.payload()));

    let request = match def.name {
        ToolName::ValidateX12 => {
            let mut body = json!({ "content": call.payload() });
            if let Some(tx) = tx {
                body["transaction_type"] = json!(tx);
            }
            BackendRequest::new(def.endpoint, RequestBody::Json(body))
        }
        ToolName::ConvertX12ToFhir => {
            let req = BackendRequest::new(
                def.endpoint,
                RequestBody::Form {
                    upload: x12_upload(),
                    fields: Vec::new(),
                },
            );
            match tx {
                Some(tx) => req.with_query("transaction_type", fhir_transaction_type(tx)),
                None => req,
            }
        }
        ToolName::ConvertX12ToRmap | ToolName::ConvertRmapToX12 => {
            let upload = if def.name == ToolName::ConvertRmapToX12 {
                Some(Upload::text(upload_name(tx, "rmap"), call.payload()))
            } else {
                x12_upload()
            };
            let req = BackendRequest::new(
                def.endpoint,
                RequestBody::Form {
                    upload,
                    fields: Vec::new(),
                },
            );
            match tx {
                Some(tx) => req.with_query("transaction_type", tx),
                None => req,
            }
        }
        ToolName::ConvertX12ToDatabase => {
            let mut fields = Vec::new();
            if let Some(tx) = tx {
                fields.push(("transaction_type".to_string(), tx.to_string()));
            }
            if let Some(session) = call.text("session_id") {
                fields.push(("session_id".to_string(), session.to_string()));
            }
            BackendRequest::new(
                def.endpoint,
                RequestBody::Form {
                    upload: x12_upload(),
                    fields,
                },
            )
        }
        ToolName::GenerateX12FromDatabase => {
            let mut req = BackendRequest::new(def.endpoint, RequestBody::Empty);
            if let Some(tx) = tx {
                req = req.with_query("transaction_type", tx);
            }
            if let Some(id) = call.args.get("record_id").filter(|v| !v.is_null()) {
                req = req.with_query("record_id", id.to_string());
            }
            req
        }
        ToolName::ConvertHl7ToFhir | ToolName::ConvertCdaToFhir => BackendRequest::new(
            def.endpoint,
            RequestBody::Form {
                upload: None,
                fields: vec![("content".to_string(), call.payload().to_string())],
            },
        ),
        ToolName::ConvertFhirToX12 | ToolName::ConvertFhirToRmap => {
            BackendRequest::new(def.endpoint, RequestBody::Json(call.fhir_bundle()?))
        }
        ToolName::GenerateClaimPdf => {
            let req = BackendRequest::new(
                def.endpoint,
                RequestBody::Form {
                    upload: Some(Upload::text("claim.x12", call.payload())),
                    fields: Vec::new(),
                },
            );
            let claim = call.claim_type();
            if claim == "auto" {
                req
            } else {
                req.with_query("claim_type", claim)
            }
        }
        ToolName::ListSupportedFormats => BackendRequest::new(def.endpoint, RequestBody::Empty),
    };
    Ok(request)
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Gate-enforcing tool dispatcher. Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    gates: GateEvaluator,
    registry: &'static ToolRegistry,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("gates", &self.gates)
            .field("tools", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn Backend>, attestation: CallerAttestation) -> Self {
        Self {
            gates: GateEvaluator::new(backend.clone(), attestation),
            backend,
            registry: ToolRegistry::global(),
        }
    }

    /// Dispatcher over the HTTP backend described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        let backend = HttpBackend::new(&config.backend)?;
        tracing::info!(
            "dispatcher_ready: base_url={}, timeout={:?}, caller_attestation={:?}",
            backend.base_url(),
            config.backend.timeout,
            config.gates.caller_attestation
        );
        Ok(Self::new(Arc::new(backend), config.gates.caller_attestation))
    }

    pub fn registry(&self) -> &'static ToolRegistry {
        self.registry
    }

    /// Run one tool call to completion.
    pub async fn invoke(&self, name: &str, arguments: Value) -> ResultEnvelope {
        let span = tracing::info_span!("dispatch", tool = name);
        async move {
            let started = Instant::now();
            let (tool, result) = self.execute(name, arguments).await;
            tracing::info!(
                "dispatch_finished: tool={}, result={}, elapsed_ms={}",
                name,
                result.kind(),
                started.elapsed().as_millis()
            );
            ResultEnvelope::new(tool, result)
        }
        .instrument(span)
        .await
    }

    /// Like [`invoke`](Self::invoke), abandoning the call when `cancel` fires.
    ///
    /// The in-flight request future is dropped, which closes its connection.
    pub async fn invoke_with_cancel(
        &self,
        name: &str,
        arguments: Value,
        cancel: CancellationToken,
    ) -> ResultEnvelope {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::warn!("dispatch_cancelled: tool={}", name);
                ResultEnvelope::new(name.parse().ok(), Error::cancelled().to_tool_result())
            }
            envelope = self.invoke(name, arguments) => envelope,
        }
    }

    /// Resolve, check and run a call, without the envelope.
    pub async fn execute(&self, name: &str, arguments: Value) -> (Option<ToolName>, ToolResult) {
        let def = match self.registry.lookup(name) {
            Ok(def) => def,
            Err(e) => {
                tracing::warn!("dispatch_rejected: tool={}, error={}", name, e);
                return (None, e.to_tool_result());
            }
        };
        transition(def.name, DispatchState::Received);

        // Discovery takes no input; whatever the caller sent is ignored.
        if def.name == ToolName::ListSupportedFormats {
            transition(def.name, DispatchState::Dispatching);
            let result = self.list_supported_formats().await;
            transition(def.name, DispatchState::Completed);
            return (Some(def.name), result);
        }

        let mut arguments = if arguments.is_null() {
            json!({})
        } else {
            arguments
        };
        fill_defaults(&def.params, &mut arguments);
        let problems = validate_params(&def.params, &arguments);
        if !problems.is_empty() {
            tracing::warn!("dispatch_rejected: tool={}, problems={:?}", def.name, problems);
            return (
                Some(def.name),
                Error::validation(problems.join("; ")).to_tool_result(),
            );
        }
        let args = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let call = CallArgs { def, args };
        (Some(def.name), self.run(&call).await)
    }

    async fn run(&self, call: &CallArgs<'_>) -> ToolResult {
        let def = call.def;

        // Argument problems surface before any network call.
        let request = match build_request(call) {
            Ok(request) => request,
            Err(e) => return e.to_tool_result(),
        };

        if let Some(gate) = def.gate.gate().filter(|g| !g.is_post_check()) {
            if self.gates.may_skip(gate, call.pre_validated()) {
                tracing::info!(
                    "gate_skipped: tool={}, gate={}, reason=caller_attested",
                    def.name,
                    gate.label()
                );
            } else {
                transition(def.name, DispatchState::GateChecking);
                let tx = call.gate_transaction_type(gate);
                match self
                    .gates
                    .check(gate, call.payload(), tx.as_deref(), call.strict_mode())
                    .await
                {
                    Ok(GateVerdict::Passed { .. }) => {}
                    Ok(GateVerdict::Blocked {
                        reason,
                        errors,
                        warnings,
                        ..
                    }) => {
                        transition(def.name, DispatchState::Blocked);
                        return ToolResult::GateBlocked {
                            gate,
                            reason,
                            errors,
                            warnings,
                        };
                    }
                    Err(e) => {
                        tracing::warn!(
                            "gate_unavailable: tool={}, gate={}, error={}",
                            def.name,
                            gate.label(),
                            e
                        );
                        return e.to_tool_result();
                    }
                }
            }
        }

        transition(def.name, DispatchState::Dispatching);
        let raw = match self.backend.call(request).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("dispatch_backend_failed: tool={}, error={}", def.name, e);
                return e.to_tool_result();
            }
        };
        let result = normalize::wrap(def.output_kind, &raw);

        match (def.gate.gate().filter(|g| g.is_post_check()), result) {
            (Some(gate), ToolResult::Success(success)) => {
                self.post_check(call, gate, success).await
            }
            (_, result) => {
                transition(def.name, DispatchState::Completed);
                result
            }
        }
    }

    /// Output gate: generated X12 must validate. Never skipped.
    async fn post_check(
        &self,
        call: &CallArgs<'_>,
        gate: GateId,
        mut success: Success,
    ) -> ToolResult {
        let def = call.def;
        if call.pre_validated() {
            tracing::debug!(
                "gate_attestation_ignored: tool={}, gate={}",
                def.name,
                gate.label()
            );
        }
        let Some(x12) = success.payload().x12_text().map(str::to_string) else {
            return ToolResult::BackendError {
                http_status: 200,
                message: format!("{} returned no X12 text to validate", def.name),
            };
        };

        transition(def.name, DispatchState::PostGateChecking);
        let tx = call.gate_transaction_type(gate);
        match self.gates.check(gate, &x12, tx.as_deref(), false).await {
            Ok(GateVerdict::Passed { report }) => {
                success.add_warnings(report.warnings);
                transition(def.name, DispatchState::Completed);
                ToolResult::Success(success)
            }
            Ok(GateVerdict::Blocked { errors, report, .. }) => {
                transition(def.name, DispatchState::Downgraded);
                ToolResult::ValidationFailure {
                    gate: Some(gate),
                    errors,
                    report: Some(report),
                    artifact: Some(x12),
                }
            }
            Err(e) => {
                tracing::warn!(
                    "gate_unavailable: tool={}, gate={}, error={}",
                    def.name,
                    gate.label(),
                    e
                );
                e.to_tool_result()
            }
        }
    }

    /// Query every discovery route concurrently; keep the ones that answer.
    async fn list_supported_formats(&self) -> ToolResult {
        let backend = &self.backend;
        let calls = CAPABILITY_SOURCES.into_iter().map(|(name, endpoint)| async move {
            let outcome = backend
                .call(BackendRequest::new(endpoint, RequestBody::Empty))
                .await
                .and_then(|raw| raw.decode());
            (name, outcome)
        });

        let mut sources = Map::new();
        let mut unavailable = Vec::new();
        for (name, outcome) in join_all(calls).await {
            match outcome {
                Ok(ResponseBody::Json(value)) => {
                    sources.insert(name.to_string(), value);
                }
                Ok(ResponseBody::Text(text)) => {
                    sources.insert(name.to_string(), Value::String(text));
                }
                Ok(ResponseBody::Binary { .. }) => {
                    tracing::debug!("capability_source_skipped: source={}, reason=binary", name);
                    unavailable.push(name.to_string());
                }
                Err(e) => {
                    tracing::debug!("capability_source_unavailable: source={}, error={}", name, e);
                    unavailable.push(name.to_string());
                }
            }
        }

        let mut gates = Map::new();
        gates.insert(
            GateId::Gate1Input.label().to_string(),
            json!("Validates X12 input before conversion (5010 rules)"),
        );
        gates.insert(
            GateId::Gate5Output.label().to_string(),
            json!("Re-validates generated X12 output before returning"),
        );

        normalize::capabilities(
            sources,
            unavailable,
            CONVERSION_PATHS.iter().map(|p| p.to_string()).collect(),
            gates,
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, RawResponse};
    use crate::envelope::{Status, ToolOutput};
    use crate::types::TransportFault;
    use async_trait::async_trait;
    use std::time::Duration;
    use tracing_test::traced_test;

    const VALIDATE: &str = "/api/v2/hipaa-validate/validate-content";

    fn passed() -> RawResponse {
        RawResponse::json(200, &json!({"validation_status": "PASSED"}))
    }

    fn failed(line: &str) -> RawResponse {
        RawResponse::json(
            200,
            &json!({
                "validation_status": "FAILED",
                "errors": {"has_errors": true, "error_count": 1, "error_lines": [line]}
            }),
        )
    }

    fn dispatcher(backend: MockBackend, attestation: CallerAttestation) -> Dispatcher {
        Dispatcher::new(Arc::new(backend), attestation)
    }

    fn expect_path(backend: &mut MockBackend, path: &'static str, times: usize, response: RawResponse) {
        backend
            .expect_call()
            .withf(move |req| req.path() == path)
            .times(times)
            .returning(move |_| Ok(response.clone()));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_client_error() {
        let d = dispatcher(MockBackend::new(), CallerAttestation::Deny);
        let envelope = d.invoke("convert_x12_to_csv", json!({})).await;
        assert_eq!(envelope.status, Status::Error);
        assert!(envelope.tool.is_none());
        assert!(matches!(
            envelope.result,
            ToolResult::ClientError { ref code, .. } if code == "NOT_FOUND"
        ));
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_client_error() {
        let d = dispatcher(MockBackend::new(), CallerAttestation::Deny);
        let envelope = d.invoke("convert_x12_to_fhir", json!({"x12": "ISA"})).await;
        match envelope.result {
            ToolResult::ClientError { code, message } => {
                assert_eq!(code, "INVALID_ARGUMENT");
                assert!(message.contains("Missing required parameter: x12_content"));
                assert!(message.contains("Unknown parameter: x12"));
            }
            other => panic!("expected client error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_fhir_bundle_is_client_error() {
        let d = dispatcher(MockBackend::new(), CallerAttestation::Deny);
        let (_, result) = d
            .execute("convert_fhir_to_x12", json!({"fhir_bundle": "{not json"}))
            .await;
        assert!(matches!(
            result,
            ToolResult::ClientError { ref code, .. } if code == "INVALID_ARGUMENT"
        ));
    }

    #[tokio::test]
    async fn test_gate1_block_skips_primary() {
        let mut backend = MockBackend::new();
        expect_path(&mut backend, VALIDATE, 1, failed("NM1: Missing mandatory segment"));
        expect_path(&mut backend, "/api/v2/hipaa-to-fhir/convert", 0, passed());

        let d = dispatcher(backend, CallerAttestation::Deny);
        let envelope = d
            .invoke("convert_x12_to_fhir", json!({"x12_content": "ISA*~"}))
            .await;
        assert_eq!(envelope.status, Status::Blocked);
        assert_eq!(envelope.gate, Some("gate1_input_validation"));
        match envelope.result {
            ToolResult::GateBlocked { gate, errors, .. } => {
                assert_eq!(gate, GateId::Gate1Input);
                assert_eq!(errors[0].code, "NM1");
            }
            other => panic!("expected gate block, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gate1_pass_then_convert() {
        let mut backend = MockBackend::new();
        expect_path(&mut backend, VALIDATE, 1, passed());
        backend
            .expect_call()
            .withf(|req| {
                req.path() == "/api/v2/hipaa-to-fhir/convert"
                    && req.query == vec![("transaction_type".to_string(), "837-professional".to_string())]
                    && matches!(&req.body, RequestBody::Form { upload: Some(u), .. }
                        if u.file_name == "input.837p.x12" && u.content == "ISA*~")
            })
            .times(1)
            .returning(|_| {
                Ok(RawResponse::json(
                    200,
                    &json!({"fhir_bundle": {"resourceType": "Bundle", "entry": []}}),
                ))
            });

        let d = dispatcher(backend, CallerAttestation::Deny);
        let envelope = d
            .invoke(
                "convert_x12_to_fhir",
                json!({"x12_content": "ISA*~", "transaction_type": "837p"}),
            )
            .await;
        assert_eq!(envelope.status, Status::Approved);
        assert!(envelope.result.is_success());
    }

    #[tokio::test]
    async fn test_gate_unreachable_stops_dispatch() {
        let mut backend = MockBackend::new();
        backend
            .expect_call()
            .withf(|req| req.path() == VALIDATE)
            .times(1)
            .returning(|_| Err(Error::backend(503, "validator down")));
        expect_path(&mut backend, "/api/v2/hipaa-to-rmap/convert", 0, passed());

        let d = dispatcher(backend, CallerAttestation::Deny);
        let (_, result) = d
            .execute("convert_x12_to_rmap", json!({"x12_content": "ISA*~"}))
            .await;
        assert_eq!(
            result,
            ToolResult::BackendError {
                http_status: 503,
                message: "validator down".into()
            }
        );
    }

    #[tokio::test]
    async fn test_strict_mode_blocks_on_warnings() {
        let mut backend = MockBackend::new();
        expect_path(
            &mut backend,
            VALIDATE,
            1,
            RawResponse::json(
                200,
                &json!({
                    "validation_status": "WARNING",
                    "errors": {"has_warnings": true, "warning_count": 1,
                               "error_lines": ["REF: situational segment omitted"]}
                }),
            ),
        );
        expect_path(&mut backend, "/api/v2/hipaa-to-database/load", 0, passed());

        let d = dispatcher(backend, CallerAttestation::Deny);
        let (_, result) = d
            .execute(
                "convert_x12_to_database",
                json!({"x12_content": "ISA*~", "strict_mode": true}),
            )
            .await;
        match result {
            ToolResult::GateBlocked { errors, warnings, reason, .. } => {
                assert!(errors.is_empty());
                assert_eq!(warnings.len(), 1);
                assert!(reason.contains("Strict mode"));
            }
            other => panic!("expected gate block, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gate5_failure_downgrades_success() {
        let mut backend = MockBackend::new();
        expect_path(
            &mut backend,
            "/api/v2/rmap-to-hipaa/convert",
            1,
            RawResponse::json(200, &json!({"x12_content": "ISA*BROKEN~"})),
        );
        backend
            .expect_call()
            .withf(|req| {
                req.path() == VALIDATE
                    && matches!(&req.body, RequestBody::Json(b) if b["content"] == "ISA*BROKEN~")
            })
            .times(1)
            .returning(|_| Ok(failed("ISA: invalid interchange header")));

        let d = dispatcher(backend, CallerAttestation::Allow);
        let envelope = d
            .invoke(
                "convert_rmap_to_x12",
                json!({"rmap_content": "HDR|1", "pre_validated": true}),
            )
            .await;
        assert_eq!(envelope.status, Status::Blocked);
        assert_eq!(envelope.gate, Some("gate5_output_validation"));
        assert!(envelope.ruling.contains("DO NOT submit"));
        match envelope.result {
            ToolResult::ValidationFailure { gate, errors, artifact, report } => {
                assert_eq!(gate, Some(GateId::Gate5Output));
                assert_eq!(errors[0].code, "ISA");
                assert_eq!(artifact.as_deref(), Some("ISA*BROKEN~"));
                assert!(report.is_some());
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gate5_passes_with_warnings() {
        let mut backend = MockBackend::new();
        expect_path(
            &mut backend,
            "/api/v2/database-to-hipaa/convert",
            1,
            RawResponse::json(
                200,
                &json!({"success": true, "stage2_rmap_to_hipaa": {"hipaa_content": "ISA*OK~"}}),
            ),
        );
        expect_path(
            &mut backend,
            VALIDATE,
            1,
            RawResponse::json(
                200,
                &json!({
                    "validation_status": "WARNING",
                    "errors": {"has_warnings": true, "error_lines": ["PER: contact missing"]}
                }),
            ),
        );

        let d = dispatcher(backend, CallerAttestation::Deny);
        let envelope = d
            .invoke(
                "generate_x12_from_database",
                json!({"transaction_type": "837p", "record_id": 4}),
            )
            .await;
        assert_eq!(envelope.status, Status::ApprovedWithConditions);
        let success = envelope.result.as_success().unwrap();
        assert_eq!(success.payload().x12_text(), Some("ISA*OK~"));
        assert_eq!(success.warnings()[0].code, "PER");
    }

    #[tokio::test]
    async fn test_fhir_to_x12_validates_as_278() {
        let mut backend = MockBackend::new();
        backend
            .expect_call()
            .withf(|req| {
                req.path() == "/api/v2/fhir-to-hipaa/convert"
                    && req.endpoint.fixed_query == [("output_format", "x12")]
                    && matches!(&req.body, RequestBody::Json(b) if b["resourceType"] == "Bundle")
            })
            .times(1)
            .returning(|_| {
                Ok(RawResponse::json(
                    200,
                    &json!({"x12_output": "ISA*278~", "conversion_type": "278"}),
                ))
            });
        backend
            .expect_call()
            .withf(|req| {
                req.path() == VALIDATE
                    && matches!(&req.body, RequestBody::Json(b) if b["transaction_type"] == "278")
            })
            .times(1)
            .returning(|_| Ok(passed()));

        let d = dispatcher(backend, CallerAttestation::Deny);
        let envelope = d
            .invoke(
                "convert_fhir_to_x12",
                json!({"fhir_bundle": "{\"resourceType\": \"Bundle\"}"}),
            )
            .await;
        assert_eq!(envelope.status, Status::Approved);
    }

    #[tokio::test]
    async fn test_attestation_skips_gate1_only_when_allowed() {
        // Allowed: no validation call at all.
        let mut backend = MockBackend::new();
        expect_path(&mut backend, VALIDATE, 0, passed());
        expect_path(
            &mut backend,
            "/api/v2/hipaa-to-rmap/convert",
            1,
            RawResponse::json(200, &json!({"rmap_content": "HDR|1"})),
        );
        let d = dispatcher(backend, CallerAttestation::Allow);
        let (_, result) = d
            .execute(
                "convert_x12_to_rmap",
                json!({"x12_content": "ISA*~", "pre_validated": true}),
            )
            .await;
        assert!(result.is_success());

        // Denied: the claim is ignored and the gate runs.
        let mut backend = MockBackend::new();
        expect_path(&mut backend, VALIDATE, 1, failed("ST: bad control number"));
        expect_path(&mut backend, "/api/v2/hipaa-to-rmap/convert", 0, passed());
        let d = dispatcher(backend, CallerAttestation::Deny);
        let (_, result) = d
            .execute(
                "convert_x12_to_rmap",
                json!({"x12_content": "ISA*~", "pre_validated": true}),
            )
            .await;
        assert!(matches!(result, ToolResult::GateBlocked { .. }));
    }

    #[tokio::test]
    async fn test_claim_pdf_gate_uses_claim_type() {
        let mut backend = MockBackend::new();
        backend
            .expect_call()
            .withf(|req| {
                req.path() == VALIDATE
                    && matches!(&req.body, RequestBody::Json(b) if b["transaction_type"] == "837p")
            })
            .times(1)
            .returning(|_| Ok(passed()));
        backend
            .expect_call()
            .withf(|req| {
                req.path() == "/api/v2/claims-to-pdf/convert"
                    && req.query.is_empty()
                    && matches!(&req.body, RequestBody::Form { upload: Some(u), .. } if u.file_name == "claim.x12")
            })
            .times(1)
            .returning(|_| {
                Ok(RawResponse::json(
                    200,
                    &json!({"form_name": "CMS-1500", "pdf_files": [{"filename": "c1.pdf"}]}),
                ))
            });

        let d = dispatcher(backend, CallerAttestation::Deny);
        let (_, result) = d
            .execute("generate_claim_pdf", json!({"x12_837_content": "ISA*~"}))
            .await;
        let ToolOutput::Binary(artifact) = result.as_success().unwrap().payload() else {
            panic!("expected binary artifact");
        };
        assert_eq!(artifact.file_count, 1);
    }

    #[tokio::test]
    async fn test_primary_timeout_skips_post_gate() {
        let mut backend = MockBackend::new();
        backend
            .expect_call()
            .withf(|req| req.path() == "/api/v2/rmap-to-hipaa/convert")
            .times(1)
            .returning(|_| Err(Error::timeout()));
        expect_path(&mut backend, VALIDATE, 0, passed());

        let d = dispatcher(backend, CallerAttestation::Deny);
        let (_, result) = d
            .execute("convert_rmap_to_x12", json!({"rmap_content": "HDR|1"}))
            .await;
        assert_eq!(
            result,
            ToolResult::TransportError {
                cause: TransportFault::Timeout
            }
        );
    }

    #[tokio::test]
    async fn test_list_supported_formats_tolerates_missing_sources() {
        let mut backend = MockBackend::new();
        backend.expect_call().times(4).returning(|req| {
            if req.path().contains("database-to-hipaa") {
                Err(Error::backend(404, "not found"))
            } else {
                Ok(RawResponse::json(200, &json!({"transactions": ["837p", "835"]})))
            }
        });

        let d = dispatcher(backend, CallerAttestation::Deny);
        let envelope = d.invoke("list_supported_formats", json!({})).await;
        assert_eq!(envelope.status, Status::Approved);
        let ToolOutput::Capabilities(caps) = envelope.result.as_success().unwrap().payload() else {
            panic!("expected capabilities");
        };
        assert_eq!(caps.sources.len(), 3);
        assert_eq!(caps.unavailable_sources, vec!["database_to_hipaa".to_string()]);
        assert_eq!(caps.conversion_paths.len(), 9);
        assert!(caps.compliance_gates.contains_key("gate5_output_validation"));
    }

    #[tokio::test]
    async fn test_list_supported_formats_ignores_arguments() {
        let mut backend = MockBackend::new();
        backend
            .expect_call()
            .withf(|req| req.path() != VALIDATE)
            .times(8)
            .returning(|_| Ok(RawResponse::json(200, &json!({"transactions": ["837p"]}))));

        let d = dispatcher(backend, CallerAttestation::Deny);
        for args in [json!({"verbose": true, "x12_content": 7}), json!("everything")] {
            let envelope = d.invoke("list_supported_formats", args).await;
            assert_eq!(envelope.status, Status::Approved);
            assert!(matches!(
                envelope.result.as_success().map(|s| s.payload()),
                Some(ToolOutput::Capabilities(_))
            ));
        }
    }

    #[test]
    fn test_fhir_transaction_mapping() {
        assert_eq!(fhir_transaction_type("837P"), "837-professional");
        assert_eq!(fhir_transaction_type("278"), "278-request");
        assert_eq!(fhir_transaction_type("835-remittance"), "835-remittance");
        assert_eq!(fhir_transaction_type("999"), "999");
    }

    #[derive(Debug)]
    struct StallingBackend;

    #[async_trait]
    impl Backend for StallingBackend {
        async fn call(&self, _request: BackendRequest) -> Result<RawResponse> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(RawResponse::json(200, &json!({})))
        }
    }

    #[tokio::test]
    async fn test_cancellation_returns_promptly() {
        let d = Dispatcher::new(Arc::new(StallingBackend), CallerAttestation::Deny);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let envelope = d
            .invoke_with_cancel("convert_hl7_to_fhir", json!({"hl7_content": "MSH|^~\\&|"}), cancel)
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(envelope.tool, Some(ToolName::ConvertHl7ToFhir));
        assert_eq!(
            envelope.result,
            ToolResult::TransportError {
                cause: TransportFault::Cancelled
            }
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn test_transitions_are_logged() {
        let mut backend = MockBackend::new();
        expect_path(&mut backend, VALIDATE, 1, failed("NM1: Missing mandatory segment"));

        let d = dispatcher(backend, CallerAttestation::Deny);
        d.invoke("convert_x12_to_database", json!({"x12_content": "ISA*~"}))
            .await;
        assert!(logs_contain("state=received"));
        assert!(logs_contain("state=gate_checking"));
        assert!(logs_contain("state=blocked"));
        assert!(!logs_contain("state=dispatching"));
    }
}
