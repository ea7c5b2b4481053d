//! Dispatcher property tests: gate ordering and call accounting under
//! randomized inputs, plus schema/validator agreement.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use proptest::prelude::*;
use redix_gate::backend::{Backend, BackendRequest, RawResponse};
use redix_gate::envelope::{Status, ToolOutput};
use redix_gate::tools::{validate_params, ToolRegistry, CAPABILITY_SOURCES, VALIDATE_ENDPOINT};
use redix_gate::types::CallerAttestation;
use redix_gate::{Dispatcher, Error, Result, ToolResult};
use serde_json::{json, Value};

/// Records every route called. Validation fails; discovery routes named in
/// `failing` answer 503.
struct CountingBackend {
    calls: Mutex<Vec<&'static str>>,
    failing: Vec<&'static str>,
}

impl CountingBackend {
    fn new(failing: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failing,
        })
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for CountingBackend {
    async fn call(&self, request: BackendRequest) -> Result<RawResponse> {
        let path = request.path();
        self.calls.lock().unwrap().push(path);
        if self.failing.contains(&path) {
            return Err(Error::backend(503, "Service Unavailable"));
        }
        if path == VALIDATE_ENDPOINT.path {
            return Ok(RawResponse::json(
                200,
                &json!({
                    "validation_status": "FAILED",
                    "errors": {"has_errors": true, "error_count": 1, "error_lines": ["ISA: invalid interchange header"]}
                }),
            ));
        }
        Ok(RawResponse::json(200, &json!({"transactions": ["837P"]})))
    }
}

fn run<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

const GATE1_TOOLS: [(&str, &str); 4] = [
    ("convert_x12_to_fhir", "x12_content"),
    ("convert_x12_to_rmap", "x12_content"),
    ("convert_x12_to_database", "x12_content"),
    ("generate_claim_pdf", "x12_837_content"),
];

/// Arbitrary argument objects, including keys no tool declares.
fn any_arguments() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        ".{0,16}".prop_map(Value::from),
        Just(Value::Null),
    ];
    prop::collection::btree_map("[a-z_]{1,12}", leaf, 0..5)
        .prop_map(|map| Value::Object(map.into_iter().collect()))
}

proptest! {
    #[test]
    fn discovery_never_validates(mask in 0u8..16, args in any_arguments()) {
        let failing: Vec<&'static str> = CAPABILITY_SOURCES
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, (_, endpoint))| endpoint.path)
            .collect();
        let backend = CountingBackend::new(failing.clone());
        let dispatcher = Dispatcher::new(backend.clone(), CallerAttestation::Deny);

        let envelope = run(dispatcher.invoke("list_supported_formats", args));

        prop_assert_eq!(envelope.status, Status::Approved);
        match envelope.result.as_success().map(|s| s.payload()) {
            Some(ToolOutput::Capabilities(list)) => {
                prop_assert_eq!(list.unavailable_sources.len(), failing.len());
                prop_assert_eq!(list.sources.len(), CAPABILITY_SOURCES.len() - failing.len());
            }
            other => prop_assert!(false, "expected capability list, got {:?}", other),
        }
        let calls = backend.calls();
        prop_assert_eq!(calls.len(), CAPABILITY_SOURCES.len());
        prop_assert!(!calls.contains(&VALIDATE_ENDPOINT.path));
    }

    #[test]
    fn failed_input_gate_stops_before_conversion(
        (tool, param) in prop::sample::select(GATE1_TOOLS.to_vec()),
        content in "ISA[*A-Z0-9~]{0,40}",
        strict in any::<bool>(),
        pre_validated in any::<bool>(),
    ) {
        let backend = CountingBackend::new(Vec::new());
        // Attestation denied: pre_validated must not matter.
        let dispatcher = Dispatcher::new(backend.clone(), CallerAttestation::Deny);

        let mut args = json!({"strict_mode": strict, "pre_validated": pre_validated});
        args[param] = json!(content);
        let envelope = run(dispatcher.invoke(tool, args));

        let is_gate_block = matches!(envelope.result, ToolResult::GateBlocked { .. });
        prop_assert!(is_gate_block);
        prop_assert_eq!(backend.calls(), vec![VALIDATE_ENDPOINT.path]);
    }

    #[test]
    fn malformed_arguments_make_no_calls(n in any::<i64>()) {
        let backend = CountingBackend::new(Vec::new());
        let dispatcher = Dispatcher::new(backend.clone(), CallerAttestation::Allow);

        let envelope = run(dispatcher.invoke("convert_x12_to_fhir", json!({"x12_content": n})));

        prop_assert_eq!(envelope.status, Status::Error);
        let is_client_error = matches!(envelope.result, ToolResult::ClientError { .. });
        prop_assert!(is_client_error);
        prop_assert!(backend.calls().is_empty());
    }

    #[test]
    fn advertised_schema_agrees_with_validator(
        content in proptest::option::of(".{0,32}"),
        tx in proptest::option::of("[0-9]{3}[a-z]?"),
        strict in proptest::option::of(any::<bool>()),
        extra in any::<bool>(),
    ) {
        let def = ToolRegistry::global().lookup("convert_x12_to_rmap").unwrap();
        let validator = jsonschema::validator_for(&def.input_schema()).unwrap();

        let mut args = json!({});
        if let Some(content) = content {
            args["x12_content"] = json!(content);
        }
        if let Some(tx) = tx {
            args["transaction_type"] = json!(tx);
        }
        if let Some(strict) = strict {
            args["strict_mode"] = json!(strict);
        }
        if extra {
            args["unexpected"] = json!(1);
        }

        prop_assert_eq!(
            validator.is_valid(&args),
            validate_params(&def.params, &args).is_empty()
        );
    }
}

#[test]
fn every_input_schema_is_valid_json_schema() {
    for def in ToolRegistry::global().list_entries() {
        let schema = def.input_schema();
        assert!(
            jsonschema::meta::is_valid(&schema),
            "{} has an invalid schema",
            def.name
        );
        let validator = jsonschema::validator_for(&schema).unwrap();
        let required: Vec<Value> = schema["required"].as_array().cloned().unwrap_or_default();
        assert_eq!(validator.is_valid(&json!({})), required.is_empty(), "{}", def.name);
    }
}
