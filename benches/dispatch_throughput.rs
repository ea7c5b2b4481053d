//! Dispatch throughput benchmark.
//!
//! Measures registry lookup, response normalization and a full gated
//! dispatch against an in-memory engine using Criterion.

use std::sync::Arc;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use redix_gate::backend::{Backend, BackendRequest, RawResponse};
use redix_gate::normalize::{parse_report, wrap};
use redix_gate::tools::{OutputKind, ToolRegistry, VALIDATE_ENDPOINT};
use redix_gate::types::CallerAttestation;
use redix_gate::Dispatcher;
use serde_json::{json, Value};

/// Engine stub: validation passes, conversions return a small bundle.
struct StaticEngine;

#[async_trait]
impl Backend for StaticEngine {
    async fn call(&self, request: BackendRequest) -> redix_gate::Result<RawResponse> {
        if request.path() == VALIDATE_ENDPOINT.path {
            return Ok(RawResponse::json(200, &json!({"validation_status": "PASSED"})));
        }
        Ok(RawResponse::json(200, &bundle_response(4)))
    }
}

fn bundle_response(entries: usize) -> Value {
    let entry: Vec<Value> = (0..entries)
        .map(|i| json!({"resource": {"resourceType": "Claim", "id": format!("claim-{}", i)}}))
        .collect();
    json!({
        "success": true,
        "transaction_type": "837P",
        "fhir_bundle": {"resourceType": "Bundle", "type": "collection", "entry": entry}
    })
}

fn bench_registry_lookup(c: &mut Criterion) {
    let registry = ToolRegistry::global();
    c.bench_function("registry_lookup", |b| {
        b.iter(|| registry.lookup(black_box("generate_claim_pdf")).unwrap())
    });
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize_fhir");
    for &entries in &[1usize, 16, 256] {
        let raw = RawResponse::json(200, &bundle_response(entries));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &raw, |b, r| {
            b.iter(|| wrap(OutputKind::FhirBundle, black_box(r)))
        });
    }
    group.finish();

    let lines: Vec<String> = (0..200)
        .map(|i| format!("Line {}: NM1: Missing required element NM10{}", i, i % 9))
        .collect();
    let report = json!({
        "validation_status": "FAILED",
        "errors": {"has_errors": true, "error_count": lines.len(), "error_lines": lines}
    });
    c.bench_function("parse_report_200_lines", |b| {
        b.iter(|| parse_report(black_box(&report)))
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dispatcher = Dispatcher::new(Arc::new(StaticEngine), CallerAttestation::Deny);
    let args = json!({"x12_content": "ISA*00*~GS*HC~ST*837*0001~SE*2*0001~GE*1*1~IEA*1*1~", "transaction_type": "837p"});

    c.bench_function("dispatch_gated_x12_to_fhir", |b| {
        b.iter(|| {
            rt.block_on(dispatcher.invoke("convert_x12_to_fhir", black_box(args.clone())))
        })
    });
}

criterion_group!(benches, bench_registry_lookup, bench_normalize, bench_dispatch);
criterion_main!(benches);
