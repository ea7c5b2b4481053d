//! Response normalization: raw backend bodies into typed [`ToolResult`]s.
//!
//! The engine's routes answer with loosely shaped JSON that differs per route
//! (and sometimes per engine version). Each output kind has one extractor that
//! knows the accepted field spellings. A 2xx body that does not yield a usable
//! result becomes [`ToolResult::BackendError`], never a success.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::backend::{RawResponse, ResponseBody};
use crate::envelope::{
    BinaryArtifact, CapabilityList, Document, DocumentContent, DocumentFormat, InlineBinary,
    Severity, Success, TableRows, ToolOutput, ToolResult, ValidationIssue, ValidationReport,
};
use crate::tools::OutputKind;

/// Code used when an error line carries no recognizable code.
pub const UNSPECIFIED_CODE: &str = "UNSPECIFIED";

// =============================================================================
// Validation reports
// =============================================================================

/// Parse the validation route's JSON into a report.
pub fn parse_report(body: &Value) -> ValidationReport {
    let errors_obj = body.get("errors").and_then(Value::as_object);
    let flag = |key: &str| {
        errors_obj
            .and_then(|o| o.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };
    let count = |key: &str| errors_obj.and_then(|o| o.get(key)).and_then(Value::as_u64);

    let validation_status = str_field(body, "validation_status")
        .unwrap_or("UNKNOWN")
        .to_ascii_uppercase();
    let failed = validation_status == "FAILED" || flag("has_errors");

    let lines = errors_obj
        .and_then(|o| o.get("error_lines"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    if failed {
        errors = lines.iter().map(|l| parse_issue(l, false)).collect();
    } else if flag("has_warnings") || validation_status == "WARNING" {
        warnings = lines.iter().map(|l| parse_issue(l, true)).collect();
    }
    if let Some(extra) = errors_obj
        .and_then(|o| o.get("warning_lines"))
        .and_then(Value::as_array)
    {
        warnings.extend(extra.iter().map(|l| parse_issue(l, true)));
    }

    let error_description = str_field(body, "error_code_description").map(str::to_string);

    // A failed verdict with no itemized lines still has to block.
    if failed && errors.is_empty() {
        errors.push(ValidationIssue::error(
            UNSPECIFIED_CODE,
            error_description
                .clone()
                .unwrap_or_else(|| "Validation failed without itemized errors".to_string()),
        ));
    }

    let error_count = count("error_count")
        .unwrap_or(0)
        .max(errors.len() as u64);
    let warning_count = count("warning_count")
        .unwrap_or(0)
        .max(warnings.len() as u64);

    ValidationReport {
        validation_status,
        transaction_type: str_field(body, "transaction_type").map(str::to_string),
        transaction_name: str_field(body, "transaction_name").map(str::to_string),
        error_count,
        warning_count,
        errors,
        warnings,
        error_description,
        validation_levels: non_null(body, "validation_levels"),
        ta1: non_null(body, "ta1"),
        ack999: non_null(body, "ack999"),
        balance_report: non_null(body, "balance_report"),
    }
}

/// One error line, either a structured object or a free-text line.
pub fn parse_issue(line: &Value, warning: bool) -> ValidationIssue {
    let issue = match line {
        Value::Object(obj) => {
            let code = first_text(obj, &["code", "error_code", "segment_id", "segment"])
                .unwrap_or_else(|| UNSPECIFIED_CODE.to_string());
            let message = first_text(obj, &["message", "description", "error", "text"])
                .unwrap_or_else(|| line.to_string());
            let issue = ValidationIssue::error(code, message);
            match first_text(obj, &["location", "segment_position", "line", "loop"]) {
                Some(loc) => issue.at(loc),
                None => issue,
            }
        }
        Value::String(text) => parse_text_line(text),
        other => ValidationIssue::error(UNSPECIFIED_CODE, other.to_string()),
    };
    if warning {
        ValidationIssue {
            severity: Severity::Warning,
            ..issue
        }
    } else {
        issue
    }
}

/// `Line 12: NM1 - missing mandatory element` style lines.
fn parse_text_line(text: &str) -> ValidationIssue {
    let trimmed = text.trim();
    let (location, rest) = split_line_prefix(trimmed);

    let code = rest
        .split_whitespace()
        .find(|tok| tok.ends_with(':') && looks_like_code(tok.trim_end_matches(':')))
        .or_else(|| rest.split_whitespace().find(|tok| looks_like_code(tok)))
        .map(|tok| tok.trim_end_matches(|c: char| !c.is_ascii_alphanumeric()).to_string())
        .unwrap_or_else(|| UNSPECIFIED_CODE.to_string());

    let issue = ValidationIssue::error(code, rest.to_string());
    match location {
        Some(loc) => issue.at(loc),
        None => issue,
    }
}

fn split_line_prefix(text: &str) -> (Option<String>, &str) {
    let lower = text.to_ascii_lowercase();
    for prefix in ["line ", "segment "] {
        if lower.starts_with(prefix) {
            if let Some((head, tail)) = text.split_once(':') {
                let number = head[prefix.len()..].trim();
                if !number.is_empty() && number.chars().all(|c| c.is_ascii_digit()) {
                    return (Some(head.trim().to_ascii_lowercase()), tail.trim());
                }
            }
        }
    }
    (None, text)
}

/// Segment ids and engine codes: uppercase, starts with a letter, 2-32 chars.
fn looks_like_code(token: &str) -> bool {
    let token = token.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
    let starts_alpha = token.chars().next().is_some_and(|c| c.is_ascii_uppercase());
    starts_alpha
        && (2..=32).contains(&token.len())
        && token
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

// =============================================================================
// Wrapping
// =============================================================================

/// Interpret a primary-route response according to the tool's output kind.
pub fn wrap(output_kind: OutputKind, raw: &RawResponse) -> ToolResult {
    if !raw.is_success() {
        return backend_error(raw.status, String::from_utf8_lossy(&raw.body).to_string());
    }
    let body = match raw.decode() {
        Ok(body) => body,
        Err(err) => return err.into(),
    };
    if let ResponseBody::Json(json) = &body {
        if json.get("success").and_then(Value::as_bool) == Some(false) {
            let message = first_text_value(json, &["error", "detail", "message"])
                .unwrap_or_else(|| "engine reported success=false".to_string());
            return backend_error(raw.status, message);
        }
    }

    let extracted = match output_kind {
        OutputKind::ValidationReport => return wrap_report(raw.status, &body),
        OutputKind::FhirBundle => fhir_document(&body),
        OutputKind::RMapDoc => rmap_document(&body),
        OutputKind::X12 => x12_document(&body),
        OutputKind::TableRows => table_rows(&body),
        OutputKind::BinaryArtifact => binary_artifact(&body),
        OutputKind::CapabilityList => capability_passthrough(&body),
    };

    match extracted {
        Ok(payload) => ToolResult::Success(Success::new(output_kind, payload, warnings_of(&body))),
        Err(reason) => backend_error(raw.status, reason),
    }
}

/// Validation responses: conformant reports succeed, others fail validation.
fn wrap_report(status: u16, body: &ResponseBody) -> ToolResult {
    let ResponseBody::Json(json) = body else {
        return backend_error(status, "validation route did not return JSON".to_string());
    };
    if !json.is_object() {
        return backend_error(status, "validation route returned a non-object body".to_string());
    }
    let report = parse_report(json);
    if report.is_conformant() {
        let warnings = report.warnings.clone();
        ToolResult::Success(Success::new(
            OutputKind::ValidationReport,
            ToolOutput::Report(report),
            warnings,
        ))
    } else {
        ToolResult::ValidationFailure {
            gate: None,
            errors: report.errors.clone(),
            report: Some(report),
            artifact: None,
        }
    }
}

/// Capability manifest from the sources that answered.
pub fn capabilities(
    sources: Map<String, Value>,
    unavailable_sources: Vec<String>,
    conversion_paths: Vec<String>,
    compliance_gates: Map<String, Value>,
) -> ToolResult {
    let list = CapabilityList {
        sources,
        unavailable_sources,
        conversion_paths,
        compliance_gates,
    };
    ToolResult::Success(Success::new(
        OutputKind::CapabilityList,
        ToolOutput::Capabilities(list),
        Vec::new(),
    ))
}

type Extracted = std::result::Result<ToolOutput, String>;

fn fhir_document(body: &ResponseBody) -> Extracted {
    let json = expect_json(body, "FHIR")?;
    let bundle = ["fhir_bundle", "fhir_output"]
        .iter()
        .find_map(|k| json.get(*k).filter(|v| !v.is_null()))
        .cloned()
        .unwrap_or_else(|| json.clone());
    let bundle = match bundle {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    };
    if bundle.as_object().is_some_and(Map::is_empty) {
        return Err("engine returned an empty FHIR bundle".to_string());
    }

    let mut details = Map::new();
    copy_fields(json, &mut details, &["message_type", "processing_time_ms"]);
    let resource_count = json
        .get("resource_count")
        .and_then(Value::as_u64)
        .or_else(|| {
            bundle
                .get("entry")
                .and_then(Value::as_array)
                .map(|e| e.len() as u64)
        });
    if let Some(n) = resource_count {
        details.insert("resource_count".into(), Value::from(n));
    }

    Ok(ToolOutput::Document(Document {
        format: DocumentFormat::FhirBundle,
        content: DocumentContent::Json(bundle),
        transaction_type: str_field(json, "transaction_type").map(str::to_string),
        metadata: non_null(json, "metadata"),
        details,
    }))
}

fn rmap_document(body: &ResponseBody) -> Extracted {
    let (text, json) = match body {
        ResponseBody::Text(text) => (text.clone(), None),
        ResponseBody::Json(json) => {
            let text = ["rmap_content", "rmap_output"]
                .iter()
                .find_map(|k| str_field(json, k))
                .unwrap_or_default()
                .to_string();
            (text, Some(json))
        }
        ResponseBody::Binary { .. } => return Err("engine returned binary RMap content".into()),
    };
    if text.trim().is_empty() {
        return Err("engine returned empty RMap content".to_string());
    }

    let mut details = Map::new();
    if let Some(json) = json {
        if let Some(parsed) = json.get("rmap_parsed").filter(|v| !v.is_null()) {
            if let Some(n) = parsed.get("record_count") {
                details.insert("record_count".into(), n.clone());
            }
        }
    }

    Ok(ToolOutput::Document(Document {
        format: DocumentFormat::RMap,
        content: DocumentContent::Text(text),
        transaction_type: json
            .and_then(|j| str_field(j, "transaction_type"))
            .map(str::to_string),
        metadata: json.and_then(|j| non_null(j, "metadata")),
        details,
    }))
}

fn x12_document(body: &ResponseBody) -> Extracted {
    let (text, json) = match body {
        ResponseBody::Text(text) => (text.clone(), None),
        ResponseBody::Json(json) => (x12_text_of(json).unwrap_or_default(), Some(json)),
        ResponseBody::Binary { .. } => return Err("engine returned binary X12 content".into()),
    };
    if text.trim().is_empty() {
        return Err("engine returned empty X12 content".to_string());
    }

    let mut details = Map::new();
    if let Some(json) = json {
        copy_fields(json, &mut details, &["conversion_type"]);
    }

    Ok(ToolOutput::Document(Document {
        format: DocumentFormat::X12,
        content: DocumentContent::Text(text),
        transaction_type: json
            .and_then(|j| str_field(j, "transaction_type"))
            .map(str::to_string),
        metadata: json.and_then(|j| non_null(j, "metadata")),
        details,
    }))
}

/// Field spellings used by the X12-producing routes.
fn x12_text_of(json: &Value) -> Option<String> {
    ["x12_content", "hipaa_content", "x12_output"]
        .iter()
        .find_map(|k| str_field(json, k))
        .or_else(|| {
            json.get("stage2_rmap_to_hipaa")
                .and_then(|s| str_field(s, "hipaa_content"))
        })
        .map(str::to_string)
}

fn table_rows(body: &ResponseBody) -> Extracted {
    let json = expect_json(body, "database load")?;
    let session_id = str_field(json, "session_id")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "engine response is missing session_id".to_string())?;
    let stage2 = json.get("stage2").cloned().unwrap_or(Value::Null);
    let num = |key: &str| stage2.get(key).and_then(Value::as_u64).unwrap_or(0);

    Ok(ToolOutput::Tabular(TableRows {
        session_id: session_id.to_string(),
        transaction_type: str_field(json, "transaction_type").map(str::to_string),
        tables_created: num("tables_created"),
        tables_with_data: num("tables_with_data"),
        total_rows: num("total_rows"),
        table_counts: stage2
            .get("table_counts")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    }))
}

fn binary_artifact(body: &ResponseBody) -> Extracted {
    match body {
        ResponseBody::Binary {
            content_type,
            bytes,
        } => Ok(ToolOutput::Binary(BinaryArtifact {
            file_count: 1,
            inline: Some(InlineBinary {
                content_type: content_type.clone(),
                size_bytes: bytes.len(),
                data_base64: STANDARD.encode(bytes),
            }),
            ..Default::default()
        })),
        ResponseBody::Json(json) => {
            let files = json
                .get("pdf_files")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let zip_download_url = str_field(json, "zip_download_url").map(str::to_string);
            if files.is_empty() && zip_download_url.is_none() {
                return Err("engine returned no PDF files".to_string());
            }
            let file_count = json
                .get("pdf_count")
                .and_then(Value::as_u64)
                .map_or(files.len(), |n| n as usize);
            Ok(ToolOutput::Binary(BinaryArtifact {
                form_name: str_field(json, "form_name").map(str::to_string),
                claim_type: str_field(json, "claim_type").map(str::to_string),
                file_count,
                files,
                zip_download_url,
                conversion_id: json
                    .get("conversion_id")
                    .filter(|v| !v.is_null())
                    .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string)),
                inline: None,
            }))
        }
        ResponseBody::Text(_) => Err("engine returned text where a PDF artifact was expected".into()),
    }
}

fn capability_passthrough(body: &ResponseBody) -> Extracted {
    let json = expect_json(body, "capability")?;
    let mut sources = Map::new();
    sources.insert("engine".to_string(), json.clone());
    Ok(ToolOutput::Capabilities(CapabilityList {
        sources,
        ..Default::default()
    }))
}

/// Non-blocking notes the engine attached to a successful conversion.
fn warnings_of(body: &ResponseBody) -> Vec<ValidationIssue> {
    let ResponseBody::Json(json) = body else {
        return Vec::new();
    };
    json.get("warnings")
        .and_then(Value::as_array)
        .map(|lines| lines.iter().map(|l| parse_issue(l, true)).collect())
        .unwrap_or_default()
}

// =============================================================================
// Helpers
// =============================================================================

fn backend_error(http_status: u16, message: String) -> ToolResult {
    ToolResult::BackendError {
        http_status,
        message,
    }
}

fn expect_json<'a>(body: &'a ResponseBody, what: &str) -> std::result::Result<&'a Value, String> {
    match body {
        ResponseBody::Json(json) if json.is_object() => Ok(json),
        ResponseBody::Json(_) => Err(format!("{} route returned a non-object body", what)),
        _ => Err(format!("{} route did not return JSON", what)),
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn non_null(value: &Value, key: &str) -> Option<Value> {
    value.get(key).filter(|v| !v.is_null()).cloned()
}

fn copy_fields(from: &Value, into: &mut Map<String, Value>, keys: &[&str]) {
    for key in keys {
        if let Some(v) = from.get(*key).filter(|v| !v.is_null()) {
            into.insert((*key).to_string(), v.clone());
        }
    }
}

fn first_text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_text_value(value: &Value, keys: &[&str]) -> Option<String> {
    value.as_object().and_then(|obj| first_text(obj, keys))
}

// =============================================================================
// Tests
// =============================================================================
