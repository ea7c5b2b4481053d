//! Backend boundary: outbound calls to the AnyToAny conversion engine.
//!
//! The [`Backend`] trait is the seam between dispatch logic and HTTP. The
//! production implementation is [`HttpBackend`]; tests substitute a mock.
//! Implementations are stateless per call and safe to share across tasks.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::tools::Endpoint;
use crate::types::{Error, Result};

mod http;

pub use http::HttpBackend;

/// In-memory file upload for multipart routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub content: String,
    pub mime: &'static str,
}

impl Upload {
    pub fn text(file_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
            mime: "text/plain",
        }
    }
}

/// Request body as the route expects it.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Form {
        upload: Option<Upload>,
        fields: Vec<(String, String)>,
    },
    Empty,
}

/// One outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRequest {
    pub endpoint: Endpoint,
    /// Per-call query parameters, sent after the route's fixed ones.
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl BackendRequest {
    pub fn new(endpoint: Endpoint, body: RequestBody) -> Self {
        Self {
            endpoint,
            query: Vec::new(),
            body,
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn path(&self) -> &'static str {
        self.endpoint.path
    }
}

/// A 2xx response, body not yet interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Binary { content_type: String, bytes: Bytes },
}

impl RawResponse {
    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".to_string()),
            body: Bytes::from(value.to_string()),
        }
    }

    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some("text/plain".to_string()),
            body: Bytes::from(text.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Interpret the body by content type. JSON that fails to parse is a
    /// backend error, not a success.
    pub fn decode(&self) -> Result<ResponseBody> {
        let content_type = self
            .content_type
            .as_deref()
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.contains("json") {
            return serde_json::from_slice(&self.body)
                .map(ResponseBody::Json)
                .map_err(|e| Error::backend(self.status, format!("malformed JSON body: {}", e)));
        }

        let textual = content_type.is_empty()
            || content_type.starts_with("text/")
            || content_type.contains("xml")
            || content_type.contains("edi");
        if textual {
            if let Ok(text) = std::str::from_utf8(&self.body) {
                return Ok(ResponseBody::Text(text.to_string()));
            }
        }

        Ok(ResponseBody::Binary {
            content_type: if content_type.is_empty() {
                "application/octet-stream".to_string()
            } else {
                content_type
            },
            bytes: self.body.clone(),
        })
    }
}

/// Outbound call to the conversion engine.
///
/// Returns the response only for 2xx statuses. Non-2xx statuses surface as
/// [`Error::Backend`]; timeouts and connection failures as
/// [`Error::Transport`]. Implementations never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Backend: Send + Sync {
    async fn call(&self, request: BackendRequest) -> Result<RawResponse>;
}
