//! reqwest-backed [`Backend`] for the AnyToAny REST API.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};

use super::{Backend, BackendRequest, RawResponse, RequestBody};
use crate::envelope::truncate;
use crate::tools::HttpMethod;
use crate::types::{BackendConfig, Error, Result};

/// HTTP client for the conversion engine. One pooled client per process.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    max_error_detail: usize,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("x-submission-method"),
            HeaderValue::from_static("mcp"),
        );
        if !config.api_key.is_empty() {
            let name = HeaderName::from_bytes(config.auth_header.as_bytes())
                .map_err(|e| Error::config(format!("invalid auth header name: {}", e)))?;
            let mut value = HeaderValue::from_str(&config.api_key)
                .map_err(|e| Error::config(format!("invalid API key: {}", e)))?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_error_detail: config.max_error_detail,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build(&self, request: BackendRequest) -> Result<reqwest::RequestBuilder> {
        let url = format!("{}{}", self.base_url, request.endpoint.path);
        let builder = match request.endpoint.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
        };
        let builder = builder
            .query(request.endpoint.fixed_query)
            .query(&request.query);

        Ok(match request.body {
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Form { upload, fields } => {
                let mut form = Form::new();
                if let Some(upload) = upload {
                    let part = Part::text(upload.content)
                        .file_name(upload.file_name)
                        .mime_str(upload.mime)
                        .map_err(|e| Error::validation(format!("invalid upload type: {}", e)))?;
                    form = form.part("file", part);
                }
                for (key, value) in fields {
                    form = form.text(key, value);
                }
                builder.multipart(form)
            }
            RequestBody::Empty => builder,
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn call(&self, request: BackendRequest) -> Result<RawResponse> {
        let method = request.endpoint.method;
        let path = request.endpoint.path;
        tracing::debug!(?method, path, query = ?request.query, "backend_request");

        let response = self.build(request)?.send().await.map_err(|e| {
            let err = Error::from(e);
            tracing::warn!(path, error = %err, "backend_transport_failed");
            err
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(Error::from)?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            let message = truncate(&text, self.max_error_detail).to_string();
            tracing::warn!(path, status = status.as_u16(), "backend_error_status");
            return Err(Error::backend(status.as_u16(), message));
        }

        tracing::debug!(path, status = status.as_u16(), bytes = body.len(), "backend_response");
        Ok(RawResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }
}
