//! Stdio JSON-RPC server: read loop, per-call tasks, single writer.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dispatch::Dispatcher;
use crate::mcp::codec::{
    error_response, read_frame, response, write_message, Frame, RpcRequest, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::types::TransportConfig;

/// Protocol revision reported when the client does not name one.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

const SERVER_INSTRUCTIONS: &str = "Healthcare data conversion and compliance tools. Converts between HIPAA X12, FHIR R4, HL7 v2, RMap, database, and PDF claim forms, with validation gates that may BLOCK unsafe conversions.";

type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// MCP server over any line-oriented byte stream (stdin/stdout in production).
#[derive(Debug, Clone)]
pub struct McpServer {
    dispatcher: Dispatcher,
    config: TransportConfig,
}

impl McpServer {
    pub fn new(dispatcher: Dispatcher, config: TransportConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Serve stdin/stdout until stdin closes.
    pub async fn serve_stdio(&self) -> std::io::Result<()> {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        self.serve(stdin, tokio::io::stdout()).await
    }

    /// Serve until `reader` reaches EOF and every in-flight call has answered.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Value>(self.config.outbound_channel_capacity);
        let writer_task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                write_message(&mut writer, &message).await?;
            }
            Ok::<(), std::io::Error>(())
        });

        let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
        let mut calls = JoinSet::new();
        tracing::info!(
            "mcp_server_started: tools={}, max_message_bytes={}",
            self.dispatcher.registry().len(),
            self.config.max_message_bytes
        );

        while let Some(frame) = read_frame(&mut reader, self.config.max_message_bytes).await? {
            let line = match frame {
                Frame::Line(line) => line,
                Frame::Oversized(size) => {
                    tracing::warn!("mcp_message_rejected: bytes={}, reason=oversized", size);
                    let msg = format!(
                        "message of {} bytes exceeds limit of {}",
                        size, self.config.max_message_bytes
                    );
                    send(&tx, error_response(Value::Null, INVALID_REQUEST, msg)).await;
                    continue;
                }
            };

            let request: RpcRequest = match serde_json::from_slice(&line) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!("mcp_message_rejected: reason=parse_error, error={}", e);
                    send(&tx, error_response(Value::Null, PARSE_ERROR, format!("Parse error: {}", e))).await;
                    continue;
                }
            };

            if request.method == "tools/call" {
                if let Some(id) = request.id.clone() {
                    self.spawn_call(&mut calls, &tx, &in_flight, id, request.params).await;
                    continue;
                }
            }
            if let Some(reply) = self.handle(request, &in_flight).await {
                send(&tx, reply).await;
            }
        }

        tracing::info!("mcp_input_closed: in_flight={}", calls.len());
        while calls.join_next().await.is_some() {}
        drop(tx);
        match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
        }
    }

    /// Requests answered inline. Returns `None` for notifications.
    async fn handle(&self, request: RpcRequest, in_flight: &InFlight) -> Option<Value> {
        tracing::debug!("mcp_request: method={}", request.method);
        match request.method.as_str() {
            "notifications/cancelled" => {
                if let Some(key) = request.params.get("requestId").map(request_key) {
                    if let Some(token) = in_flight.lock().await.get(&key) {
                        tracing::info!("mcp_call_cancel_requested: id={}", key);
                        token.cancel();
                    }
                }
                None
            }
            _ if request.is_notification() => None,
            method => {
                let id = request.id.unwrap_or(Value::Null);
                Some(match method {
                    "initialize" => {
                        let version = request
                            .params
                            .get("protocolVersion")
                            .and_then(Value::as_str)
                            .unwrap_or(PROTOCOL_VERSION);
                        response(
                            id,
                            json!({
                                "protocolVersion": version,
                                "capabilities": {"tools": {"listChanged": false}},
                                "serverInfo": {
                                    "name": env!("CARGO_PKG_NAME"),
                                    "version": env!("CARGO_PKG_VERSION"),
                                },
                                "instructions": SERVER_INSTRUCTIONS,
                            }),
                        )
                    }
                    "ping" => response(id, json!({})),
                    "tools/list" => {
                        let tools: Vec<Value> = self
                            .dispatcher
                            .registry()
                            .list_entries()
                            .iter()
                            .map(|def| def.to_listing())
                            .collect();
                        response(id, json!({ "tools": tools }))
                    }
                    other => error_response(id, METHOD_NOT_FOUND, format!("Method not found: {}", other)),
                })
            }
        }
    }

    /// Start a `tools/call`. Its cancel token is registered before this
    /// returns, so a cancel on the next line always finds it.
    async fn spawn_call(
        &self,
        calls: &mut JoinSet<()>,
        tx: &mpsc::Sender<Value>,
        in_flight: &InFlight,
        id: Value,
        params: Value,
    ) {
        let Some(name) = params.get("name").and_then(Value::as_str).map(str::to_string) else {
            let tx = tx.clone();
            calls.spawn(async move {
                send(&tx, error_response(id, INVALID_PARAMS, "tools/call requires a tool name")).await;
            });
            return;
        };
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let key = request_key(&id);
        let cancel = CancellationToken::new();
        in_flight.lock().await.insert(key.clone(), cancel.clone());

        let dispatcher = self.dispatcher.clone();
        let tx = tx.clone();
        let in_flight = in_flight.clone();
        calls.spawn(async move {
            let envelope = dispatcher.invoke_with_cancel(&name, arguments, cancel).await;
            in_flight.lock().await.remove(&key);

            let reply = match serde_json::to_value(&envelope) {
                Ok(structured) => {
                    let text = serde_json::to_string_pretty(&structured).unwrap_or_default();
                    response(
                        id,
                        json!({
                            "content": [{"type": "text", "text": text}],
                            "structuredContent": structured,
                            "isError": !envelope.status.is_success(),
                        }),
                    )
                }
                Err(e) => error_response(id, INTERNAL_ERROR, format!("failed to encode result: {}", e)),
            };
            send(&tx, reply).await;
        });
    }
}

fn request_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn send(tx: &mpsc::Sender<Value>, message: Value) {
    if tx.send(message).await.is_err() {
        tracing::warn!("mcp_writer_closed: response dropped");
    }
}
