//! Line codec for the stdio JSON-RPC transport.
//!
//! One JSON-RPC 2.0 message per line, UTF-8, `\n` terminated. Lines longer
//! than the configured limit are drained and reported, never buffered whole.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// One inbound line.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Line(Vec<u8>),
    /// Line exceeded the limit; holds the number of bytes discarded.
    Oversized(usize),
}

/// Inbound JSON-RPC request or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Read the next non-empty line. Returns `None` on clean EOF.
pub async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_bytes: usize,
) -> std::io::Result<Option<Frame>> {
    loop {
        let mut buf = Vec::new();
        let limit = max_bytes as u64 + 1;
        let n = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
        if n == 0 {
            return Ok(None);
        }

        let terminated = buf.last() == Some(&b'\n');
        if !terminated && buf.len() > max_bytes {
            let discarded = buf.len() + drain_line(reader).await?;
            return Ok(Some(Frame::Oversized(discarded)));
        }

        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        if buf.len() > max_bytes {
            return Ok(Some(Frame::Oversized(buf.len())));
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        return Ok(Some(Frame::Line(buf)));
    }
}

/// Skip to the end of the current line.
async fn drain_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<usize> {
    let mut total = 0;
    loop {
        let (consumed, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(total);
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(idx) => (idx + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(consumed);
        total += consumed;
        if done {
            return Ok(total);
        }
    }
}

/// Write one message followed by `\n` and flush.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Value,
) -> std::io::Result<()> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await
}

pub fn response(id: Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

pub fn error_response(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message.into()}})
}
