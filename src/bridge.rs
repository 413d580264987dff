//! Tool-call bridge: the child process the CLI spawns to speak the CLI's
//! native tool-server stdio protocol while relaying every invocation back to
//! the parent over the length-prefixed Unix-socket wire protocol.
//!
//! This module implements the bridge's logic; [`crate::bin::bridge`] (built
//! as the `claude-code-bridge` binary) is the thin entry point that parses
//! argv and drives [`run`] under `stdio_server`-equivalent JSON-RPC framing
//! on stdin/stdout.

use crate::codec;
use crate::error::{Error, IpcErrorKind, Result};
use crate::types::{ToolCallParams, ToolCallRequest, ToolSchema, WireResponse};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

/// Read and parse the schema file the session manager wrote before spawning
/// the CLI.
pub fn load_schemas(schema_path: &Path) -> Result<Vec<ToolSchema>> {
    let text = std::fs::read_to_string(schema_path)?;
    serde_json::from_str(&text).map_err(Error::from)
}

/// A lazily-connecting client for the parent's tool-call socket. The
/// connection is opened on the first call and reused for the bridge's
/// lifetime.
pub struct IpcClient {
    socket_path: std::path::PathBuf,
    stream: Option<UnixStream>,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            stream: None,
        }
    }

    async fn ensure_connected(&mut self) -> Result<&mut UnixStream> {
        if self.stream.is_none() {
            let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
                Error::ipc(
                    IpcErrorKind::Connection,
                    format!("connect to {:?}: {e}", self.socket_path),
                )
            })?;
            self.stream = Some(stream);
        }
        Ok(self.stream.as_mut().expect("just connected"))
    }

    /// Relay one tool invocation to the parent and return its result content
    /// as a flat list of text strings.
    pub async fn call_tool(&mut self, name: &str, arguments: serde_json::Value) -> Result<Vec<String>> {
        let request = ToolCallRequest {
            method: "call_tool".to_string(),
            params: ToolCallParams {
                name: name.to_string(),
                arguments,
            },
        };

        let stream = self.ensure_connected().await?;
        codec::send_message(stream, &request).await?;
        let response: WireResponse = codec::receive_message(stream).await?;

        match response {
            WireResponse::Success(success) => Ok(success
                .result
                .content
                .into_iter()
                .map(|item| item.text)
                .collect()),
            WireResponse::Error(err) => Err(Error::ipc(
                IpcErrorKind::ToolExecution,
                format!("{} (type: {})", err.error.message, err.error.error_type),
            )),
        }
    }

    /// Close the connection. Safe to call whether or not a connection was
    /// ever opened.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

/// One line of the CLI's native tool-server stdio protocol.
#[derive(Debug, serde::Deserialize)]
struct StdioRequest {
    id: serde_json::Value,
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Debug, serde::Serialize)]
struct StdioResponse {
    id: serde_json::Value,
    result: serde_json::Value,
}

/// Drive the bridge: answer `tools/list` from the in-memory schema list and
/// relay `tools/call` over `client`, reading JSON-RPC lines from `stdin` and
/// writing responses to `stdout` until EOF.
pub async fn run<R, W>(schemas: Vec<ToolSchema>, client: &mut IpcClient, stdin: R, mut stdout: W) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(stdin).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: StdioRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(_) => continue,
        };

        let result = match request.method.as_str() {
            "tools/list" => serde_json::json!({ "tools": schemas }),
            "tools/call" => {
                let name = request
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let arguments = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({}));

                match client.call_tool(name, arguments).await {
                    Ok(texts) => serde_json::json!({
                        "content": texts.into_iter().map(|t| serde_json::json!({"type": "text", "text": t})).collect::<Vec<_>>()
                    }),
                    Err(e) => serde_json::json!({
                        "content": [{"type": "text", "text": e.to_string()}],
                        "isError": true,
                    }),
                }
            }
            _ => continue,
        };

        let response = StdioResponse {
            id: request.id,
            result,
        };
        let encoded = serde_json::to_string(&response)?;
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    client.close().await;
    Ok(())
}
