//! Tool-call server and session manager (parent side).
//!
//! A [`ToolCallServer`] binds a Unix-domain socket and dispatches `call_tool`
//! requests arriving from the bridge subprocess to an in-parent handler map.
//! A [`Session`] owns the socket path, the schema file the bridge reads at
//! startup, and the server's lifetime for one request.

use crate::codec::{self, SOCKET_FILE_PREFIX, SOCKET_FILE_SUFFIX, SOCKET_PERMISSIONS};
use crate::error::{Error, IpcErrorKind, Result};
use crate::types::{ToolCallRequest, ToolResult, ToolSchema, WireError, WireErrorBody, WireResponse, WireSuccess};
use std::collections::HashMap;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

/// Bound on how long `stop` waits for in-flight connection tasks to finish
/// dispatching before giving up on a graceful join.
const CONNECTION_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// An async tool handler: arguments in, an already-enveloped result out.
/// By the time a handler reaches the server, the tool converter
/// ([`crate::tools::Tool::invoke`]) has already applied the
/// return-value-coercion rules, so the server only needs to serialize
/// whatever envelope comes back — it does no coercion of its own.
pub type ToolHandler =
    Arc<dyn Fn(serde_json::Value) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ToolResult>> + Send>> + Send + Sync>;

/// Map from tool name to its handler, shared between the facade and the
/// server's accept loop.
pub type ToolHandlerMap = Arc<HashMap<String, ToolHandler>>;

/// Binds the session socket and dispatches `call_tool` requests.
pub struct ToolCallServer {
    socket_path: PathBuf,
    handlers: ToolHandlerMap,
    listener_task: Option<JoinHandle<()>>,
    connections: Arc<Mutex<JoinSet<()>>>,
}

impl ToolCallServer {
    pub fn new(socket_path: PathBuf, handlers: ToolHandlerMap) -> Self {
        Self {
            socket_path,
            handlers,
            listener_task: None,
            connections: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Bind the socket, chmod it owner-only, and start accepting connections
    /// in the background.
    pub async fn start(&mut self) -> Result<()> {
        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| Error::ipc(IpcErrorKind::Connection, format!("bind {:?}: {e}", self.socket_path)))?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(SOCKET_PERMISSIONS))
            .map_err(|e| Error::ipc(IpcErrorKind::Connection, format!("chmod {:?}: {e}", self.socket_path)))?;

        let handlers = self.handlers.clone();
        let connections = self.connections.clone();
        self.listener_task = Some(tokio::spawn(async move {
            accept_loop(listener, handlers, connections).await;
        }));
        Ok(())
    }

    /// Stop accepting connections, unlink the socket file, and join every
    /// in-flight connection task (bounded by `CONNECTION_DRAIN_TIMEOUT`, past
    /// which stragglers are aborted) so a caller awaiting `stop` never
    /// observes the session as torn down while a tool call is still
    /// mid-dispatch. Safe to call more than once.
    pub async fn stop(&mut self) {
        if let Some(task) = self.listener_task.take() {
            task.abort();
        }
        let _ = std::fs::remove_file(&self.socket_path);

        let mut connections = self.connections.lock().await;
        let _ = tokio::time::timeout(CONNECTION_DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        connections.abort_all();
    }
}

async fn accept_loop(listener: UnixListener, handlers: ToolHandlerMap, connections: Arc<Mutex<JoinSet<()>>>) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let handlers = handlers.clone();
                let mut connections = connections.lock().await;
                connections.spawn(async move {
                    handle_connection(stream, handlers).await;
                });
            }
            Err(e) => {
                warn!("tool-call server accept failed: {e}");
                return;
            }
        }
    }
}

async fn handle_connection(mut stream: UnixStream, handlers: ToolHandlerMap) {
    loop {
        let (mut reader, mut writer) = stream.split();
        let request: ToolCallRequest = match codec::receive_message(&mut reader).await {
            Ok(req) => req,
            Err(_) => return,
        };

        let response = dispatch(&request, &handlers).await;
        if codec::send_message(&mut writer, &response).await.is_err() {
            return;
        }
    }
}

async fn dispatch(request: &ToolCallRequest, handlers: &ToolHandlerMap) -> WireResponse {
    if request.method != "call_tool" {
        return error_response("unsupported method", "ValueError");
    }

    let name = &request.params.name;
    if name.trim().is_empty() {
        return error_response("tool name must be a non-empty string", "ValueError");
    }
    if !request.params.arguments.is_object() {
        return error_response("arguments must be an object", "ValueError");
    }

    let Some(handler) = handlers.get(name) else {
        return error_response(
            &format!("no handler registered for tool '{name}'"),
            "ToolNotFoundError",
        );
    };

    match handler(request.params.arguments.clone()).await {
        Ok(result) => WireResponse::Success(WireSuccess { result }),
        Err(e) => error_response(&e.to_string(), error_type_name(&e)),
    }
}

fn error_type_name(e: &Error) -> &'static str {
    match e {
        Error::ToolNotFound { .. } => "ToolNotFoundError",
        Error::InvalidInput(_) => "ValueError",
        _ => "RuntimeError",
    }
}

fn error_response(message: &str, error_type: &str) -> WireResponse {
    WireResponse::Error(WireError {
        error: WireErrorBody {
            message: message.to_string(),
            error_type: error_type.to_string(),
        },
    })
}

/// A per-request bring-up/tear-down of the tool-call server plus the schema
/// file the bridge subprocess reads at startup.
pub struct Session {
    pub socket_path: PathBuf,
    pub schema_path: PathBuf,
    server: Option<ToolCallServer>,
    handlers: ToolHandlerMap,
    schemas: Vec<ToolSchema>,
    started: bool,
}

impl Session {
    /// Create a new session with UUID-stamped paths under the system temp
    /// directory. Does not touch the filesystem yet.
    pub fn new(handlers: ToolHandlerMap, schemas: Vec<ToolSchema>) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let tmp = std::env::temp_dir();
        let socket_path = tmp.join(format!("{SOCKET_FILE_PREFIX}{id}{SOCKET_FILE_SUFFIX}"));
        let schema_path = tmp.join(format!("{}{id}.json", crate::codec::SCHEMA_FILE_PREFIX));
        Self {
            socket_path,
            schema_path,
            server: None,
            handlers,
            schemas,
            started: false,
        }
    }

    /// Idempotent. Sweeps stale socket files, writes the schema file, and
    /// starts the tool-call server.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }

        cleanup_stale_sockets(&self.socket_path);
        self.write_schema_file()?;

        let mut server = ToolCallServer::new(self.socket_path.clone(), self.handlers.clone());
        server.start().await?;
        self.server = Some(server);
        self.started = true;
        info!(
            socket = %self.socket_path.display(),
            schema = %self.schema_path.display(),
            tools = self.schemas.len(),
            "tool-call session started"
        );
        Ok(())
    }

    /// Idempotent. Stops the server and removes both files. Always safe to
    /// call, including when `start` never ran or already failed.
    pub async fn stop(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.stop().await;
        }
        let _ = std::fs::remove_file(&self.schema_path);
        self.started = false;
    }

    fn write_schema_file(&self) -> Result<()> {
        use std::fs::OpenOptions;
        use std::io::Write;

        let mut open_opts = OpenOptions::new();
        open_opts.write(true).create(true).truncate(true).mode(SOCKET_PERMISSIONS);
        let mut file = open_opts
            .open(&self.schema_path)
            .map_err(|e| Error::ipc(IpcErrorKind::Connection, format!("write schema file: {e}")))?;
        let json = serde_json::to_vec(&self.schemas)?;
        file.write_all(&json)?;
        Ok(())
    }
}

/// Remove any stale `claudecode_ipc_*.sock` files left over from a crashed
/// prior session, skipping this session's own path. Unlink failures are
/// logged, not fatal.
fn cleanup_stale_sockets(own_path: &Path) {
    let dir = std::env::temp_dir();
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return;
    };
    let own_name = own_path.file_name();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name() else {
            continue;
        };
        let Some(name_str) = name.to_str() else {
            continue;
        };
        if !name_str.starts_with(SOCKET_FILE_PREFIX) || !name_str.ends_with(SOCKET_FILE_SUFFIX) {
            continue;
        }
        if Some(name) == own_name {
            continue;
        }
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("failed to remove stale socket {:?}: {e}", path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt as _;

    fn echo_handler() -> ToolHandlerMap {
        let mut map: HashMap<String, ToolHandler> = HashMap::new();
        map.insert(
            "add".to_string(),
            Arc::new(|args: serde_json::Value| {
                Box::pin(async move {
                    let a = args.get("a").and_then(|v| v.as_i64()).unwrap_or(0);
                    let b = args.get("b").and_then(|v| v.as_i64()).unwrap_or(0);
                    Ok(ToolResult::ok((a + b).to_string()))
                })
            }),
        );
        Arc::new(map)
    }

    #[tokio::test]
    async fn session_start_creates_0600_files_and_stop_removes_them() {
        let mut session = Session::new(
            echo_handler(),
            vec![ToolSchema {
                name: "add".into(),
                description: "adds two numbers".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }],
        );
        session.start().await.unwrap();

        let socket_meta = std::fs::metadata(&session.socket_path).unwrap();
        assert_eq!(socket_meta.permissions().mode() & 0o777, SOCKET_PERMISSIONS);
        let schema_meta = std::fs::metadata(&session.schema_path).unwrap();
        assert_eq!(schema_meta.permissions().mode() & 0o777, SOCKET_PERMISSIONS);

        session.stop().await;
        assert!(!session.socket_path.exists());
        assert!(!session.schema_path.exists());
    }

    #[tokio::test]
    async fn session_start_and_stop_are_idempotent() {
        let mut session = Session::new(echo_handler(), vec![]);
        session.start().await.unwrap();
        session.start().await.unwrap();
        session.stop().await;
        session.stop().await;
    }

    #[tokio::test]
    async fn dispatch_rejects_malformed_method() {
        let handlers = echo_handler();
        let req = ToolCallRequest {
            method: "not_call_tool".into(),
            params: crate::types::ToolCallParams {
                name: "add".into(),
                arguments: serde_json::json!({}),
            },
        };
        let resp = dispatch(&req, &handlers).await;
        match resp {
            WireResponse::Error(e) => assert_eq!(e.error.error_type, "ValueError"),
            _ => panic!("expected error response"),
        }
    }

    #[tokio::test]
    async fn dispatch_reports_unknown_tool() {
        let handlers = echo_handler();
        let req = ToolCallRequest {
            method: "call_tool".into(),
            params: crate::types::ToolCallParams {
                name: "missing".into(),
                arguments: serde_json::json!({}),
            },
        };
        let resp = dispatch(&req, &handlers).await;
        match resp {
            WireResponse::Error(e) => assert_eq!(e.error.error_type, "ToolNotFoundError"),
            _ => panic!("expected error response"),
        }
    }

    #[tokio::test]
    async fn dispatch_invokes_registered_handler() {
        let handlers = echo_handler();
        let req = ToolCallRequest {
            method: "call_tool".into(),
            params: crate::types::ToolCallParams {
                name: "add".into(),
                arguments: serde_json::json!({"a": 2, "b": 3}),
            },
        };
        let resp = dispatch(&req, &handlers).await;
        match resp {
            WireResponse::Success(s) => assert_eq!(s.result.content[0].text, "5"),
            _ => panic!("expected success response"),
        }
    }
}
