//! Error types for the claude-code-adapter crate.
//!
//! The taxonomy mirrors the failure modes an agent framework actually needs to
//! branch on: whether the CLI binary is missing, whether a run failed and why,
//! whether structured-output recovery was exhausted, and whether the tool
//! bridge's own wire protocol broke. Only [`ErrorKind::Timeout`] is ever treated
//! as recoverable by the orchestrator.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies why a CLI invocation failed, carried on [`Error::Execution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The streamed query exceeded its deadline. The only recoverable kind.
    Timeout,
    /// The built-in-tool permission gate denied a proposed invocation.
    Permission,
    /// The `claude` binary could not be located or failed to launch.
    CliNotFound,
    /// The CLI's terminal event reported failure for a reason other than
    /// timeout, permission, or missing binary.
    InvalidResponse,
    /// A runtime error the other kinds don't describe.
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Permission => "permission",
            ErrorKind::CliNotFound => "cli_not_found",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Distinguishes the tool-call server/bridge wire-protocol failure modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcErrorKind {
    /// Could not bind, accept, or connect on the session socket.
    Connection,
    /// A payload exceeded the 10 MiB frame cap, or the length prefix itself
    /// could not be read in full.
    Size,
    /// A registered handler raised during dispatch.
    ToolExecution,
    /// The message envelope was malformed (wrong method, missing fields).
    Message,
}

impl std::fmt::Display for IpcErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IpcErrorKind::Connection => "connection",
            IpcErrorKind::Size => "size",
            IpcErrorKind::ToolExecution => "tool_execution",
            IpcErrorKind::Message => "message",
        };
        write!(f, "{s}")
    }
}

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    /// The `claude` CLI binary could not be found on PATH.
    #[error("claude CLI not found: {0}")]
    NotInstalled(String),

    /// The CLI run failed or timed out.
    #[error("CLI execution failed ({kind}): {message}")]
    Execution {
        kind: ErrorKind,
        message: String,
        exit_code: Option<i32>,
        stderr: String,
        recoverable: bool,
    },

    /// The CLI's output could not be parsed, or a structured payload could
    /// not be serialized back out.
    #[error("failed to parse CLI response: {message}")]
    ResponseParse { message: String, raw_output: String },

    /// All three structured-output recovery stages were exhausted.
    #[error(
        "structured output could not be recovered (session {session_id}, {num_turns} turns, {duration_ms}ms)"
    )]
    StructuredOutput {
        session_id: String,
        num_turns: u32,
        duration_ms: u64,
    },

    /// A request named a tool that isn't in the registered toolset.
    #[error("tool(s) not found: {missing:?} (available: {available:?})")]
    ToolNotFound {
        missing: Vec<String>,
        available: Vec<String>,
    },

    /// A request named tools but no toolset has ever been registered.
    #[error("no toolset registered, requested: {requested:?}")]
    ToolsetNotRegistered { requested: Vec<String> },

    /// A tool handler's dependency/context value wasn't a JSON-serializable shape.
    #[error(
        "unsupported dependency type `{type_name}`: expected dict, list, str, int, float, bool, null, or a serializable struct"
    )]
    UnsupportedDepsType { type_name: String },

    /// A tool-call server/bridge wire-protocol failure.
    #[error("ipc error ({kind}): {message}")]
    Ipc { kind: IpcErrorKind, message: String },

    /// Invalid configuration (surfaced by builder validation).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid input to a public API call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O error from the underlying transport (socket, subprocess, file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other errors.
    #[error("error: {0}")]
    Other(String),
}

impl Error {
    /// Create a not-installed error.
    pub fn not_installed(msg: impl Into<String>) -> Self {
        Error::NotInstalled(msg.into())
    }

    /// Create an execution error. `recoverable` should only ever be `true`
    /// for `ErrorKind::Timeout`.
    pub fn execution(
        kind: ErrorKind,
        message: impl Into<String>,
        exit_code: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Error::Execution {
            recoverable: matches!(kind, ErrorKind::Timeout),
            kind,
            message: message.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Shorthand for a recoverable timeout execution error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Error::execution(ErrorKind::Timeout, message, None, "")
    }

    /// Create a response-parse error, truncating the raw payload preview.
    pub fn response_parse(message: impl Into<String>, raw_output: impl Into<String>) -> Self {
        const PREVIEW_LIMIT: usize = 2048;
        let mut raw_output = raw_output.into();
        if raw_output.len() > PREVIEW_LIMIT {
            raw_output.truncate(PREVIEW_LIMIT);
            raw_output.push_str("...(truncated)");
        }
        Error::ResponseParse {
            message: message.into(),
            raw_output,
        }
    }

    /// Create a structured-output recovery-exhausted error.
    pub fn structured_output(
        session_id: impl Into<String>,
        num_turns: u32,
        duration_ms: u64,
    ) -> Self {
        Error::StructuredOutput {
            session_id: session_id.into(),
            num_turns,
            duration_ms,
        }
    }

    /// Create an IPC error.
    pub fn ipc(kind: IpcErrorKind, message: impl Into<String>) -> Self {
        Error::Ipc {
            kind,
            message: message.into(),
        }
    }

    /// Create a new config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Whether the orchestrator may retry/recover from this error. Only
    /// timeout-kind execution errors qualify.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Execution { recoverable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("missing model name");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "invalid configuration: missing model name");
    }

    #[test]
    fn test_error_timeout_is_recoverable() {
        let err = Error::timeout("query exceeded deadline");
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn test_error_execution_non_timeout_not_recoverable() {
        let err = Error::execution(ErrorKind::CliNotFound, "claude not on PATH", None, "");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_error_response_parse_truncates_preview() {
        let huge = "x".repeat(4096);
        let err = Error::response_parse("unexpected shape", huge);
        match err {
            Error::ResponseParse { raw_output, .. } => {
                assert!(raw_output.ends_with("...(truncated)"));
                assert!(raw_output.len() < 4096);
            }
            _ => panic!("expected ResponseParse"),
        }
    }

    #[test]
    fn test_error_structured_output() {
        let err = Error::structured_output("sess-1", 3, 1500);
        assert!(matches!(err, Error::StructuredOutput { .. }));
        assert!(err.to_string().contains("sess-1"));
    }

    #[test]
    fn test_error_ipc() {
        let err = Error::ipc(IpcErrorKind::Size, "frame exceeded 10MiB cap");
        assert!(matches!(err, Error::Ipc { kind: IpcErrorKind::Size, .. }));
    }

    #[test]
    fn test_error_invalid_input() {
        let err = Error::invalid_input("messages must not be empty");
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_error_other() {
        let err = Error::other("unexpected state");
        assert!(matches!(err, Error::Other(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn _returns_result() -> Result<i32> {
            Ok(42)
        }

        fn _returns_error() -> Result<i32> {
            Err(Error::timeout("deadline exceeded"))
        }
    }
}
