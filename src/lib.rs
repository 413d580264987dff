//! # claude-code-adapter
//!
//! Drives an external, subprocess-hosted Claude Code CLI as a streaming
//! chat-completion backend for a generic agent framework. Messages, a tool
//! catalog, an optional JSON output schema, and request settings go in; a
//! framework-shaped response with full usage metadata comes out.
//!
//! ## What this crate does
//!
//! - **Request orchestrator** ([`orchestrator`]): one call turns
//!   messages + settings + a tool subset into a single streamed subprocess
//!   invocation, enforces a timeout, and converts the terminal event into a
//!   response.
//! - **Structured-output recovery** ([`recovery`]): a three-stage cascade
//!   that rescues a schema-conformant result when the CLI reports it
//!   exhausted its retry budget.
//! - **Tool bridge** ([`codec`], [`tool_server`], [`bridge`]): the parent
//!   executes tools in-process while a child subprocess advertises them to
//!   the CLI over its native tool-server protocol, relaying every
//!   invocation back over a length-prefixed Unix socket.
//! - **Permission gate** ([`permission`]): a parameter-shape filter the CLI
//!   consults before each built-in tool call.
//!
//! ## Example
//!
//! ```rust,no_run
//! use claude_code_adapter::{ClaudeCodeModel, Configuration, Message, RequestParams, RequestSettings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Configuration::builder()
//!         .model("claude-sonnet-4-5")
//!         .build()?;
//!
//!     let mut model = ClaudeCodeModel::new(config);
//!     let response = model
//!         .request(vec![Message::user("Hi")], RequestSettings::default(), RequestParams::default())
//!         .await?;
//!
//!     for part in response.parts {
//!         print!("{}", part.text);
//!     }
//!     Ok(())
//! }
//! ```

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

/// Length-prefixed JSON framing shared by the tool-call server and bridge.
pub mod codec;

/// Error types and the crate-wide `Result` alias.
mod error;

/// Core data types: configuration, messages, wire protocol, terminal events.
mod types;

/// Tool definitions and the envelope-coercion rules that bridge them.
mod tools;

/// Parent-side tool-call server and per-request session manager.
pub mod tool_server;

/// Child-process bridge logic, used by the `claude-code-bridge` binary.
pub mod bridge;

/// Parameter-shape permission gate.
mod permission;

/// Three-stage structured-output recovery cascade.
mod recovery;

/// Converts a terminal CLI event into the framework's response shape.
mod response;

/// Spawns the streamed subprocess query and drives the request lifecycle.
pub mod orchestrator;

/// The public model facade agent frameworks hold onto.
mod facade;

/// `tracing` subscriber initialization from `CLAUDECODE_MODEL_LOG_LEVEL`.
pub mod logging;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

pub use error::{Error, Result};

pub use types::{
    CacheCreation, ConfigurationBuilder, ContentBlock, Message, MessageCallback, MessageRole,
    ModelName, OutputMode, OutputSchema, PermissionMode, RequestParams, RequestSettings,
    Response, ResponsePart, ResponseWithMetadata, RestrictionTable, ServerToolUse, TerminalEvent,
    TextBlock, ToolResult, ToolResultBlock, ToolSchema, ToolUseBlock, Usage,
};

pub use types::Configuration;

pub use tools::{Tool, ToolBuilder, ToolRegistry, tool};

pub use permission::Decision as PermissionDecision;

pub use facade::{ClaudeCodeModel, Profile, Transport};

pub use orchestrator::StreamEvent;

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// The most commonly used types and functions for driving a request.
pub mod prelude {
    pub use crate::{
        ClaudeCodeModel, Configuration, ConfigurationBuilder, Error, Message, RequestParams,
        RequestSettings, Response, Result, Tool, tool,
    };
}
