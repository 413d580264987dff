//! Core data types: configuration, messages, wire protocol, and terminal events.
//!
//! The type system separates three concerns:
//!
//! - **Configuration** ([`Configuration`]): per-model-instance settings, built with
//!   the same builder-with-validation pattern used throughout this crate.
//! - **Conversation types** ([`Message`], [`ContentBlock`]): what the caller sends.
//! - **CLI protocol types** ([`TerminalEvent`], [`Usage`], wire messages): what
//!   flows between this crate, the bridge subprocess, and the external CLI.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// NEWTYPE WRAPPERS
// ============================================================================

/// Validated model name.
///
/// ```
/// use claude_code_adapter::ModelName;
///
/// let model = ModelName::new("claude-sonnet-4-5").unwrap();
/// assert_eq!(model.as_str(), "claude-sonnet-4-5");
/// assert!(ModelName::new("").is_err());
/// assert!(ModelName::new("   ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelName(String);

impl ModelName {
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_input(
                "model name cannot be empty or whitespace",
            ));
        }
        Ok(ModelName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ModelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Permission mode the CLI is launched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    BypassPermissions,
    Default,
    Plan,
    AcceptEdits,
}

impl Default for PermissionMode {
    fn default() -> Self {
        PermissionMode::Default
    }
}

/// Requested shape of the model's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Auto,
    Native,
    Tool,
    Text,
}

/// `tool_name -> {arg_name -> required_value}`. An entry denies any
/// invocation where a listed argument is present with a different value.
pub type RestrictionTable = HashMap<String, HashMap<String, serde_json::Value>>;

/// Callback invoked with every intermediate event the CLI streams back
/// before the terminal event arrives.
pub type MessageCallback = std::sync::Arc<dyn Fn(serde_json::Value) + Send + Sync>;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Per-model-instance configuration. Immutable after construction; build with
/// [`Configuration::builder`].
#[derive(Clone)]
pub struct Configuration {
    model: String,
    working_directory: Option<String>,
    timeout_secs: f64,
    allowed_tools: Vec<String>,
    denied_tools: Vec<String>,
    permission_mode: PermissionMode,
    max_turns: Option<u32>,
    message_callback: Option<MessageCallback>,
    restrictions: RestrictionTable,
    continue_conversation: bool,
    resume: Option<String>,
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("model", &self.model)
            .field("working_directory", &self.working_directory)
            .field("timeout_secs", &self.timeout_secs)
            .field("allowed_tools", &self.allowed_tools)
            .field("denied_tools", &self.denied_tools)
            .field("permission_mode", &self.permission_mode)
            .field("max_turns", &self.max_turns)
            .field("has_message_callback", &self.message_callback.is_some())
            .field("restrictions", &self.restrictions)
            .field("continue_conversation", &self.continue_conversation)
            .field("resume", &self.resume)
            .finish()
    }
}

impl Configuration {
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }

    pub fn timeout_secs(&self) -> f64 {
        self.timeout_secs
    }

    pub fn allowed_tools(&self) -> &[String] {
        &self.allowed_tools
    }

    pub fn denied_tools(&self) -> &[String] {
        &self.denied_tools
    }

    pub fn permission_mode(&self) -> PermissionMode {
        self.permission_mode
    }

    pub fn max_turns(&self) -> Option<u32> {
        self.max_turns
    }

    pub fn message_callback(&self) -> Option<&MessageCallback> {
        self.message_callback.as_ref()
    }

    pub fn restrictions(&self) -> &RestrictionTable {
        &self.restrictions
    }

    pub fn continue_conversation(&self) -> bool {
        self.continue_conversation
    }

    pub fn resume(&self) -> Option<&str> {
        self.resume.as_deref()
    }
}

/// Builder for [`Configuration`] with validation on [`build`](ConfigurationBuilder::build).
#[derive(Default)]
pub struct ConfigurationBuilder {
    model: Option<String>,
    working_directory: Option<String>,
    timeout_secs: Option<f64>,
    allowed_tools: Vec<String>,
    denied_tools: Vec<String>,
    permission_mode: Option<PermissionMode>,
    max_turns: Option<u32>,
    message_callback: Option<MessageCallback>,
    restrictions: RestrictionTable,
    continue_conversation: bool,
    resume: Option<String>,
}

impl std::fmt::Debug for ConfigurationBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationBuilder")
            .field("model", &self.model)
            .field("working_directory", &self.working_directory)
            .finish()
    }
}

impl ConfigurationBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn timeout_secs(mut self, timeout: f64) -> Self {
        self.timeout_secs = Some(timeout);
        self
    }

    pub fn allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    pub fn denied_tools(mut self, tools: Vec<String>) -> Self {
        self.denied_tools = tools;
        self
    }

    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = Some(mode);
        self
    }

    pub fn max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    pub fn message_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(serde_json::Value) + Send + Sync + 'static,
    {
        self.message_callback = Some(std::sync::Arc::new(callback));
        self
    }

    pub fn restrictions(mut self, table: RestrictionTable) -> Self {
        self.restrictions = table;
        self
    }

    pub fn continue_conversation(mut self, flag: bool) -> Self {
        self.continue_conversation = flag;
        self
    }

    pub fn resume(mut self, session_id: impl Into<String>) -> Self {
        self.resume = Some(session_id.into());
        self
    }

    /// Validates and builds the final [`Configuration`].
    ///
    /// Fails closed: missing model, non-positive timeout, zero `max_turns`,
    /// or both `resume` and `continue_conversation` set.
    pub fn build(self) -> crate::Result<Configuration> {
        let model = self
            .model
            .ok_or_else(|| Error::config("model is required"))?;
        if model.trim().is_empty() {
            return Err(Error::invalid_input("model cannot be empty or whitespace"));
        }

        let timeout_secs = self.timeout_secs.unwrap_or(300.0);
        if timeout_secs <= 0.0 {
            return Err(Error::invalid_input("timeout_secs must be positive"));
        }

        if let Some(turns) = self.max_turns {
            if turns == 0 {
                return Err(Error::invalid_input("max_turns must be greater than 0"));
            }
        }

        if self.resume.is_some() && self.continue_conversation {
            return Err(Error::invalid_input(
                "resume and continue_conversation are mutually exclusive",
            ));
        }

        Ok(Configuration {
            model,
            working_directory: self.working_directory,
            timeout_secs,
            allowed_tools: self.allowed_tools,
            denied_tools: self.denied_tools,
            permission_mode: self.permission_mode.unwrap_or_default(),
            max_turns: self.max_turns,
            message_callback: self.message_callback,
            restrictions: self.restrictions,
            continue_conversation: self.continue_conversation,
            resume: self.resume,
        })
    }
}

// ============================================================================
// CONVERSATION MESSAGES
// ============================================================================

/// Who sent a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A block of message content. Externally tagged by `"type"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A tool invocation the model is requesting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolUseBlock {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// The result of executing a tool, sent back in the next turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: serde_json::Value,
}

impl ToolResultBlock {
    pub fn new(tool_use_id: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content,
        }
    }
}

/// One message in the conversation sent to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(
            MessageRole::User,
            vec![ContentBlock::Text(TextBlock::new(text))],
        )
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(
            MessageRole::System,
            vec![ContentBlock::Text(TextBlock::new(text))],
        )
    }

    pub fn user_with_blocks(content: Vec<ContentBlock>) -> Self {
        Self::new(MessageRole::User, content)
    }
}

// ============================================================================
// REQUEST-TIME SETTINGS & PARAMETERS
// ============================================================================

/// Per-request overrides normalized against [`Configuration`] at request entry.
#[derive(Debug, Clone, Default)]
pub struct RequestSettings {
    pub timeout_secs: Option<f64>,
    pub max_budget_usd: Option<f64>,
    pub append_system_prompt: Option<String>,
    pub max_turns: Option<u32>,
    pub working_directory: Option<String>,
    pub continue_conversation: bool,
    pub resume: Option<String>,
}

impl RequestSettings {
    /// Validates mutual exclusion of `resume`/`continue_conversation` before
    /// any subprocess is launched.
    pub fn validate(&self) -> crate::Result<()> {
        if self.resume.is_some() && self.continue_conversation {
            return Err(Error::invalid_input(
                "resume and continue_conversation are mutually exclusive",
            ));
        }
        if let Some(budget) = self.max_budget_usd {
            if budget < 0.0 {
                return Err(Error::invalid_input("max_budget_usd must be non-negative"));
            }
        }
        if let Some(turns) = self.max_turns {
            if turns == 0 {
                return Err(Error::invalid_input("max_turns must be greater than 0"));
            }
        }
        Ok(())
    }
}

/// An optional JSON-schema-shaped output request.
#[derive(Debug, Clone)]
pub struct OutputSchema {
    pub name: String,
    pub schema: serde_json::Value,
}

/// Per-request parameters describing what this turn needs from the toolset
/// and output shape.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    pub function_tools: Vec<String>,
    pub output_mode: OutputMode,
    pub output_schema: Option<OutputSchema>,
}

// ============================================================================
// CLI PROTOCOL TYPES
// ============================================================================

/// Token accounting from a terminal event. The four headline counters are
/// always populated; the rest are optional, additive detail carried through
/// for metadata requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input: u64,
    #[serde(default)]
    pub output: u64,
    #[serde(default)]
    pub cache_write: u64,
    #[serde(default)]
    pub cache_read: u64,
    #[serde(default)]
    pub service_tier: Option<String>,
    #[serde(default)]
    pub server_tool_use: Option<ServerToolUse>,
    #[serde(default)]
    pub cache_creation: Option<CacheCreation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerToolUse {
    #[serde(default)]
    pub web_search_requests: u64,
    #[serde(default)]
    pub web_fetch_requests: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheCreation {
    #[serde(default)]
    pub ephemeral_1h_input_tokens: u64,
    #[serde(default)]
    pub ephemeral_5m_input_tokens: u64,
}

impl Usage {
    /// Builds a [`Usage`] from the raw token-count field names the CLI emits.
    pub fn from_raw_tokens(
        input_tokens: u64,
        output_tokens: u64,
        cache_creation_input_tokens: u64,
        cache_read_input_tokens: u64,
    ) -> Self {
        Usage {
            input: input_tokens,
            output: output_tokens,
            cache_write: cache_creation_input_tokens,
            cache_read: cache_read_input_tokens,
            ..Default::default()
        }
    }
}

/// The final event that ends a streamed query.
#[derive(Debug, Clone)]
pub struct TerminalEvent {
    pub subtype: String,
    pub is_error: bool,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub num_turns: u32,
    pub session_id: String,
    pub result: Option<String>,
    pub structured_output: Option<serde_json::Value>,
    pub total_cost_usd: Option<f64>,
    pub usage: Usage,
}

impl TerminalEvent {
    pub fn is_success(&self) -> bool {
        self.subtype == "success"
    }

    pub fn is_error_subtype(&self) -> bool {
        self.subtype.starts_with("error_")
    }
}

/// One assembled text part of a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePart {
    pub text: String,
}

/// The framework-shaped response returned from a request.
#[derive(Debug, Clone)]
pub struct Response {
    pub parts: Vec<ResponsePart>,
    pub usage: Usage,
    pub model_name: String,
}

/// [`Response`] plus the raw terminal event, returned by `request_with_metadata`.
#[derive(Debug, Clone)]
pub struct ResponseWithMetadata {
    pub response: Response,
    pub terminal_event: TerminalEvent,
}

// ============================================================================
// WIRE PROTOCOL (parent tool-call server <-> bridge)
// ============================================================================

/// A `call_tool` request sent by the bridge over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub method: String,
    pub params: ToolCallParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A single content item in a tool result envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub text: String,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            item_type: "text".to_string(),
            text: text.into(),
        }
    }
}

/// The result envelope of a tool invocation. `is_error` here is distinct from
/// [`TerminalEvent::is_error`]: it marks a tool-level failure that is still
/// passed back to the CLI as data, never raised as a request-level error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ContentItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ToolResult {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: Some(true),
        }
    }
}

/// The wire-level success response: `{"result": ToolResult}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireSuccess {
    pub result: ToolResult,
}

/// The wire-level error response: `{"error": {message, type}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub error: WireErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

/// Either shape a response to a `call_tool` request can take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireResponse {
    Success(WireSuccess),
    Error(WireError),
}

/// A tool schema record written to the session's schema file for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}
