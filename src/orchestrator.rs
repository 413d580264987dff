//! Request orchestrator: turns messages + settings + a tool subset into one
//! streamed subprocess invocation, enforces a timeout, watches for the
//! distinguished `StructuredOutput` tool-use block, and hands the terminal
//! event to the recovery engine and response assembler.

use crate::codec::SCHEMA_FILE_PREFIX;
use crate::error::{Error, ErrorKind};
use crate::permission::Decision;
use crate::recovery;
use crate::response;
use crate::tool_server::Session;
use crate::types::{
    Configuration, Message, OutputMode, OutputSchema, PermissionMode, RequestParams,
    RequestSettings, Response, ResponseWithMetadata, TerminalEvent, Usage,
};
use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::warn;

/// Structured-output retry exhaustion under native mode gets this many turns
/// when the caller doesn't specify an explicit override.
pub const DEFAULT_MAX_TURNS_WITH_JSON_SCHEMA: u32 = 8;

/// The distinguished tool-use name the model may emit mid-stream when
/// cornered into producing structured output.
const STRUCTURED_OUTPUT_TOOL_NAME: &str = "StructuredOutput";

/// A raw event coming off the CLI's stdout, before we know whether it's an
/// intermediate message or the terminal event.
pub type CliEvent = Value;

/// An async source of CLI events for one invocation. The default
/// implementation ([`SubprocessRunner`]) spawns the external CLI binary;
/// tests substitute a canned stream instead of touching a real process.
#[async_trait::async_trait]
pub trait QueryRunner: Send + Sync {
    async fn run(&self, invocation: &CliInvocation) -> crate::Result<Pin<Box<dyn Stream<Item = CliEvent> + Send>>>;
}

/// Everything the orchestrator has resolved about one request, ready to
/// launch.
#[derive(Debug, Clone)]
pub struct CliInvocation {
    pub model: String,
    pub system_prompt: Option<String>,
    pub working_directory: Option<String>,
    pub allowed_tools: Vec<String>,
    pub denied_tools: Vec<String>,
    pub permission_mode: PermissionMode,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub continue_conversation: bool,
    pub resume: Option<String>,
    pub messages: Vec<Message>,
    pub output_schema: Option<OutputSchema>,
    pub bridge_socket_path: Option<std::path::PathBuf>,
    pub bridge_schema_path: Option<std::path::PathBuf>,
}

/// Wraps an event stream together with the background task reading it off
/// the subprocess's stdout, aborting that task the moment the stream itself
/// is dropped.
///
/// This is what stands in for this ecosystem's shielded-generator-close
/// discipline: when the orchestrator's own deadline fires, `collect_stream`
/// drops the stream future without polling it further, which must still
/// guarantee the reader task (and, via `kill_on_drop`, the child process)
/// gets torn down rather than leaked against a subprocess that never exits
/// on its own. Task cancellation in Tokio can't itself raise the way a
/// foreign runtime's cancel-scope teardown can, so there is no anomaly left
/// to swallow here — aborting is infallible.
struct AbortReaderOnDrop {
    inner: Pin<Box<dyn Stream<Item = CliEvent> + Send>>,
    reader_task: tokio::task::JoinHandle<()>,
}

impl Stream for AbortReaderOnDrop {
    type Item = CliEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.inner.as_mut().poll_next(cx)
    }
}

impl Drop for AbortReaderOnDrop {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

/// Spawns the external CLI binary, writes the conversation as a JSON-lines
/// request on stdin, and streams newline-delimited JSON events off stdout.
pub struct SubprocessRunner {
    binary_path: String,
}

impl SubprocessRunner {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

impl Default for SubprocessRunner {
    fn default() -> Self {
        Self::new("claude")
    }
}

#[async_trait::async_trait]
impl QueryRunner for SubprocessRunner {
    async fn run(&self, invocation: &CliInvocation) -> crate::Result<Pin<Box<dyn Stream<Item = CliEvent> + Send>>> {
        let mut command = Command::new(&self.binary_path);
        command
            .arg("--output-format")
            .arg("stream-json")
            .arg("--model")
            .arg(&invocation.model)
            .arg("--permission-mode")
            .arg(format!("{:?}", invocation.permission_mode).to_lowercase());

        if let Some(dir) = &invocation.working_directory {
            command.current_dir(dir);
        }
        if let Some(turns) = invocation.max_turns {
            command.arg("--max-turns").arg(turns.to_string());
        }
        if !invocation.allowed_tools.is_empty() {
            command.arg("--allowed-tools").arg(invocation.allowed_tools.join(","));
        }
        if !invocation.denied_tools.is_empty() {
            command.arg("--denied-tools").arg(invocation.denied_tools.join(","));
        }
        if let (Some(socket), Some(schema)) = (&invocation.bridge_socket_path, &invocation.bridge_schema_path) {
            command
                .arg("--mcp-bridge-socket")
                .arg(socket)
                .arg("--mcp-bridge-schema")
                .arg(schema);
        }
        if invocation.continue_conversation {
            command.arg("--continue");
        }
        if let Some(resume) = &invocation.resume {
            command.arg("--resume").arg(resume);
        }

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| Error::not_installed(format!("failed to launch '{}': {e}", self.binary_path)))?;

        let payload = serde_json::json!({
            "system_prompt": invocation.system_prompt,
            "messages": invocation.messages,
            "output_schema": invocation.output_schema.as_ref().map(|s| &s.schema),
        });
        if let Some(mut stdin) = child.stdin.take() {
            let encoded = serde_json::to_vec(&payload)?;
            stdin.write_all(&encoded).await?;
            stdin.write_all(b"\n").await?;
            stdin.shutdown().await?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::other("subprocess stdout was not piped"))?;
        let mut lines = BufReader::new(stdout).lines();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            let _child_guard = child;
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                if let Ok(value) = serde_json::from_str::<Value>(&line) {
                    if tx.send(value).is_err() {
                        break;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) });
        Ok(Box::pin(AbortReaderOnDrop {
            inner: Box::pin(stream),
            reader_task,
        }))
    }
}

/// Parse a raw event's `usage` object using the CLI's own field names.
fn parse_usage(value: &Value) -> Usage {
    let Some(usage) = value.get("usage") else {
        return Usage::default();
    };
    let get_u64 = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
    let mut mapped = Usage::from_raw_tokens(
        get_u64("input_tokens"),
        get_u64("output_tokens"),
        get_u64("cache_creation_input_tokens"),
        get_u64("cache_read_input_tokens"),
    );
    mapped.service_tier = usage.get("service_tier").and_then(Value::as_str).map(str::to_string);
    mapped
}

/// Try to interpret a raw event as the terminal event: it must carry a
/// `subtype` string field, which no intermediate assistant/tool event does.
fn parse_terminal_event(value: &Value) -> Option<TerminalEvent> {
    let subtype = value.get("subtype")?.as_str()?.to_string();
    Some(TerminalEvent {
        subtype,
        is_error: value.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        duration_ms: value.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
        duration_api_ms: value.get("duration_api_ms").and_then(Value::as_u64).unwrap_or(0),
        num_turns: value.get("num_turns").and_then(Value::as_u64).unwrap_or(0) as u32,
        session_id: value
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        result: value.get("result").and_then(Value::as_str).map(str::to_string),
        structured_output: value.get("structured_output").cloned().filter(|v| !v.is_null()),
        total_cost_usd: value.get("total_cost_usd").and_then(Value::as_f64),
        usage: parse_usage(value),
    })
}

/// If `event` carries an assistant content block that is a tool-use of
/// [`STRUCTURED_OUTPUT_TOOL_NAME`], return its input.
fn extract_structured_output_tool_input(event: &Value) -> Option<Value> {
    let blocks = event.get("message")?.get("content")?.as_array()?;
    blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter(|b| b.get("name").and_then(Value::as_str) == Some(STRUCTURED_OUTPUT_TOOL_NAME))
        .filter_map(|b| b.get("input").cloned())
        .last()
}

/// Resolve `settings` against `config`, applying the type-check and
/// fatal/warn-and-ignore rules from the external interface.
fn normalize_settings(config: &Configuration, settings: &RequestSettings) -> crate::Result<RequestSettings> {
    settings.validate()?;

    if let Some(dir) = &settings.working_directory {
        if dir.is_empty() {
            warn!("working_directory override is an empty string; applying it anyway");
        }
    }

    Ok(RequestSettings {
        timeout_secs: Some(settings.timeout_secs.unwrap_or(config.timeout_secs())),
        max_budget_usd: settings.max_budget_usd,
        append_system_prompt: settings.append_system_prompt.clone(),
        max_turns: settings.max_turns.or(config.max_turns()),
        working_directory: settings
            .working_directory
            .clone()
            .or_else(|| config.working_directory().map(str::to_string)),
        continue_conversation: settings.continue_conversation || config.continue_conversation(),
        resume: settings.resume.clone().or_else(|| config.resume().map(str::to_string)),
    })
}

/// Resolve whether this request should ask the CLI for native structured
/// output, per the output-mode profile rule: `native` always does, `auto`
/// does when an output schema was actually supplied.
fn resolve_output_schema(params: &RequestParams) -> Option<OutputSchema> {
    match params.output_mode {
        OutputMode::Native => params.output_schema.clone(),
        OutputMode::Auto => params.output_schema.clone(),
        OutputMode::Tool | OutputMode::Text => None,
    }
}

fn build_system_prompt(config_prompt: Option<&str>, append: Option<&str>) -> Option<String> {
    match (config_prompt, append) {
        (Some(base), Some(extra)) => Some(format!("{base}\n\n{extra}")),
        (Some(base), None) => Some(base.to_string()),
        (None, Some(extra)) => Some(extra.to_string()),
        (None, None) => None,
    }
}

/// Consume the event stream under a timeout, firing `message_callback` for
/// every intermediate event, tracking the last captured `StructuredOutput`
/// tool-use input, and returning the terminal event once seen.
async fn collect_stream(
    mut stream: Pin<Box<dyn Stream<Item = CliEvent> + Send>>,
    timeout_secs: f64,
    message_callback: Option<&crate::types::MessageCallback>,
) -> crate::Result<(TerminalEvent, Option<Value>)> {
    let deadline = Duration::from_secs_f64(timeout_secs.max(0.0));
    let mut captured_tool_input: Option<Value> = None;

    let result = tokio::time::timeout(deadline, async {
        while let Some(event) = stream.next().await {
            if let Some(input) = extract_structured_output_tool_input(&event) {
                captured_tool_input = Some(input);
            }
            if let Some(terminal) = parse_terminal_event(&event) {
                return Some(terminal);
            }
            if let Some(cb) = message_callback {
                cb(event);
            }
        }
        None
    })
    .await;

    match result {
        Ok(Some(terminal)) => Ok((terminal, captured_tool_input)),
        Ok(None) => Err(Error::execution(
            ErrorKind::InvalidResponse,
            "stream ended without a terminal event",
            None,
            "",
        )),
        Err(_) => Err(Error::timeout(format!(
            "query exceeded {timeout_secs}s deadline"
        ))),
    }
}

/// Resolve everything the CLI invocation needs from already-normalized
/// settings, shared by both `execute` and `stream`. Returns the invocation
/// plus whether an output schema was actually requested (recovery-gating
/// needs this after the invocation is moved into the runner call).
fn build_invocation(
    config: &Configuration,
    settings: &RequestSettings,
    params: &RequestParams,
    messages: Vec<Message>,
    session: Option<&Session>,
) -> (CliInvocation, bool) {
    let output_schema = resolve_output_schema(params);
    let schema_was_requested = output_schema.is_some();
    let max_turns = if schema_was_requested && settings.max_turns.is_none() {
        Some(DEFAULT_MAX_TURNS_WITH_JSON_SCHEMA)
    } else {
        settings.max_turns
    };

    let system_prompt = build_system_prompt(None, settings.append_system_prompt.as_deref());

    let invocation = CliInvocation {
        model: config.model().to_string(),
        system_prompt,
        working_directory: settings.working_directory.clone(),
        allowed_tools: config.allowed_tools().to_vec(),
        denied_tools: config.denied_tools().to_vec(),
        permission_mode: config.permission_mode(),
        max_turns,
        max_budget_usd: settings.max_budget_usd,
        continue_conversation: settings.continue_conversation,
        resume: settings.resume.clone(),
        messages,
        output_schema,
        bridge_socket_path: session.map(|s| s.socket_path.clone()),
        bridge_schema_path: session.map(|s| s.schema_path.clone()),
    };
    (invocation, schema_was_requested)
}

/// One item off `stream`: either an intermediate event straight off the
/// CLI, or the terminal event that ends the sequence.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Message(CliEvent),
    Terminal(TerminalEvent),
}

/// Entry point behind `stream_messages`. Shares `execute`'s invocation
/// building, session wiring, and deadline, but yields every event to the
/// caller instead of collapsing the stream down to a single response.
pub async fn stream(
    config: &Configuration,
    runner: &dyn QueryRunner,
    session: Option<&Session>,
    messages: Vec<Message>,
    settings: RequestSettings,
    params: RequestParams,
) -> crate::Result<Pin<Box<dyn Stream<Item = crate::Result<StreamEvent>> + Send>>> {
    let settings = normalize_settings(config, &settings)?;
    let (invocation, _schema_was_requested) = build_invocation(config, &settings, &params, messages, session);

    let cli_stream = runner.run(&invocation).await?;
    let timeout_secs = settings.timeout_secs.unwrap_or(config.timeout_secs());
    let deadline = tokio::time::Instant::now() + Duration::from_secs_f64(timeout_secs.max(0.0));
    let message_callback = config.message_callback().cloned();

    let state = (cli_stream, false);
    let out = futures::stream::unfold((state, deadline, message_callback), move |((mut inner, done), deadline, callback)| async move {
        if done {
            return None;
        }
        match tokio::time::timeout_at(deadline, inner.next()).await {
            Ok(Some(event)) => {
                if let Some(terminal) = parse_terminal_event(&event) {
                    Some((Ok(StreamEvent::Terminal(terminal)), ((inner, true), deadline, callback)))
                } else {
                    if let Some(cb) = &callback {
                        cb(event.clone());
                    }
                    Some((Ok(StreamEvent::Message(event)), ((inner, false), deadline, callback)))
                }
            }
            Ok(None) => None,
            Err(_) => Some((
                Err(Error::timeout(format!("query exceeded {timeout_secs}s deadline"))),
                ((inner, true), deadline, callback),
            )),
        }
    });
    Ok(Box::pin(out))
}

/// Shared entry point behind `request` / `request_with_metadata`. Returns
/// the assembled response, the raw terminal event, and the response's model
/// name for convenience.
pub async fn execute(
    config: &Configuration,
    runner: &dyn QueryRunner,
    session: Option<&Session>,
    messages: Vec<Message>,
    settings: RequestSettings,
    params: RequestParams,
) -> crate::Result<ResponseWithMetadata> {
    let settings = normalize_settings(config, &settings)?;
    let (invocation, schema_was_requested) = build_invocation(config, &settings, &params, messages, session);

    let stream = runner.run(&invocation).await?;
    let timeout_secs = settings.timeout_secs.unwrap_or(config.timeout_secs());
    let (mut terminal, captured_tool_input) =
        collect_stream(stream, timeout_secs, config.message_callback()).await?;

    if terminal.is_error {
        return Err(Error::execution(
            ErrorKind::InvalidResponse,
            format!("terminal event reported failure (subtype '{}')", terminal.subtype),
            None,
            "",
        ));
    }

    let needs_recovery = terminal.subtype == "error_max_structured_output_retries"
        || (terminal.subtype == "error_max_turns" && schema_was_requested);

    if needs_recovery {
        let recovered = recovery::recover(&terminal, captured_tool_input.as_ref())?;
        terminal.structured_output = Some(recovered);
    }

    let response: Response = response::assemble(&terminal, config.model())?;
    Ok(ResponseWithMetadata {
        response,
        terminal_event: terminal,
    })
}

/// Check one proposed built-in-tool invocation against the configured
/// restriction table.
pub fn check_permission(config: &Configuration, tool_name: &str, arguments: &Value) -> Decision {
    crate::permission::check(config.restrictions(), tool_name, arguments)
}

/// Build the schema-file basename prefix constant used by bridge discovery
/// in diagnostics/logging. Re-exported here so callers don't need to reach
/// into [`crate::codec`] just for a log line.
pub fn schema_file_prefix() -> &'static str {
    SCHEMA_FILE_PREFIX
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConfigurationBuilder, MessageRole};
    use async_trait::async_trait;
    use futures::stream;

    struct CannedRunner {
        events: Vec<Value>,
    }

    #[async_trait]
    impl QueryRunner for CannedRunner {
        async fn run(&self, _invocation: &CliInvocation) -> crate::Result<Pin<Box<dyn Stream<Item = CliEvent> + Send>>> {
            Ok(Box::pin(stream::iter(self.events.clone())))
        }
    }

    fn config() -> Configuration {
        ConfigurationBuilder::default().model("claude-sonnet-4-5").build().unwrap()
    }

    #[tokio::test]
    async fn plain_text_request_returns_single_part_response() {
        let runner = CannedRunner {
            events: vec![serde_json::json!({
                "subtype": "success",
                "is_error": false,
                "duration_ms": 10,
                "duration_api_ms": 8,
                "num_turns": 1,
                "session_id": "s1",
                "result": "Hello",
                "usage": {"input_tokens": 4, "output_tokens": 2}
            })],
        };
        let result = execute(
            &config(),
            &runner,
            None,
            vec![Message::user("Hi")],
            RequestSettings::default(),
            RequestParams::default(),
        )
        .await
        .unwrap();
        assert_eq!(result.response.parts[0].text, "Hello");
        assert_eq!(result.response.usage.input, 4);
    }

    #[tokio::test]
    async fn is_error_terminal_event_raises_execution_error() {
        let runner = CannedRunner {
            events: vec![serde_json::json!({
                "subtype": "error_during_execution",
                "is_error": true,
                "duration_ms": 10,
                "num_turns": 1,
                "session_id": "s1",
            })],
        };
        let err = execute(
            &config(),
            &runner,
            None,
            vec![Message::user("Hi")],
            RequestSettings::default(),
            RequestParams::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Execution { .. }));
    }

    #[tokio::test]
    async fn mutual_exclusion_fails_before_any_subprocess_launch() {
        let runner = CannedRunner { events: vec![] };
        let settings = RequestSettings {
            resume: Some("s1".into()),
            continue_conversation: true,
            ..Default::default()
        };
        let err = execute(&config(), &runner, None, vec![Message::user("Hi")], settings, RequestParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn stream_ending_without_terminal_event_is_invalid_response() {
        let runner = CannedRunner {
            events: vec![serde_json::json!({"type": "assistant", "message": {"content": []}})],
        };
        let err = execute(&config(), &runner, None, vec![Message::user("Hi")], RequestSettings::default(), RequestParams::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Execution {
                kind: ErrorKind::InvalidResponse,
                ..
            }
        ));
    }

    #[test]
    fn message_role_round_trips_through_json() {
        let msg = Message::user("hi");
        assert_eq!(msg.role, MessageRole::User);
    }

    /// A stream that never produces an item, so `collect_stream`'s timeout
    /// branch always fires. Flips `dropped` when it is torn down, proving
    /// `AbortReaderOnDrop`'s cleanup path actually runs rather than merely
    /// existing.
    struct NeverEndingStream {
        dropped: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Stream for NeverEndingStream {
        type Item = CliEvent;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
            std::task::Poll::Pending
        }
    }

    impl Drop for NeverEndingStream {
        fn drop(&mut self) {
            self.dropped.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    struct HangingRunner {
        dropped: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl QueryRunner for HangingRunner {
        async fn run(&self, _invocation: &CliInvocation) -> crate::Result<Pin<Box<dyn Stream<Item = CliEvent> + Send>>> {
            let reader_task = tokio::spawn(std::future::pending::<()>());
            Ok(Box::pin(AbortReaderOnDrop {
                inner: Box::pin(NeverEndingStream {
                    dropped: self.dropped.clone(),
                }),
                reader_task,
            }))
        }
    }

    #[tokio::test]
    async fn stream_that_never_yields_a_terminal_event_times_out_and_tears_down() {
        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let runner = HangingRunner { dropped: dropped.clone() };
        let settings = RequestSettings {
            timeout_secs: Some(0.01),
            ..Default::default()
        };
        let err = execute(&config(), &runner, None, vec![Message::user("Hi")], settings, RequestParams::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Execution {
                kind: ErrorKind::Timeout,
                ..
            }
        ));
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
    }
}
