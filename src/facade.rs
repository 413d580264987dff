//! Public model facade: the object the agent framework actually holds.
//!
//! Owns the configuration, the registered toolset, and the currently
//! active tool-bridge session (if any tools are registered). This is the
//! crate's main entry point — construct with [`ClaudeCodeModel::new`],
//! register tools with [`ClaudeCodeModel::set_agent_toolsets`], and drive
//! requests with [`ClaudeCodeModel::request`] /
//! [`ClaudeCodeModel::request_with_metadata`] /
//! [`ClaudeCodeModel::stream_messages`].

use crate::error::Error;
use crate::orchestrator::{self, QueryRunner, StreamEvent, SubprocessRunner};
use crate::tool_server::{Session, ToolHandler, ToolHandlerMap};
use crate::tools::Tool;
use crate::types::{
    Configuration, Message, RequestParams, RequestSettings, Response, ResponseWithMetadata,
    ToolSchema,
};
use futures::stream::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use tracing::warn;

/// How tool advertisement reaches the CLI. `sdk` and `auto` are a
/// forward-compatibility seam (§9): `auto` is currently equivalent to
/// `stdio`, and the chosen mode is remembered across tool-subset rebuilds
/// rather than re-derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Sdk,
    Stdio,
    Auto,
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Auto
    }
}

/// Read-only facts about this model's output-handling capabilities.
#[derive(Debug, Clone)]
pub struct Profile {
    pub supports_native_structured_output: bool,
    pub default_output_mode: crate::types::OutputMode,
}

impl Default for Profile {
    fn default() -> Self {
        Profile {
            supports_native_structured_output: true,
            default_output_mode: crate::types::OutputMode::Native,
        }
    }
}

/// The system-identifier string this model reports to callers.
pub const SYSTEM_IDENTIFIER: &str = "claude-code";

/// The agent-framework-facing model object.
pub struct ClaudeCodeModel {
    config: Configuration,
    runner: Box<dyn QueryRunner>,
    tools: HashMap<String, Tool>,
    transport: Transport,
    session: Option<Session>,
}

impl ClaudeCodeModel {
    /// Construct a facade over `config`, spawning the real CLI binary for
    /// every request.
    pub fn new(config: Configuration) -> Self {
        Self::with_runner(config, Box::new(SubprocessRunner::default()))
    }

    /// Construct a facade with a custom [`QueryRunner`] — used in tests to
    /// substitute the subprocess boundary with a canned event stream.
    pub fn with_runner(config: Configuration, runner: Box<dyn QueryRunner>) -> Self {
        Self {
            config,
            runner,
            tools: HashMap::new(),
            transport: Transport::default(),
            session: None,
        }
    }

    pub fn model_name(&self) -> &str {
        self.config.model()
    }

    pub fn system_identifier(&self) -> &str {
        SYSTEM_IDENTIFIER
    }

    pub fn profile(&self) -> Profile {
        Profile::default()
    }

    /// The tool-server configs currently advertised, for test inspection.
    pub fn advertised_tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(Tool::to_schema).collect()
    }

    /// Overwrite the registered toolset and, for `stdio`/`auto` transport,
    /// rebuild the session. Overwriting an existing registration logs a
    /// warning.
    pub async fn set_agent_toolsets(&mut self, tools: Vec<Tool>, transport: Transport) -> crate::Result<()> {
        if !self.tools.is_empty() {
            warn!("overwriting an already-registered toolset");
        }

        if let Some(mut session) = self.session.take() {
            session.stop().await;
        }

        self.transport = transport;
        self.tools = tools.into_iter().map(|t| (t.name().to_string(), t)).collect();

        if matches!(self.transport, Transport::Stdio | Transport::Auto) && !self.tools.is_empty() {
            self.session = Some(self.build_session(self.tools.values()));
        }

        Ok(())
    }

    fn build_session<'a>(&self, tools: impl Iterator<Item = &'a Tool>) -> Session {
        let mut handlers: HashMap<String, ToolHandler> = HashMap::new();
        let mut schemas = Vec::new();
        for tool in tools {
            let tool = tool.clone();
            schemas.push(tool.to_schema());
            let tool_for_handler = tool.clone();
            handlers.insert(
                tool.name().to_string(),
                Arc::new(move |args: serde_json::Value| {
                    let tool = tool_for_handler.clone();
                    Box::pin(async move { Ok(tool.invoke(args).await) })
                }),
            );
        }
        Session::new(Arc::new(handlers) as ToolHandlerMap, schemas)
    }

    /// Resolve the requested tool subset against the registry (§4.7 step 1):
    /// an empty request is a no-op, an unregistered name fails loudly, and a
    /// non-empty subset rebuilds the session scoped to just those tools.
    async fn process_function_tools(&mut self, requested: &[String]) -> crate::Result<()> {
        if requested.is_empty() {
            return Ok(());
        }
        if self.tools.is_empty() {
            return Err(Error::ToolsetNotRegistered {
                requested: requested.to_vec(),
            });
        }

        let missing: Vec<String> = requested
            .iter()
            .filter(|name| !self.tools.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::ToolNotFound {
                missing,
                available: self.tools.keys().cloned().collect(),
            });
        }

        if let Some(mut session) = self.session.take() {
            session.stop().await;
        }
        if matches!(self.transport, Transport::Stdio | Transport::Auto) {
            let subset = self.tools.values().filter(|t| requested.contains(&t.name().to_string()));
            let mut session = self.build_session(subset);
            session.start().await?;
            self.session = Some(session);
        }
        Ok(())
    }

    async fn ensure_session_started(&mut self) -> crate::Result<()> {
        if let Some(session) = self.session.as_mut() {
            session.start().await?;
        }
        Ok(())
    }

    /// Run one request end to end, tearing the session down on every exit
    /// path (success or failure).
    pub async fn request_with_metadata(
        &mut self,
        messages: Vec<Message>,
        settings: RequestSettings,
        params: RequestParams,
    ) -> crate::Result<ResponseWithMetadata> {
        self.process_function_tools(&params.function_tools).await?;
        self.ensure_session_started().await?;

        let result = orchestrator::execute(
            &self.config,
            self.runner.as_ref(),
            self.session.as_ref(),
            messages,
            settings,
            params,
        )
        .await;

        if let Some(session) = self.session.as_mut() {
            session.stop().await;
        }

        result
    }

    /// Like [`Self::request_with_metadata`] but returns only the response.
    pub async fn request(
        &mut self,
        messages: Vec<Message>,
        settings: RequestSettings,
        params: RequestParams,
    ) -> crate::Result<Response> {
        self.request_with_metadata(messages, settings, params)
            .await
            .map(|r| r.response)
    }

    /// Like [`Self::request_with_metadata`], but yields every event off the
    /// CLI — assistant messages, tool calls, and finally the terminal event
    /// — instead of collapsing the stream down to one response. Shares the
    /// same session lifecycle and timeout discipline: the session this call
    /// started is torn down once the returned stream is exhausted or
    /// dropped, whichever comes first.
    pub async fn stream_messages(
        &mut self,
        messages: Vec<Message>,
        settings: RequestSettings,
        params: RequestParams,
    ) -> crate::Result<Pin<Box<dyn Stream<Item = crate::Result<StreamEvent>> + Send>>> {
        self.process_function_tools(&params.function_tools).await?;
        self.ensure_session_started().await?;

        let session = self.session.take();
        let inner = orchestrator::stream(
            &self.config,
            self.runner.as_ref(),
            session.as_ref(),
            messages,
            settings,
            params,
        )
        .await;

        let inner = match inner {
            Ok(inner) => inner,
            Err(e) => {
                if let Some(mut session) = session {
                    session.stop().await;
                }
                return Err(e);
            }
        };

        Ok(Box::pin(SessionScopedStream { inner, session }))
    }
}

/// Ties a streamed query to the session it was built against: the wrapped
/// stream is delegated to verbatim, but dropping this value also tears the
/// session down, the same "finally-equivalent guard" `request_with_metadata`
/// runs inline. Session teardown only aborts a background task and unlinks
/// two files, so running it detached off `Drop` is safe the same way
/// `AbortReaderOnDrop` aborting its reader task from `Drop` is.
struct SessionScopedStream {
    inner: Pin<Box<dyn Stream<Item = crate::Result<StreamEvent>> + Send>>,
    session: Option<Session>,
}

impl Stream for SessionScopedStream {
    type Item = crate::Result<StreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.inner.as_mut().poll_next(cx)
    }
}

impl Drop for SessionScopedStream {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            tokio::spawn(async move { session.stop().await; });
        }
    }
}

impl std::fmt::Debug for ClaudeCodeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeCodeModel")
            .field("model", &self.config.model())
            .field("tool_count", &self.tools.len())
            .field("transport", &self.transport)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{CliEvent, CliInvocation};
    use crate::types::ConfigurationBuilder;
    use async_trait::async_trait;
    use futures::stream::{self, Stream};
    use std::pin::Pin;

    struct CannedRunner {
        events: Vec<serde_json::Value>,
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

    fn success_event(result: &str) -> serde_json::Value {
        serde_json::json!({
            "subtype": "success",
            "is_error": false,
            "duration_ms": 10,
            "num_turns": 1,
            "session_id": "s1",
            "result": result,
            "usage": {"input_tokens": 1, "output_tokens": 1},
        })
    }

    #[tokio::test]
    async fn request_without_tools_returns_plain_response() {
        let runner = CannedRunner {
            events: vec![success_event("Hello")],
        };
        let mut model = ClaudeCodeModel::with_runner(config(), Box::new(runner));
        let response = model
            .request(vec![Message::user("Hi")], RequestSettings::default(), RequestParams::default())
            .await
            .unwrap();
        assert_eq!(response.parts[0].text, "Hello");
    }

    #[tokio::test]
    async fn requesting_unregistered_tool_name_fails() {
        let runner = CannedRunner {
            events: vec![success_event("Hello")],
        };
        let mut model = ClaudeCodeModel::with_runner(config(), Box::new(runner));
        let params = RequestParams {
            function_tools: vec!["missing".to_string()],
            ..Default::default()
        };
        let err = model
            .request(vec![Message::user("Hi")], RequestSettings::default(), params)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolsetNotRegistered { .. }));
    }

    #[tokio::test]
    async fn profile_reports_native_structured_output_support() {
        let model = ClaudeCodeModel::with_runner(config(), Box::new(CannedRunner { events: vec![] }));
        assert!(model.profile().supports_native_structured_output);
    }

    #[tokio::test]
    async fn set_agent_toolsets_builds_a_session_for_stdio_transport() {
        let mut model = ClaudeCodeModel::with_runner(config(), Box::new(CannedRunner { events: vec![] }));
        let tool = crate::tools::tool("add", "adds two numbers")
            .param("a", "int")
            .param("b", "int")
            .build(|args| async move {
                let a = args.get("a").and_then(serde_json::Value::as_i64).unwrap_or(0);
                let b = args.get("b").and_then(serde_json::Value::as_i64).unwrap_or(0);
                Ok(serde_json::Value::String((a + b).to_string()))
            })
            .unwrap();
        model.set_agent_toolsets(vec![tool], Transport::Stdio).await.unwrap();
        assert_eq!(model.advertised_tool_schemas().len(), 1);
    }

    #[tokio::test]
    async fn stream_messages_yields_intermediate_events_then_the_terminal_event() {
        use futures::StreamExt;

        let assistant_event = serde_json::json!({"type": "assistant", "message": {"content": []}});
        let runner = CannedRunner {
            events: vec![assistant_event.clone(), success_event("Hello")],
        };
        let mut model = ClaudeCodeModel::with_runner(config(), Box::new(runner));
        let mut events = model
            .stream_messages(vec![Message::user("Hi")], RequestSettings::default(), RequestParams::default())
            .await
            .unwrap();

        let first = events.next().await.unwrap().unwrap();
        assert!(matches!(first, orchestrator::StreamEvent::Message(v) if v == assistant_event));

        let second = events.next().await.unwrap().unwrap();
        assert!(matches!(second, orchestrator::StreamEvent::Terminal(t) if t.result.as_deref() == Some("Hello")));

        assert!(events.next().await.is_none());
    }
}
