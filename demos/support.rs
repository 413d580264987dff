//! Shared stub runner for the example binaries. A real deployment drives
//! [`claude_code_adapter::orchestrator::SubprocessRunner`] against an
//! installed `claude` binary; these demos substitute a canned event stream
//! so they run without that dependency, including in CI.

use async_trait::async_trait;
use claude_code_adapter::orchestrator::{CliEvent, CliInvocation, QueryRunner};
use futures::stream::{self, Stream};
use std::pin::Pin;

pub struct ScriptedRunner {
    pub events: Vec<serde_json::Value>,
}

#[async_trait]
impl QueryRunner for ScriptedRunner {
    async fn run(&self, _invocation: &CliInvocation) -> claude_code_adapter::Result<Pin<Box<dyn Stream<Item = CliEvent> + Send>>> {
        Ok(Box::pin(stream::iter(self.events.clone())))
    }
}

pub fn success_event(result: &str) -> serde_json::Value {
    serde_json::json!({
        "subtype": "success",
        "is_error": false,
        "duration_ms": 18,
        "num_turns": 1,
        "session_id": "demo-session",
        "result": result,
        "usage": {"input_tokens": 12, "output_tokens": 6},
    })
}
