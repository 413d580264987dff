//! End-to-end coverage of the facade's request pipeline: plain text,
//! structured-output recovery, and the built-in-tool permission gate.

use claude_code_adapter::orchestrator::{CliEvent, CliInvocation, QueryRunner, check_permission};
use claude_code_adapter::{
    ClaudeCodeModel, Configuration, ConfigurationBuilder, Message, OutputMode, OutputSchema,
    PermissionDecision, RequestParams, RequestSettings,
};
use async_trait::async_trait;
use futures::stream::{self, Stream};
use std::pin::Pin;

struct CannedRunner {
    events: Vec<serde_json::Value>,
}

#[async_trait]
impl QueryRunner for CannedRunner {
    async fn run(&self, _invocation: &CliInvocation) -> claude_code_adapter::Result<Pin<Box<dyn Stream<Item = CliEvent> + Send>>> {
        Ok(Box::pin(stream::iter(self.events.clone())))
    }
}

fn config() -> Configuration {
    ConfigurationBuilder::default().model("claude-sonnet-4-5").build().unwrap()
}

fn schema_params() -> RequestParams {
    RequestParams {
        output_mode: OutputMode::Native,
        output_schema: Some(OutputSchema {
            name: "answer".to_string(),
            schema: serde_json::json!({"type": "object", "properties": {"sum": {"type": "integer"}}}),
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn plain_text_round_trip_through_the_facade() {
    let runner = CannedRunner {
        events: vec![serde_json::json!({
            "subtype": "success",
            "is_error": false,
            "duration_ms": 12,
            "num_turns": 1,
            "session_id": "s1",
            "result": "The answer is 4.",
            "usage": {"input_tokens": 5, "output_tokens": 6},
        })],
    };
    let mut model = ClaudeCodeModel::with_runner(config(), Box::new(runner));
    let response = model
        .request(vec![Message::user("What is 2+2?")], RequestSettings::default(), RequestParams::default())
        .await
        .unwrap();
    assert_eq!(response.parts.len(), 1);
    assert_eq!(response.parts[0].text, "The answer is 4.");
    assert_eq!(response.usage.input, 5);
}

#[tokio::test]
async fn recovers_structured_output_from_a_wrapped_result_string() {
    // The CLI gave up retrying for a schema-conformant tool call, but its
    // plain-text result is still a JSON object wrapped in a single
    // "parameters" key — stage one should unwrap it without error.
    let runner = CannedRunner {
        events: vec![serde_json::json!({
            "subtype": "error_max_structured_output_retries",
            "is_error": false,
            "duration_ms": 40,
            "num_turns": 3,
            "session_id": "s2",
            "result": "{\"parameters\": {\"sum\": 4}}",
            "usage": {"input_tokens": 9, "output_tokens": 3},
        })],
    };
    let mut model = ClaudeCodeModel::with_runner(config(), Box::new(runner));
    let response = model
        .request(vec![Message::user("Add 2 and 2, respond as JSON")], RequestSettings::default(), schema_params())
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&response.parts[0].text).unwrap();
    assert_eq!(parsed["sum"], 4);
}

#[tokio::test]
async fn recovers_structured_output_from_a_captured_tool_use_block_when_result_is_unusable() {
    // Stage one's candidate doesn't parse as JSON, so recovery falls back to
    // the last StructuredOutput tool-use block seen mid-stream.
    let runner = CannedRunner {
        events: vec![
            serde_json::json!({
                "type": "assistant",
                "message": {
                    "content": [
                        {"type": "tool_use", "name": "StructuredOutput", "input": {"sum": 4}}
                    ]
                }
            }),
            serde_json::json!({
                "subtype": "error_max_structured_output_retries",
                "is_error": false,
                "duration_ms": 40,
                "num_turns": 3,
                "session_id": "s3",
                "result": "not json at all",
                "usage": {"input_tokens": 9, "output_tokens": 3},
            }),
        ],
    };
    let mut model = ClaudeCodeModel::with_runner(config(), Box::new(runner));
    let response = model
        .request(vec![Message::user("Add 2 and 2, respond as JSON")], RequestSettings::default(), schema_params())
        .await
        .unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&response.parts[0].text).unwrap();
    assert_eq!(parsed["sum"], 4);
}

#[tokio::test]
async fn recovery_fails_with_diagnostics_when_nothing_is_salvageable() {
    let runner = CannedRunner {
        events: vec![serde_json::json!({
            "subtype": "error_max_structured_output_retries",
            "is_error": false,
            "duration_ms": 40,
            "num_turns": 3,
            "session_id": "s4",
            "result": "not json at all",
            "usage": {"input_tokens": 9, "output_tokens": 3},
        })],
    };
    let mut model = ClaudeCodeModel::with_runner(config(), Box::new(runner));
    let err = model
        .request(vec![Message::user("Add 2 and 2, respond as JSON")], RequestSettings::default(), schema_params())
        .await
        .unwrap_err();
    assert!(matches!(err, claude_code_adapter::Error::StructuredOutput { .. }));
}

#[tokio::test]
async fn permission_gate_denies_a_restricted_argument_value() {
    let mut restrictions = std::collections::HashMap::new();
    let mut row = std::collections::HashMap::new();
    row.insert("run_in_background".to_string(), serde_json::json!(false));
    restrictions.insert("Bash".to_string(), row);

    let config = ConfigurationBuilder::default()
        .model("claude-sonnet-4-5")
        .restrictions(restrictions)
        .build()
        .unwrap();

    let decision = check_permission(&config, "Bash", &serde_json::json!({"run_in_background": true}));
    assert!(matches!(decision, PermissionDecision::Deny { .. }));
}

#[tokio::test]
async fn permission_gate_allows_a_matching_argument_value() {
    let mut restrictions = std::collections::HashMap::new();
    let mut row = std::collections::HashMap::new();
    row.insert("run_in_background".to_string(), serde_json::json!(false));
    restrictions.insert("Bash".to_string(), row);

    let config = ConfigurationBuilder::default()
        .model("claude-sonnet-4-5")
        .restrictions(restrictions)
        .build()
        .unwrap();

    let decision = check_permission(&config, "Bash", &serde_json::json!({"run_in_background": false}));
    assert_eq!(decision, PermissionDecision::Allow);
}

#[tokio::test]
async fn resume_and_continue_conversation_are_mutually_exclusive() {
    let runner = CannedRunner { events: vec![] };
    let mut model = ClaudeCodeModel::with_runner(config(), Box::new(runner));
    let settings = RequestSettings {
        resume: Some("prior-session".to_string()),
        continue_conversation: true,
        ..Default::default()
    };
    let err = model
        .request(vec![Message::user("Hi")], settings, RequestParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, claude_code_adapter::Error::InvalidInput(_)));
}
