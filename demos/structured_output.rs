//! Requests a JSON-schema-shaped answer and shows the recovery cascade
//! rescuing it after the CLI reports it gave up retrying for a conformant
//! tool call — the wrapped result string gets unwrapped instead of failing
//! the request outright.

#[path = "support.rs"]
mod support;

use claude_code_adapter::{
    ClaudeCodeModel, ConfigurationBuilder, Message, OutputMode, OutputSchema, RequestParams,
    RequestSettings,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigurationBuilder::default().model("claude-sonnet-4-5").build()?;
    let runner = support::ScriptedRunner {
        events: vec![serde_json::json!({
            "subtype": "error_max_structured_output_retries",
            "is_error": false,
            "duration_ms": 340,
            "num_turns": 4,
            "session_id": "demo-session",
            "result": "{\"parameters\": {\"sum\": 42}}",
            "usage": {"input_tokens": 40, "output_tokens": 12},
        })],
    };
    let mut model = ClaudeCodeModel::with_runner(config, Box::new(runner));

    let params = RequestParams {
        output_mode: OutputMode::Native,
        output_schema: Some(OutputSchema {
            name: "sum_answer".to_string(),
            schema: serde_json::json!({"type": "object", "properties": {"sum": {"type": "integer"}}}),
        }),
        ..Default::default()
    };

    let response = model
        .request(vec![Message::user("What is 19 + 23? Respond as JSON.")], RequestSettings::default(), params)
        .await?;

    println!("recovered structured output: {}", response.parts[0].text);
    Ok(())
}
