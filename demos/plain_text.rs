//! Simplest possible request: one user message, no tools, no output schema.

#[path = "support.rs"]
mod support;

use claude_code_adapter::{ClaudeCodeModel, ConfigurationBuilder, Message, RequestParams, RequestSettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigurationBuilder::default().model("claude-sonnet-4-5").build()?;
    let runner = support::ScriptedRunner {
        events: vec![support::success_event("Paris is the capital of France.")],
    };
    let mut model = ClaudeCodeModel::with_runner(config, Box::new(runner));

    let response = model
        .request(
            vec![Message::user("What is the capital of France?")],
            RequestSettings::default(),
            RequestParams::default(),
        )
        .await?;

    for part in response.parts {
        println!("{}", part.text);
    }
    Ok(())
}
