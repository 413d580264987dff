//! Builds a tool with the fluent builder, stands up a tool-call session for
//! it, and drives one call through the same length-prefixed Unix-socket
//! protocol the bridge subprocess speaks to the parent.

use claude_code_adapter::bridge::IpcClient;
use claude_code_adapter::tool_server::{Session, ToolHandler, ToolHandlerMap};
use claude_code_adapter::tool;
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let add = tool("add", "adds two integers")
        .param("a", "int")
        .param("b", "int")
        .build(|args| async move {
            let a = args.get("a").and_then(serde_json::Value::as_i64).unwrap_or(0);
            let b = args.get("b").and_then(serde_json::Value::as_i64).unwrap_or(0);
            Ok(serde_json::Value::String((a + b).to_string()))
        })?;

    let schema = add.to_schema();
    let mut handlers: HashMap<String, ToolHandler> = HashMap::new();
    let add_for_handler = add.clone();
    handlers.insert(
        schema.name.clone(),
        Arc::new(move |args: serde_json::Value| {
            let add = add_for_handler.clone();
            Box::pin(async move { Ok(add.invoke(args).await) })
        }),
    );

    let mut session = Session::new(Arc::new(handlers) as ToolHandlerMap, vec![schema]);
    session.start().await?;

    let mut client = IpcClient::new(session.socket_path.clone());
    let texts = client.call_tool("add", serde_json::json!({"a": 17, "b": 25})).await?;
    println!("add(17, 25) = {}", texts.join(""));

    client.close().await;
    session.stop().await;
    Ok(())
}
