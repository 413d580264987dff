//! Configures a restriction table that denies background shell execution
//! and checks a couple of proposed `Bash` invocations against it directly —
//! the same gate the orchestrator consults before every built-in-tool call.

use claude_code_adapter::orchestrator::check_permission;
use claude_code_adapter::{ConfigurationBuilder, PermissionDecision};
use std::collections::HashMap;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut row = HashMap::new();
    row.insert("run_in_background".to_string(), serde_json::json!(false));
    let mut restrictions = HashMap::new();
    restrictions.insert("Bash".to_string(), row);

    let config = ConfigurationBuilder::default()
        .model("claude-sonnet-4-5")
        .restrictions(restrictions)
        .build()?;

    let foreground = check_permission(&config, "Bash", &serde_json::json!({"command": "ls", "run_in_background": false}));
    println!("foreground ls: {foreground:?}");
    assert_eq!(foreground, PermissionDecision::Allow);

    let background = check_permission(&config, "Bash", &serde_json::json!({"command": "sleep 999", "run_in_background": true}));
    println!("background sleep: {background:?}");
    assert!(matches!(background, PermissionDecision::Deny { .. }));

    Ok(())
}
