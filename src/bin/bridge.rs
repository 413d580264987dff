//! Entry point for the `claude-code-bridge` binary.
//!
//! Invoked by the CLI as `claude-code-bridge <socket_path> <schema_path>`.
//! Validates argv, loads the tool schemas, and drives the bridge protocol
//! over stdin/stdout until the CLI closes the pipe.

use claude_code_adapter::bridge::{self, IpcClient};

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: {} <socket_path> <schema_path>", args.first().map(String::as_str).unwrap_or("claude-code-bridge"));
        std::process::exit(1);
    }

    let socket_path = std::path::PathBuf::from(&args[1]);
    let schema_path = std::path::PathBuf::from(&args[2]);

    let schemas = match bridge::load_schemas(&schema_path) {
        Ok(schemas) => schemas,
        Err(e) => {
            eprintln!("failed to read schema file {:?}: {e}", schema_path);
            std::process::exit(1);
        }
    };

    let mut client = IpcClient::new(socket_path);
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    if let Err(e) = bridge::run(schemas, &mut client, stdin, stdout).await {
        eprintln!("bridge exited with error: {e}");
        client.close().await;
        std::process::exit(1);
    }
}
