#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use poem_mcpserver::McpServer;
use ssh_jump_mcp::mcp::{JumpState, McpJumpCommands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol, logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let state = Arc::new(JumpState::from_env()?);
    poem_mcpserver::stdio::stdio(McpServer::new().tools(McpJumpCommands::new(state.clone())))
        .await?;
    state.shutdown().await;
    Ok(())
}
