#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use poem::{EndpointExt, Route, Server, listener::TcpListener, middleware::Tracing};
use poem_mcpserver::{McpServer, streamable_http};
use ssh_jump_mcp::config::resolve_mcp_port;
use ssh_jump_mcp::mcp::{JumpState, McpJumpCommands};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Initialize logging with proper tracing default
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let state = Arc::new(JumpState::from_env()?);

    let mcp_addr = format!("0.0.0.0:{}", resolve_mcp_port(None));
    info!("Starting MCP server on {}", mcp_addr);

    // Every session of the endpoint shares the same registries
    let tools_state = state.clone();
    let app = Route::new()
        .at(
            "/",
            streamable_http::endpoint(move |_| {
                McpServer::new().tools(McpJumpCommands::new(tools_state.clone()))
            }),
        )
        .with(Tracing);

    info!(
        "MCP Server with jump-host support is ready ({} hosts)",
        state.inventory.hosts().len()
    );
    info!("Use host_list and terminal_open to open a shell through jump hosts");
    info!("Use port_forwarding_list and forwarding_start to run a port forwarding");

    Server::new(TcpListener::bind(mcp_addr))
        .name("SSH Jump MCP Server")
        .run_with_graceful_shutdown(
            app,
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
            Some(Duration::from_secs(5)),
        )
        .await?;

    info!("Shutting down, closing all chains");
    state.shutdown().await;

    Ok(())
}
