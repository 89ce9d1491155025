//! MCP tool surface over the terminal and port forwarding registries.
//!
//! This module is organized into the following submodules:
//!
//! - `types`: Serializable response types for MCP tools
//! - `schema`: JSON Schema helpers for unsigned fields
//! - `state`: Inventory, transport and managers shared by all tool calls
//! - `commands`: MCP tool implementations

pub mod commands;
pub mod schema;
pub mod state;
pub mod types;

pub use commands::McpJumpCommands;
pub use state::JumpState;
