//! Jump-host chain orchestration for SSH terminals and port forwardings.
//!
//! A host with an ordered list of jump hosts is resolved into a chain of
//! hops, each bound to its own session handle. The chain is established hop
//! by hop (connect, then authenticate), every hop tunneled through the
//! previous one, and torn down in reverse order. Terminals and port
//! forwardings are registry entries that own one chain each.
//!
//! - `chain`: resolver, establisher and demolisher
//! - `registry`: copy-on-write storage of chained resources
//! - `resource`: shell and port forwarding lifecycle on top of a chain
//! - `transport`: the session handle boundary and its russh implementation
//! - `inventory`: read-only host, key and port forwarding lookups
//! - `mcp`: MCP tool surface

pub mod chain;
pub mod config;
pub mod error;
pub mod inventory;
pub mod mcp;
pub mod registry;
pub mod resource;
pub mod transport;
pub mod types;
