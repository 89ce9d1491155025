//! MCP jump-host tool implementation.
//!
//! Inventory:
//!
//! - `host_list`: Hosts that terminals can be opened on
//! - `port_forwarding_list`: Stored port forwardings that can be started
//!
//! Terminals:
//!
//! - `terminal_open`: Resolve the jump chain of a host and open a shell at its end
//! - `terminal_list` / `terminal_status`: Per-hop progress and errors
//! - `terminal_retry`, `terminal_trust_host_key`, `terminal_reauthenticate`:
//!   Resume a failed chain from the hop it stopped at
//! - `terminal_send`, `terminal_read`, `terminal_resize`: Drive the shell
//! - `terminal_close`: Close the shell and tear the chain down
//!
//! Port forwardings follow the same shape with `forwarding_*` tools.
//!
//! Establishment runs in the background. Tools that start or resume a chain
//! accept `wait_secs` to block until the resource leaves `pending`.

use std::sync::Arc;

use poem_mcpserver::{Tools, content::Text, tool::StructuredContent};
use tracing::{error, info};

use super::state::{JumpState, parse_uuid, settle};
use super::types::{
    ForwardingInfo, ForwardingListResponse, HostInfo, HostListResponse,
    PortForwardingInfo, PortForwardingListResponse, TerminalInfo, TerminalListResponse,
    TerminalOutputResponse,
};
use crate::error::SessionError;
use crate::resource::{Credentials, TerminalOptions};
use crate::types::{CheckServerKey, ShellSize};

fn tool_error(err: SessionError) -> String {
    err.to_string()
}

fn shell_size(
    cols: Option<u32>,
    rows: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
) -> ShellSize {
    let default = ShellSize::default();
    ShellSize {
        col: cols.unwrap_or(default.col),
        row: rows.unwrap_or(default.row),
        width: width.unwrap_or(default.width),
        height: height.unwrap_or(default.height),
    }
}

fn trust_decision(permanent: Option<bool>) -> CheckServerKey {
    if permanent.unwrap_or(false) {
        CheckServerKey::AddAndContinue
    } else {
        CheckServerKey::Continue
    }
}

/// MCP jump-host tools over one shared [`JumpState`].
pub struct McpJumpCommands {
    state: Arc<JumpState>,
}

impl McpJumpCommands {
    pub fn new(state: Arc<JumpState>) -> Self {
        Self { state }
    }
}

#[Tools]
impl McpJumpCommands {
    /// List the hosts from the inventory, with the jump hosts each one is reached through.
    async fn host_list(&self) -> StructuredContent<HostListResponse> {
        let hosts: Vec<HostInfo> = self.state.inventory.hosts().iter().map(HostInfo::from).collect();
        let count = hosts.len();
        StructuredContent(HostListResponse { hosts, count })
    }

    /// List the stored port forwardings that `forwarding_start` accepts.
    async fn port_forwarding_list(&self) -> StructuredContent<PortForwardingListResponse> {
        let port_forwardings: Vec<PortForwardingInfo> = self
            .state
            .inventory
            .port_forwardings()
            .iter()
            .map(PortForwardingInfo::from)
            .collect();
        let count = port_forwardings.len();
        StructuredContent(PortForwardingListResponse {
            port_forwardings,
            count,
        })
    }

    /// Open an interactive shell on a host, connecting through its jump hosts in order.
    ///
    /// Returns immediately with status `pending` unless `wait_secs` is given.
    /// When the status is `failed`, each hop's `error.suggested_action` tells
    /// which tool resumes it: `terminal_trust_host_key`, `terminal_reauthenticate`
    /// or `terminal_retry`.
    #[allow(clippy::too_many_arguments)]
    async fn terminal_open(
        &self,
        /// Inventory id of the host to open the shell on
        host_id: String,
        /// Terminal width in columns (default: 80)
        cols: Option<u32>,
        /// Terminal height in rows (default: 24)
        rows: Option<u32>,
        /// Terminal width in pixels (default: 0)
        width: Option<u32>,
        /// Terminal height in pixels (default: 0)
        height: Option<u32>,
        /// TERM value for the remote shell (default: xterm-256color)
        term: Option<String>,
        /// Seconds to wait for the chain to be established (default: 0, max: 120)
        wait_secs: Option<u64>,
    ) -> Result<StructuredContent<TerminalInfo>, String> {
        let options = TerminalOptions {
            size: shell_size(cols, rows, width, height),
            term,
            envs: Vec::new(),
        };
        let terminal = self
            .state
            .terminals
            .open(&host_id, options)
            .map_err(|e| {
                error!("Failed to open terminal on {}: {}", host_id, e);
                tool_error(e)
            })?;
        let terminal = settle(self.state.terminals.registry(), terminal.uuid, wait_secs)
            .await
            .map_err(tool_error)?;
        Ok(StructuredContent(TerminalInfo::from(&terminal)))
    }

    /// List open terminals with the status of every hop.
    async fn terminal_list(&self) -> StructuredContent<TerminalListResponse> {
        let terminals: Vec<TerminalInfo> = self
            .state
            .terminals
            .list()
            .iter()
            .map(TerminalInfo::from)
            .collect();
        let count = terminals.len();
        StructuredContent(TerminalListResponse { terminals, count })
    }

    /// Get the status of one terminal, optionally waiting while it is `pending`.
    async fn terminal_status(
        &self,
        /// Terminal ID returned by terminal_open
        terminal_id: String,
        /// Seconds to wait while the terminal is pending (default: 0, max: 120)
        wait_secs: Option<u64>,
    ) -> Result<StructuredContent<TerminalInfo>, String> {
        let uuid = parse_uuid(&terminal_id).map_err(tool_error)?;
        let terminal = settle(self.state.terminals.registry(), uuid, wait_secs)
            .await
            .map_err(tool_error)?;
        Ok(StructuredContent(TerminalInfo::from(&terminal)))
    }

    /// Close a terminal's shell and disconnect every hop of its chain, target first.
    async fn terminal_close(
        &self,
        /// Terminal ID to close
        terminal_id: String,
    ) -> Result<StructuredContent<TerminalInfo>, String> {
        let uuid = parse_uuid(&terminal_id).map_err(tool_error)?;
        let terminal = self.state.terminals.close(uuid).map_err(tool_error)?;
        info!("Closed terminal {} via MCP", terminal_id);
        Ok(StructuredContent(TerminalInfo::from(&terminal)))
    }

    /// Resume a failed terminal from the hop it stopped at.
    ///
    /// Hops that are already authenticated are not touched. When every hop is
    /// authenticated only the shell is opened again.
    async fn terminal_retry(
        &self,
        /// Terminal ID to retry
        terminal_id: String,
        /// Seconds to wait for the result (default: 0, max: 120)
        wait_secs: Option<u64>,
    ) -> Result<StructuredContent<TerminalInfo>, String> {
        let uuid = parse_uuid(&terminal_id).map_err(tool_error)?;
        self.state.terminals.retry(uuid).map_err(tool_error)?;
        let terminal = settle(self.state.terminals.registry(), uuid, wait_secs)
            .await
            .map_err(tool_error)?;
        Ok(StructuredContent(TerminalInfo::from(&terminal)))
    }

    /// Accept the unknown host key reported by the current hop and reconnect it.
    async fn terminal_trust_host_key(
        &self,
        /// Terminal ID whose current hop reported UnknownKey
        terminal_id: String,
        /// Also record the key in known_hosts (default: false, trust once)
        permanent: Option<bool>,
        /// Seconds to wait for the result (default: 0, max: 120)
        wait_secs: Option<u64>,
    ) -> Result<StructuredContent<TerminalInfo>, String> {
        let uuid = parse_uuid(&terminal_id).map_err(tool_error)?;
        self.state
            .terminals
            .reconnect(uuid, trust_decision(permanent))
            .map_err(tool_error)?;
        let terminal = settle(self.state.terminals.registry(), uuid, wait_secs)
            .await
            .map_err(tool_error)?;
        Ok(StructuredContent(TerminalInfo::from(&terminal)))
    }

    /// Retry the current hop of a terminal with different credentials.
    async fn terminal_reauthenticate(
        &self,
        /// Terminal ID whose current hop failed authentication
        terminal_id: String,
        /// New password for the hop
        password: Option<String>,
        /// Inventory id of a different key for the hop
        key_id: Option<String>,
        /// Seconds to wait for the result (default: 0, max: 120)
        wait_secs: Option<u64>,
    ) -> Result<StructuredContent<TerminalInfo>, String> {
        let uuid = parse_uuid(&terminal_id).map_err(tool_error)?;
        self.state
            .terminals
            .reauthenticate(uuid, Credentials { password, key_id })
            .map_err(tool_error)?;
        let terminal = settle(self.state.terminals.registry(), uuid, wait_secs)
            .await
            .map_err(tool_error)?;
        Ok(StructuredContent(TerminalInfo::from(&terminal)))
    }

    /// Send input to a terminal's shell. Include "\n" to submit a command line.
    async fn terminal_send(
        &self,
        /// Terminal ID to write to
        terminal_id: String,
        /// Text to send as-is
        input: String,
    ) -> Result<Text<String>, String> {
        let uuid = parse_uuid(&terminal_id).map_err(tool_error)?;
        self.state
            .terminals
            .send(uuid, input.as_bytes())
            .await
            .map_err(tool_error)?;
        Ok(Text(format!(
            "Sent {} bytes to terminal {}",
            input.len(),
            terminal_id
        )))
    }

    /// Read shell output buffered since `offset`.
    ///
    /// Pass the returned `next_offset` on the next call to get only new output.
    async fn terminal_read(
        &self,
        /// Terminal ID to read from
        terminal_id: String,
        /// Byte offset to read from (default: 0, the start of the session)
        offset: Option<usize>,
    ) -> Result<StructuredContent<TerminalOutputResponse>, String> {
        let uuid = parse_uuid(&terminal_id).map_err(tool_error)?;
        let output = self
            .state
            .terminals
            .read(uuid, offset.unwrap_or(0))
            .await
            .map_err(tool_error)?;
        let status = self.state.terminals.get(uuid).map_err(tool_error)?.status;
        Ok(StructuredContent(TerminalOutputResponse::new(
            terminal_id,
            status,
            output,
        )))
    }

    /// Change the window size of a terminal's shell.
    async fn terminal_resize(
        &self,
        /// Terminal ID to resize
        terminal_id: String,
        /// Width in columns
        cols: u32,
        /// Height in rows
        rows: u32,
        /// Width in pixels (default: 0)
        width: Option<u32>,
        /// Height in pixels (default: 0)
        height: Option<u32>,
    ) -> Result<Text<String>, String> {
        let uuid = parse_uuid(&terminal_id).map_err(tool_error)?;
        let size = shell_size(Some(cols), Some(rows), width, height);
        self.state
            .terminals
            .resize(uuid, size)
            .await
            .map_err(tool_error)?;
        Ok(Text(format!(
            "Resized terminal {} to {}x{}",
            terminal_id, cols, rows
        )))
    }

    /// Start a stored port forwarding over its host's jump chain.
    ///
    /// A forwarding that is already running is returned as-is.
    async fn forwarding_start(
        &self,
        /// Id of the stored port forwarding (see port_forwarding_list)
        port_forwarding_id: String,
        /// Seconds to wait for the chain and listener (default: 0, max: 120)
        wait_secs: Option<u64>,
    ) -> Result<StructuredContent<ForwardingInfo>, String> {
        let forwarding = self
            .state
            .forwardings
            .start(&port_forwarding_id)
            .map_err(|e| {
                error!("Failed to start port forwarding {}: {}", port_forwarding_id, e);
                tool_error(e)
            })?;
        let forwarding = settle(self.state.forwardings.registry(), forwarding.uuid, wait_secs)
            .await
            .map_err(tool_error)?;
        Ok(StructuredContent(ForwardingInfo::from(&forwarding)))
    }

    /// List running port forwardings with the status of every hop.
    async fn forwarding_list(&self) -> StructuredContent<ForwardingListResponse> {
        let forwardings: Vec<ForwardingInfo> = self
            .state
            .forwardings
            .list()
            .iter()
            .map(ForwardingInfo::from)
            .collect();
        let count = forwardings.len();
        StructuredContent(ForwardingListResponse { forwardings, count })
    }

    /// Get the status of one port forwarding, optionally waiting while it is `pending`.
    async fn forwarding_status(
        &self,
        /// Forwarding ID returned by forwarding_start
        forwarding_id: String,
        /// Seconds to wait while the forwarding is pending (default: 0, max: 120)
        wait_secs: Option<u64>,
    ) -> Result<StructuredContent<ForwardingInfo>, String> {
        let uuid = parse_uuid(&forwarding_id).map_err(tool_error)?;
        let forwarding = settle(self.state.forwardings.registry(), uuid, wait_secs)
            .await
            .map_err(tool_error)?;
        Ok(StructuredContent(ForwardingInfo::from(&forwarding)))
    }

    /// Stop a port forwarding and disconnect its chain.
    async fn forwarding_stop(
        &self,
        /// Forwarding ID to stop
        forwarding_id: String,
    ) -> Result<StructuredContent<ForwardingInfo>, String> {
        let uuid = parse_uuid(&forwarding_id).map_err(tool_error)?;
        let forwarding = self
            .state
            .forwardings
            .stop(uuid)
            .await
            .map_err(tool_error)?;
        info!("Stopped port forwarding {} via MCP", forwarding_id);
        Ok(StructuredContent(ForwardingInfo::from(&forwarding)))
    }

    /// Resume a failed port forwarding from the hop it stopped at.
    ///
    /// When every hop is authenticated only the listener is opened again,
    /// e.g. after freeing a local port that was in use.
    async fn forwarding_retry(
        &self,
        /// Forwarding ID to retry
        forwarding_id: String,
        /// Seconds to wait for the result (default: 0, max: 120)
        wait_secs: Option<u64>,
    ) -> Result<StructuredContent<ForwardingInfo>, String> {
        let uuid = parse_uuid(&forwarding_id).map_err(tool_error)?;
        self.state.forwardings.retry(uuid).map_err(tool_error)?;
        let forwarding = settle(self.state.forwardings.registry(), uuid, wait_secs)
            .await
            .map_err(tool_error)?;
        Ok(StructuredContent(ForwardingInfo::from(&forwarding)))
    }

    /// Accept the unknown host key reported by the current hop and reconnect it.
    async fn forwarding_trust_host_key(
        &self,
        /// Forwarding ID whose current hop reported UnknownKey
        forwarding_id: String,
        /// Also record the key in known_hosts (default: false, trust once)
        permanent: Option<bool>,
        /// Seconds to wait for the result (default: 0, max: 120)
        wait_secs: Option<u64>,
    ) -> Result<StructuredContent<ForwardingInfo>, String> {
        let uuid = parse_uuid(&forwarding_id).map_err(tool_error)?;
        self.state
            .forwardings
            .reconnect(uuid, trust_decision(permanent))
            .map_err(tool_error)?;
        let forwarding = settle(self.state.forwardings.registry(), uuid, wait_secs)
            .await
            .map_err(tool_error)?;
        Ok(StructuredContent(ForwardingInfo::from(&forwarding)))
    }

    /// Retry the current hop of a port forwarding with different credentials.
    async fn forwarding_reauthenticate(
        &self,
        /// Forwarding ID whose current hop failed authentication
        forwarding_id: String,
        /// New password for the hop
        password: Option<String>,
        /// Inventory id of a different key for the hop
        key_id: Option<String>,
        /// Seconds to wait for the result (default: 0, max: 120)
        wait_secs: Option<u64>,
    ) -> Result<StructuredContent<ForwardingInfo>, String> {
        let uuid = parse_uuid(&forwarding_id).map_err(tool_error)?;
        self.state
            .forwardings
            .reauthenticate(uuid, Credentials { password, key_id })
            .map_err(tool_error)?;
        let forwarding = settle(self.state.forwardings.registry(), uuid, wait_secs)
            .await
            .map_err(tool_error)?;
        Ok(StructuredContent(ForwardingInfo::from(&forwarding)))
    }
}
