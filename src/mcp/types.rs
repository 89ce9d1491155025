//! Serializable response types for the MCP jump-host tools.
//!
//! Responses mirror what a client needs to render a chain: every hop with
//! its status, loading flag and error, plus the resource status and the
//! error that should be shown with a suggested follow-up action.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::chain::ChainEntry;
use crate::error::{ErrorKind, SessionError, SuggestedAction};
use crate::registry::ChainedResource;
use crate::resource::{ShellOutput, TerminalTarget};
use crate::types::{
    AuthenticationMethod, Host, HopStatus, PortForwarding, PortForwardingKind, ResourceStatus,
};

/// Error shown for a hop or a resource.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    /// Tool to call next: `*_trust_host_key`, `*_reauthenticate` or `*_retry`
    pub suggested_action: SuggestedAction,
    pub message: String,
    /// Full error payload (`type`, `message`, and e.g. the key fingerprint)
    pub detail: serde_json::Value,
}

impl From<&SessionError> for ErrorInfo {
    fn from(err: &SessionError) -> Self {
        let kind = err.kind();
        Self {
            kind,
            suggested_action: kind.suggested_action(),
            message: err.to_string(),
            detail: serde_json::to_value(err).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct HopInfo {
    pub host_id: String,
    pub hostname: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub port: u16,
    pub username: String,
    pub status: HopStatus,
    /// Whether this hop is being connected or authenticated right now
    pub loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl From<&ChainEntry> for HopInfo {
    fn from(entry: &ChainEntry) -> Self {
        Self {
            host_id: entry.host.id.clone(),
            hostname: entry.host.hostname.clone(),
            port: entry.host.port,
            username: entry.host.username.clone(),
            status: entry.status,
            loading: entry.loading,
            error: entry.error.as_ref().map(ErrorInfo::from),
        }
    }
}

/// Chain fields shared by terminals and forwardings.
fn chain_fields<P>(
    resource: &ChainedResource<P>,
) -> (Vec<HopInfo>, Option<usize>, Option<ErrorInfo>) {
    (
        resource.chain.iter().map(HopInfo::from).collect(),
        resource.current_hop(),
        resource.display_error().map(ErrorInfo::from),
    )
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TerminalInfo {
    pub terminal_id: String,
    pub name: String,
    pub host_id: String,
    pub status: ResourceStatus,
    /// Jump hosts first, target host last
    pub hops: Vec<HopInfo>,
    /// Index of the first hop that is not authenticated yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::mcp::schema::optional_uint")]
    pub current_hop: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub created_at: String,
}

impl From<&ChainedResource<TerminalTarget>> for TerminalInfo {
    fn from(resource: &ChainedResource<TerminalTarget>) -> Self {
        let (hops, current_hop, error) = chain_fields(resource);
        Self {
            terminal_id: resource.uuid.to_string(),
            name: resource.name.clone(),
            host_id: resource.target.host.id.clone(),
            status: resource.status,
            hops,
            current_hop,
            error,
            created_at: resource.created_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ForwardingInfo {
    pub forwarding_id: String,
    pub name: String,
    pub port_forwarding_id: String,
    pub kind: PortForwardingKind,
    /// e.g. `127.0.0.1:8080 -> db:5432` or `socks5://127.0.0.1:1080`
    pub description: String,
    pub status: ResourceStatus,
    pub hops: Vec<HopInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::mcp::schema::optional_uint")]
    pub current_hop: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub created_at: String,
}

impl From<&ChainedResource<PortForwarding>> for ForwardingInfo {
    fn from(resource: &ChainedResource<PortForwarding>) -> Self {
        let (hops, current_hop, error) = chain_fields(resource);
        Self {
            forwarding_id: resource.uuid.to_string(),
            name: resource.name.clone(),
            port_forwarding_id: resource.target.id.clone(),
            kind: resource.target.kind,
            description: resource.target.describe(),
            status: resource.status,
            hops,
            current_hop,
            error,
            created_at: resource.created_at.clone(),
        }
    }
}

/// Inventory host without its secrets.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HostInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub hostname: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub port: u16,
    pub username: String,
    pub authentication_method: AuthenticationMethod,
    /// Jump hosts traversed to reach this host, nearest first
    pub jump_host_ids: Vec<String>,
}

impl From<&Host> for HostInfo {
    fn from(host: &Host) -> Self {
        Self {
            id: host.id.clone(),
            name: host.name.clone(),
            hostname: host.hostname.clone(),
            port: host.port,
            username: host.username.clone(),
            authentication_method: host.authentication_method,
            jump_host_ids: host.jump_host_ids().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PortForwardingInfo {
    pub id: String,
    pub name: String,
    pub kind: PortForwardingKind,
    pub host_id: String,
    pub local_address: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub local_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "crate::mcp::schema::optional_uint")]
    pub remote_port: Option<u16>,
}

impl From<&PortForwarding> for PortForwardingInfo {
    fn from(pf: &PortForwarding) -> Self {
        Self {
            id: pf.id.clone(),
            name: pf.name.clone(),
            kind: pf.kind,
            host_id: pf.host_id.clone(),
            local_address: pf.local_address.clone(),
            local_port: pf.local_port,
            remote_address: pf.remote_address.clone(),
            remote_port: pf.remote_port,
        }
    }
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct HostListResponse {
    pub hosts: Vec<HostInfo>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct PortForwardingListResponse {
    pub port_forwardings: Vec<PortForwardingInfo>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct TerminalListResponse {
    pub terminals: Vec<TerminalInfo>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct ForwardingListResponse {
    pub forwardings: Vec<ForwardingInfo>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct TerminalOutputResponse {
    pub terminal_id: String,
    pub status: ResourceStatus,
    /// Output since `offset`, lossily decoded as UTF-8
    pub output: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub offset: usize,
    /// Pass as `offset` on the next read to get only new output
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub next_offset: usize,
}

impl TerminalOutputResponse {
    pub fn new(terminal_id: String, status: ResourceStatus, output: ShellOutput) -> Self {
        Self {
            terminal_id,
            status,
            output: String::from_utf8_lossy(&output.data).into_owned(),
            offset: output.offset,
            next_offset: output.next_offset,
        }
    }
}
