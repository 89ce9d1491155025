//! Data model shared by the chain, registry and transport layers.
//!
//! `Host`, `Key` and `PortForwarding` are read from the inventory and are
//! never written back. Hosts are captured into chain entries by value, so a
//! later edit of the inventory cannot alter a chain that is already in
//! flight.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a hop proves its identity once the transport is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum AuthenticationMethod {
    Password,
    PublicKey,
    Certificate,
}

impl fmt::Display for AuthenticationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticationMethod::Password => write!(f, "password"),
            AuthenticationMethod::PublicKey => write!(f, "publickey"),
            AuthenticationMethod::Certificate => write!(f, "certificate"),
        }
    }
}

/// Identity and reachability of one host.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub authentication_method: AuthenticationMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Hosts to traverse before this one, nearest first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jump_host_ids: Option<Vec<String>>,
}

impl Host {
    pub fn jump_host_ids(&self) -> &[String] {
        self.jump_host_ids.as_deref().unwrap_or_default()
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            hostname: self.hostname.clone(),
            port: self.port,
        }
    }

    /// Name shown for terminals opened on this host.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{}:{}", self.hostname, self.port),
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("authentication_method", &self.authentication_method)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_id", &self.key_id)
            .field("jump_host_ids", &self.jump_host_ids)
            .finish()
    }
}

/// Credential material referenced by `Host::key_id`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Key {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub private_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("has_passphrase", &self.passphrase.is_some())
            .field("has_certificate", &self.certificate.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum PortForwardingKind {
    Local,
    Remote,
    Dynamic,
}

impl fmt::Display for PortForwardingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortForwardingKind::Local => write!(f, "local"),
            PortForwardingKind::Remote => write!(f, "remote"),
            PortForwardingKind::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// A stored port forwarding definition.
///
/// `remote_address`/`remote_port` are required for local and remote
/// forwardings and ignored for dynamic ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortForwarding {
    pub id: String,
    pub name: String,
    #[serde(rename = "portForwardingType", alias = "kind")]
    pub kind: PortForwardingKind,
    pub host_id: String,
    pub local_address: String,
    pub local_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
}

impl PortForwarding {
    /// Human readable summary, e.g. `127.0.0.1:8080 -> db:5432`.
    pub fn describe(&self) -> String {
        let local = format!("{}:{}", self.local_address, self.local_port);
        let remote = match (&self.remote_address, self.remote_port) {
            (Some(address), Some(port)) => format!("{}:{}", address, port),
            _ => "?".to_string(),
        };
        match self.kind {
            PortForwardingKind::Local => format!("{} -> {}", local, remote),
            PortForwardingKind::Remote => format!("{} <- {}", local, remote),
            PortForwardingKind::Dynamic => format!("socks5://{}", local),
        }
    }
}

/// Network address of a hop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub hostname: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hostname, self.port)
    }
}

/// User decision about a host key that is not in known_hosts.
///
/// Applies to the next connect attempt of one hop only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum CheckServerKey {
    /// Trust the key for this connection only.
    Continue,
    /// Trust the key and record it in known_hosts.
    AddAndContinue,
}

/// Progress of one hop. Moves forward only; specific errors reset it to
/// `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HopStatus {
    Connecting,
    Connected,
    Authenticated,
}

impl fmt::Display for HopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HopStatus::Connecting => write!(f, "connecting"),
            HopStatus::Connected => write!(f, "connected"),
            HopStatus::Authenticated => write!(f, "authenticated"),
        }
    }
}

/// Status of a terminal or port forwarding as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Pending,
    Success,
    Failed,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceStatus::Pending => write!(f, "pending"),
            ResourceStatus::Success => write!(f, "success"),
            ResourceStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Terminal geometry in characters and pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ShellSize {
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub col: u32,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub row: u32,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub width: u32,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub height: u32,
}

impl Default for ShellSize {
    fn default() -> Self {
        Self {
            col: 80,
            row: 24,
            width: 0,
            height: 0,
        }
    }
}
