//! The session handle boundary between chain orchestration and SSH.
//!
//! The chain layer drives hops only through [`SessionHandle`]. A handle is
//! created unconnected by a [`SessionFactory`], reports unexpected
//! disconnects on the sender it was created with, and can tunnel its own
//! connection through another, already authenticated handle identified by
//! [`SessionId`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::SessionResult;
use crate::types::{CheckServerKey, Endpoint, ShellSize};

/// Identity of one session handle, stable across reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the connection.
    Server,
    /// The connection failed underneath us.
    Error(String),
}

/// Fired at most once per connection that ends without `disconnect()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectEvent {
    pub session: SessionId,
    pub reason: DisconnectReason,
}

pub type DisconnectSender = mpsc::UnboundedSender<DisconnectEvent>;

/// Parameters for an interactive shell channel.
#[derive(Debug, Clone)]
pub struct ShellRequest {
    pub size: ShellSize,
    pub term: String,
    pub envs: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Data(Vec<u8>),
    Eof,
    Close,
}

/// Write side of an open shell channel.
#[async_trait]
pub trait ShellChannel: Send + Sync {
    async fn write(&self, data: &[u8]) -> SessionResult<()>;

    async fn resize(&self, size: ShellSize) -> SessionResult<()>;

    async fn close(&self) -> SessionResult<()>;
}

/// An open shell: its write side and the stream of output events.
pub struct ShellStream {
    pub channel: Box<dyn ShellChannel>,
    pub events: mpsc::UnboundedReceiver<ShellEvent>,
}

/// A running port forwarding. Closing stops it without touching the session.
#[async_trait]
pub trait ForwardingHandle: Send + Sync {
    async fn close(&self) -> SessionResult<()>;
}

/// One hop's connection, owned by exactly one chain entry.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    fn id(&self) -> SessionId;

    /// Open the transport to `endpoint`, directly or through the
    /// already authenticated session `tunnel_through`.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        tunnel_through: Option<SessionId>,
        check_server_key: Option<CheckServerKey>,
    ) -> SessionResult<SessionId>;

    async fn authenticate_password(&self, username: &str, password: &str) -> SessionResult<()>;

    async fn authenticate_public_key(
        &self,
        username: &str,
        private_key: &str,
        passphrase: Option<&str>,
    ) -> SessionResult<()>;

    async fn authenticate_certificate(
        &self,
        username: &str,
        private_key: &str,
        passphrase: Option<&str>,
        certificate: &str,
    ) -> SessionResult<()>;

    /// Close the connection. A no-op on a handle that never connected.
    async fn disconnect(&self) -> SessionResult<()>;

    async fn open_shell(&self, request: ShellRequest) -> SessionResult<ShellStream>;

    async fn open_local_forwarding(
        &self,
        local_address: &str,
        local_port: u16,
        remote_address: &str,
        remote_port: u16,
    ) -> SessionResult<Box<dyn ForwardingHandle>>;

    async fn open_remote_forwarding(
        &self,
        local_address: &str,
        local_port: u16,
        remote_address: &str,
        remote_port: u16,
    ) -> SessionResult<Box<dyn ForwardingHandle>>;

    async fn open_dynamic_forwarding(
        &self,
        local_address: &str,
        local_port: u16,
    ) -> SessionResult<Box<dyn ForwardingHandle>>;
}

impl fmt::Debug for dyn SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionHandle").field(&self.id().0).finish()
    }
}

/// Builds fresh, unconnected session handles.
pub trait SessionFactory: Send + Sync {
    fn create(&self, on_disconnect: DisconnectSender) -> Arc<dyn SessionHandle>;
}
