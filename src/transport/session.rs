//! russh-backed session handles.
//!
//! # Architecture
//!
//! - [`RusshTransport`] is the [`SessionFactory`]. It owns the resolved
//!   [`TransportConfig`] and a session table mapping [`SessionId`] to the
//!   live `client::Handle` of every connected hop it created.
//! - [`RusshSession`] is one hop. `connect` either dials the endpoint over
//!   TCP or, when asked to tunnel, opens a `direct-tcpip` channel on the
//!   parent hop found in the session table and runs the SSH handshake over
//!   that channel with `client::connect_stream`.
//!
//! The `client::Handle` is wrapped in `Arc<Mutex<>>` because authentication
//! and `tcpip-forward` need `&mut` access while channel opens from
//! forwarding tasks share it.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use russh::client;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::TransportConfig;
use crate::error::{SessionError, SessionResult};
use crate::transport::auth::{AuthStrategy, CertificateAuth, KeyAuth, PasswordAuth};
use crate::transport::handler::{ChainHandler, ConnectionState, RemoteBindings};
use crate::transport::shell::open_shell_channel;
use crate::transport::traits::{
    DisconnectSender, ForwardingHandle, SessionFactory, SessionHandle, SessionId, ShellRequest,
    ShellStream,
};
use crate::types::{CheckServerKey, Endpoint};

pub(crate) type SharedHandle = Arc<Mutex<client::Handle<ChainHandler>>>;

type SessionTable = Arc<DashMap<SessionId, SharedHandle>>;

/// Build russh client configuration from the resolved transport settings.
pub(crate) fn build_client_config(config: &TransportConfig) -> Arc<client::Config> {
    Arc::new(client::Config {
        inactivity_timeout: Some(config.inactivity_timeout),
        keepalive_interval: Some(config.keepalive_interval),
        keepalive_max: 3,
        ..Default::default()
    })
}

/// Failures reaching the endpoint during connect are reported as
/// `ConnectFailed`; host key and timeout errors keep their kind.
fn classify_connect_error(err: SessionError, address: &str) -> SessionError {
    match err {
        SessionError::NotFoundSession | SessionError::Io(_) => {
            SessionError::ConnectFailed(address.to_string())
        }
        other => other,
    }
}

/// Factory for russh-backed hops sharing one session table.
pub struct RusshTransport {
    config: TransportConfig,
    sessions: SessionTable,
}

impl RusshTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Number of currently connected hops across all chains.
    pub fn connected_sessions(&self) -> usize {
        self.sessions.len()
    }
}

impl SessionFactory for RusshTransport {
    fn create(&self, on_disconnect: DisconnectSender) -> Arc<dyn SessionHandle> {
        Arc::new(RusshSession {
            id: SessionId::new(),
            config: self.config.clone(),
            sessions: self.sessions.clone(),
            on_disconnect,
            connection: Mutex::new(None),
            remote_bindings: Arc::new(DashMap::new()),
        })
    }
}

struct LiveConnection {
    handle: SharedHandle,
    state: Arc<ConnectionState>,
}

/// One hop's russh connection.
pub struct RusshSession {
    id: SessionId,
    config: TransportConfig,
    sessions: SessionTable,
    on_disconnect: DisconnectSender,
    connection: Mutex<Option<LiveConnection>>,
    remote_bindings: RemoteBindings,
}

impl RusshSession {
    async fn live_handle(&self) -> SessionResult<SharedHandle> {
        self.connection
            .lock()
            .await
            .as_ref()
            .map(|connection| connection.handle.clone())
            .ok_or(SessionError::NotFoundSession)
    }

    /// Detach the current connection, if any, without reporting it.
    async fn take_connection(&self) -> Option<LiveConnection> {
        let connection = self.connection.lock().await.take()?;
        connection.state.mark_closing();
        self.sessions.remove(&self.id);
        Some(connection)
    }

    async fn drop_stale(&self, endpoint: &Endpoint) {
        let Some(stale) = self.take_connection().await else {
            return;
        };
        let handle = stale.handle.lock().await;
        if let Err(e) = handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(session = %self.id, "Dropping stale connection to {}: {}", endpoint, e);
        }
    }

    async fn authenticate_with(
        &self,
        username: &str,
        strategy: &dyn AuthStrategy,
    ) -> SessionResult<()> {
        let handle = self.live_handle().await?;
        let mut guard = handle.lock().await;
        debug!(session = %self.id, "Authenticating with {}", strategy.name());
        tokio::time::timeout(
            self.config.auth_timeout,
            strategy.authenticate(&mut guard, username),
        )
        .await
        .map_err(|_| {
            SessionError::Timeout(format!(
                "{} authentication timed out after {:?}",
                strategy.name(),
                self.config.auth_timeout
            ))
        })?
    }
}

#[async_trait]
impl SessionHandle for RusshSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        tunnel_through: Option<SessionId>,
        check_server_key: Option<CheckServerKey>,
    ) -> SessionResult<SessionId> {
        // A retry replaces whatever connection this hop had
        self.drop_stale(endpoint).await;

        let address = endpoint.to_string();
        let state = Arc::new(ConnectionState::default());
        let handler = ChainHandler::new(
            self.id,
            endpoint.clone(),
            self.config.known_hosts.clone(),
            check_server_key,
            self.on_disconnect.clone(),
            state.clone(),
            self.remote_bindings.clone(),
        );
        let client_config = build_client_config(&self.config);
        let timeout = self.config.connect_timeout;

        let connected = match tunnel_through {
            None => {
                debug!(session = %self.id, "Connecting to {}", address);
                tokio::time::timeout(
                    timeout,
                    client::connect(
                        client_config,
                        (endpoint.hostname.as_str(), endpoint.port),
                        handler,
                    ),
                )
                .await
            }
            Some(parent) => {
                let parent_handle = self
                    .sessions
                    .get(&parent)
                    .map(|entry| entry.value().clone())
                    .ok_or(SessionError::NotFoundSession)?;
                debug!(session = %self.id, "Connecting to {} through {}", address, parent);
                tokio::time::timeout(timeout, async {
                    let channel = {
                        let parent = parent_handle.lock().await;
                        parent
                            .channel_open_direct_tcpip(
                                endpoint.hostname.clone(),
                                endpoint.port as u32,
                                "127.0.0.1",
                                0,
                            )
                            .await
                            .map_err(|e| match e {
                                russh::Error::ChannelOpenFailure(_) => {
                                    SessionError::ConnectFailed(address.clone())
                                }
                                other => SessionError::from(other),
                            })?
                    };
                    let handle =
                        client::connect_stream(client_config, channel.into_stream(), handler)
                            .await?;
                    Ok::<_, SessionError>(handle)
                })
                .await
            }
        };

        let handle = connected
            .map_err(|_| {
                SessionError::Timeout(format!(
                    "Connection to {} timed out after {:?}",
                    address, timeout
                ))
            })?
            .map_err(|e| classify_connect_error(e, &address))?;

        let handle: SharedHandle = Arc::new(Mutex::new(handle));
        state.mark_established();
        self.sessions.insert(self.id, handle.clone());
        *self.connection.lock().await = Some(LiveConnection { handle, state });

        info!(session = %self.id, "Connected to {}", address);
        Ok(self.id)
    }

    async fn authenticate_password(&self, username: &str, password: &str) -> SessionResult<()> {
        self.authenticate_with(username, &PasswordAuth::new(password))
            .await
    }

    async fn authenticate_public_key(
        &self,
        username: &str,
        private_key: &str,
        passphrase: Option<&str>,
    ) -> SessionResult<()> {
        self.authenticate_with(username, &KeyAuth::new(private_key, passphrase))
            .await
    }

    async fn authenticate_certificate(
        &self,
        username: &str,
        private_key: &str,
        passphrase: Option<&str>,
        certificate: &str,
    ) -> SessionResult<()> {
        self.authenticate_with(
            username,
            &CertificateAuth::new(private_key, passphrase, certificate),
        )
        .await
    }

    async fn disconnect(&self) -> SessionResult<()> {
        let Some(connection) = self.take_connection().await else {
            return Ok(());
        };
        let handle = connection.handle.lock().await;
        handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await?;
        info!(session = %self.id, "Disconnected");
        Ok(())
    }

    async fn open_shell(&self, request: ShellRequest) -> SessionResult<ShellStream> {
        let handle = self.live_handle().await?;
        let guard = handle.lock().await;
        open_shell_channel(&guard, request).await
    }

    #[cfg(feature = "port_forward")]
    async fn open_local_forwarding(
        &self,
        local_address: &str,
        local_port: u16,
        remote_address: &str,
        remote_port: u16,
    ) -> SessionResult<Box<dyn ForwardingHandle>> {
        let handle = self.live_handle().await?;
        crate::transport::forward::open_local(
            handle,
            local_address,
            local_port,
            remote_address,
            remote_port,
        )
        .await
    }

    #[cfg(feature = "port_forward")]
    async fn open_remote_forwarding(
        &self,
        local_address: &str,
        local_port: u16,
        remote_address: &str,
        remote_port: u16,
    ) -> SessionResult<Box<dyn ForwardingHandle>> {
        let handle = self.live_handle().await?;
        crate::transport::forward::open_remote(
            handle,
            self.remote_bindings.clone(),
            local_address,
            local_port,
            remote_address,
            remote_port,
        )
        .await
    }

    #[cfg(feature = "port_forward")]
    async fn open_dynamic_forwarding(
        &self,
        local_address: &str,
        local_port: u16,
    ) -> SessionResult<Box<dyn ForwardingHandle>> {
        let handle = self.live_handle().await?;
        crate::transport::forward::open_dynamic(handle, local_address, local_port).await
    }

    #[cfg(not(feature = "port_forward"))]
    async fn open_local_forwarding(
        &self,
        _local_address: &str,
        _local_port: u16,
        _remote_address: &str,
        _remote_port: u16,
    ) -> SessionResult<Box<dyn ForwardingHandle>> {
        Err(SessionError::new("Port forwarding support is not enabled"))
    }

    #[cfg(not(feature = "port_forward"))]
    async fn open_remote_forwarding(
        &self,
        _local_address: &str,
        _local_port: u16,
        _remote_address: &str,
        _remote_port: u16,
    ) -> SessionResult<Box<dyn ForwardingHandle>> {
        Err(SessionError::new("Port forwarding support is not enabled"))
    }

    #[cfg(not(feature = "port_forward"))]
    async fn open_dynamic_forwarding(
        &self,
        _local_address: &str,
        _local_port: u16,
    ) -> SessionResult<Box<dyn ForwardingHandle>> {
        Err(SessionError::new("Port forwarding support is not enabled"))
    }
}
