//! russh client handler for one hop.
//!
//! A fresh handler is built for every connect attempt. It carries the
//! one-shot host key trust decision for that attempt and the shared state
//! used to report an unexpected disconnect exactly once.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use russh::client;
use russh::keys::known_hosts::{check_known_hosts_path, learn_known_hosts_path};
use russh::keys::{HashAlg, PublicKey};
use russh::{Channel, client::Msg};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::transport::traits::{DisconnectEvent, DisconnectReason, DisconnectSender, SessionId};
use crate::types::{CheckServerKey, Endpoint};

/// Server-side bind address -> local address to dial for forwarded-tcpip.
pub(crate) type RemoteBindings = Arc<DashMap<(String, u32), (String, u16)>>;

/// Lifecycle flags shared between a handler and the handle that owns it.
#[derive(Debug, Default)]
pub(crate) struct ConnectionState {
    established: AtomicBool,
    closing: AtomicBool,
}

impl ConnectionState {
    pub(crate) fn mark_established(&self) {
        self.established.store(true, Ordering::SeqCst);
    }

    /// Suppress the disconnect event for a close we asked for.
    pub(crate) fn mark_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    /// True exactly once, and only for an established connection.
    fn take_notification(&self) -> bool {
        self.established.load(Ordering::SeqCst) && !self.closing.swap(true, Ordering::SeqCst)
    }
}

/// A mismatching known_hosts entry must never read as a key or auth problem.
fn known_hosts_error(endpoint: &Endpoint, err: russh::keys::Error) -> SessionError {
    match err {
        russh::keys::Error::KeyChanged { line } => SessionError::HostKeyChanged {
            endpoint: endpoint.to_string(),
            line,
        },
        other => SessionError::Other(format!("known_hosts check failed: {}", other)),
    }
}

pub(crate) struct ChainHandler {
    session: SessionId,
    endpoint: Endpoint,
    known_hosts: Option<PathBuf>,
    check_server_key: Option<CheckServerKey>,
    on_disconnect: DisconnectSender,
    state: Arc<ConnectionState>,
    remote_bindings: RemoteBindings,
}

impl ChainHandler {
    pub(crate) fn new(
        session: SessionId,
        endpoint: Endpoint,
        known_hosts: Option<PathBuf>,
        check_server_key: Option<CheckServerKey>,
        on_disconnect: DisconnectSender,
        state: Arc<ConnectionState>,
        remote_bindings: RemoteBindings,
    ) -> Self {
        Self {
            session,
            endpoint,
            known_hosts,
            check_server_key,
            on_disconnect,
            state,
            remote_bindings,
        }
    }

    fn notify(&self, reason: DisconnectReason) {
        if !self.state.take_notification() {
            return;
        }
        info!(session = %self.session, endpoint = %self.endpoint, ?reason, "Session disconnected");
        // The registry may already be gone at shutdown
        let _ = self.on_disconnect.send(DisconnectEvent {
            session: self.session,
            reason,
        });
    }
}

impl client::Handler for ChainHandler {
    type Error = SessionError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let hostname = self.endpoint.hostname.as_str();
        let port = self.endpoint.port;

        if let Some(path) = &self.known_hosts
            && check_known_hosts_path(hostname, port, server_public_key, path)
                .map_err(|e| known_hosts_error(&self.endpoint, e))?
        {
            return Ok(true);
        }

        match self.check_server_key {
            Some(CheckServerKey::Continue) => {
                debug!(endpoint = %self.endpoint, "Trusting unknown host key for this connection");
                Ok(true)
            }
            Some(CheckServerKey::AddAndContinue) => {
                match &self.known_hosts {
                    Some(path) => {
                        learn_known_hosts_path(hostname, port, server_public_key, path)
                            .map_err(|e| known_hosts_error(&self.endpoint, e))?;
                        info!(endpoint = %self.endpoint, path = %path.display(), "Learned host key");
                    }
                    None => {
                        warn!(endpoint = %self.endpoint, "No known_hosts file configured, key not saved")
                    }
                }
                Ok(true)
            }
            None => Err(SessionError::UnknownKey {
                algorithm: server_public_key.algorithm().to_string(),
                fingerprint: server_public_key.fingerprint(HashAlg::Sha256).to_string(),
            }),
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let target = self
            .remote_bindings
            .get(&(connected_address.to_string(), connected_port))
            .map(|entry| entry.value().clone());

        let Some((local_address, local_port)) = target else {
            warn!(
                "Forwarded connection for unknown binding {}:{}",
                connected_address, connected_port
            );
            return Ok(());
        };

        debug!(
            "Forwarded connection from {}:{} to {}:{}",
            originator_address, originator_port, local_address, local_port
        );

        tokio::spawn(async move {
            match TcpStream::connect((local_address.as_str(), local_port)).await {
                Ok(mut stream) => {
                    let mut channel_stream = channel.into_stream();
                    if let Err(e) =
                        tokio::io::copy_bidirectional(&mut stream, &mut channel_stream).await
                    {
                        debug!("Forwarded connection ended: {}", e);
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to reach {}:{} for forwarded connection: {}",
                        local_address, local_port, e
                    );
                }
            }
        });

        Ok(())
    }

    async fn disconnected(
        &mut self,
        reason: client::DisconnectReason<Self::Error>,
    ) -> Result<(), Self::Error> {
        match reason {
            client::DisconnectReason::ReceivedDisconnect(_) => {
                self.notify(DisconnectReason::Server);
                Ok(())
            }
            client::DisconnectReason::Error(error) => {
                self.notify(DisconnectReason::Error(error.to_string()));
                Err(error)
            }
        }
    }
}
