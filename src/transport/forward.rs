//! Port forwarding over an authenticated hop.
//!
//! # Architecture
//!
//! - **Local**: a TCP listener on `local_address:local_port`; every accepted
//!   connection gets its own `direct-tcpip` channel to the remote
//!   destination (RFC 4254 section 7.2).
//! - **Remote**: a `tcpip-forward` request on the server. Incoming
//!   `forwarded-tcpip` channels are dialled to the local address by the
//!   client handler, which looks the binding up in [`RemoteBindings`].
//! - **Dynamic**: a local SOCKS5 listener; the CONNECT destination of each
//!   client becomes the `direct-tcpip` target.
//!
//! Listeners stop when their `CancellationToken` is cancelled. Connections
//! already being forwarded run until either side closes.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::transport::handler::RemoteBindings;
use crate::transport::session::SharedHandle;
use crate::transport::socks;
use crate::transport::traits::ForwardingHandle;

/// Listener-backed forwarding (local and dynamic).
pub(crate) struct ListenerForwarding {
    local_addr: SocketAddr,
    cancel_token: CancellationToken,
}

#[async_trait]
impl ForwardingHandle for ListenerForwarding {
    async fn close(&self) -> SessionResult<()> {
        debug!("Stopping forwarding listener on {}", self.local_addr);
        self.cancel_token.cancel();
        Ok(())
    }
}

async fn bind(local_address: &str, local_port: u16) -> SessionResult<TcpListener> {
    TcpListener::bind((local_address, local_port))
        .await
        .map_err(|e| {
            SessionError::Io(format!(
                "Failed to bind to {}:{}: {}",
                local_address, local_port, e
            ))
        })
}

/// Open a `direct-tcpip` channel and pump bytes until either side closes.
async fn forward_connection(
    handle: SharedHandle,
    mut local_stream: TcpStream,
    peer: SocketAddr,
    remote_host: &str,
    remote_port: u16,
) -> SessionResult<()> {
    let channel = {
        let handle = handle.lock().await;
        handle
            .channel_open_direct_tcpip(
                remote_host,
                remote_port as u32,
                peer.ip().to_string(),
                peer.port() as u32,
            )
            .await?
    };

    let mut channel_stream = channel.into_stream();
    match tokio::io::copy_bidirectional(&mut local_stream, &mut channel_stream).await {
        Ok((sent, received)) => {
            debug!(
                "Forwarded connection {} closed ({} bytes out, {} bytes in)",
                peer, sent, received
            );
        }
        Err(e) => debug!("Forwarded connection {} ended: {}", peer, e),
    }
    Ok(())
}

pub(crate) async fn open_local(
    handle: SharedHandle,
    local_address: &str,
    local_port: u16,
    remote_address: &str,
    remote_port: u16,
) -> SessionResult<Box<dyn ForwardingHandle>> {
    let listener = bind(local_address, local_port).await?;
    let local_addr = listener.local_addr()?;
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();
    let remote_host = remote_address.to_string();

    info!(
        "Local forwarding {} -> {}:{} active",
        local_addr, remote_host, remote_port
    );

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handle = handle.clone();
                        let remote_host = remote_host.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                forward_connection(handle, stream, peer, &remote_host, remote_port).await
                            {
                                warn!("Local forwarding connection from {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection on {}: {}", local_addr, e);
                        break;
                    }
                },
            }
        }
        debug!("Local forwarding listener on {} stopped", local_addr);
    });

    Ok(Box::new(ListenerForwarding {
        local_addr,
        cancel_token,
    }))
}

pub(crate) async fn open_dynamic(
    handle: SharedHandle,
    local_address: &str,
    local_port: u16,
) -> SessionResult<Box<dyn ForwardingHandle>> {
    let listener = bind(local_address, local_port).await?;
    let local_addr = listener.local_addr()?;
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    info!("Dynamic forwarding (SOCKS5) on {} active", local_addr);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handle = handle.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_socks_client(handle, stream, peer).await {
                                debug!("SOCKS client {} failed: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection on {}: {}", local_addr, e);
                        break;
                    }
                },
            }
        }
        debug!("Dynamic forwarding listener on {} stopped", local_addr);
    });

    Ok(Box::new(ListenerForwarding {
        local_addr,
        cancel_token,
    }))
}

async fn serve_socks_client(
    handle: SharedHandle,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> SessionResult<()> {
    let (host, port) = socks::negotiate(&mut stream).await?;
    debug!("SOCKS CONNECT {}:{} from {}", host, port, peer);

    let opened = {
        let handle = handle.lock().await;
        handle
            .channel_open_direct_tcpip(
                host.as_str(),
                port as u32,
                peer.ip().to_string(),
                peer.port() as u32,
            )
            .await
    };

    let channel = match opened {
        Ok(channel) => channel,
        Err(e) => {
            let code = match e {
                russh::Error::ChannelOpenFailure(_) => socks::REPLY_CONNECTION_REFUSED,
                _ => socks::REPLY_GENERAL_FAILURE,
            };
            socks::reply(&mut stream, code).await?;
            return Err(e.into());
        }
    };

    socks::reply(&mut stream, socks::REPLY_SUCCEEDED).await?;

    let mut channel_stream = channel.into_stream();
    if let Err(e) = tokio::io::copy_bidirectional(&mut stream, &mut channel_stream).await {
        debug!("SOCKS connection {} ended: {}", peer, e);
    }
    Ok(())
}

/// A `tcpip-forward` registration on the server.
pub(crate) struct RemoteForwarding {
    handle: SharedHandle,
    bindings: RemoteBindings,
    remote_address: String,
    remote_port: u32,
}

#[async_trait]
impl ForwardingHandle for RemoteForwarding {
    async fn close(&self) -> SessionResult<()> {
        self.bindings
            .remove(&(self.remote_address.clone(), self.remote_port));
        let handle = self.handle.lock().await;
        handle
            .cancel_tcpip_forward(self.remote_address.as_str(), self.remote_port)
            .await?;
        info!(
            "Remote forwarding {}:{} cancelled",
            self.remote_address, self.remote_port
        );
        Ok(())
    }
}

pub(crate) async fn open_remote(
    handle: SharedHandle,
    bindings: RemoteBindings,
    local_address: &str,
    local_port: u16,
    remote_address: &str,
    remote_port: u16,
) -> SessionResult<Box<dyn ForwardingHandle>> {
    let requested = remote_port as u32;
    bindings.insert(
        (remote_address.to_string(), requested),
        (local_address.to_string(), local_port),
    );

    let result = {
        let mut guard = handle.lock().await;
        guard.tcpip_forward(remote_address, requested).await
    };

    let bound_port = match result {
        Ok(port) if requested == 0 && port != 0 => {
            // The server picked the port; rekey the binding
            bindings.remove(&(remote_address.to_string(), requested));
            bindings.insert(
                (remote_address.to_string(), port),
                (local_address.to_string(), local_port),
            );
            port
        }
        Ok(_) => requested,
        Err(e) => {
            bindings.remove(&(remote_address.to_string(), requested));
            return Err(e.into());
        }
    };

    info!(
        "Remote forwarding {}:{} -> {}:{} active",
        remote_address, bound_port, local_address, local_port
    );

    Ok(Box::new(RemoteForwarding {
        handle,
        bindings,
        remote_address: remote_address.to_string(),
        remote_port: bound_port,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_conflict_is_io_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = bind("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, SessionError::Io(ref msg) if msg.contains("Failed to bind")));
    }

    #[tokio::test]
    async fn test_listener_close_cancels_token() {
        let forwarding = ListenerForwarding {
            local_addr: "127.0.0.1:0".parse().unwrap(),
            cancel_token: CancellationToken::new(),
        };
        let token = forwarding.cancel_token.clone();
        forwarding.close().await.unwrap();
        assert!(token.is_cancelled());
    }
}
