//! Session transport: the handle trait and its russh implementation.
//!
//! # Architecture
//!
//! - `traits`: [`SessionHandle`], [`SessionFactory`] and the shell and
//!   forwarding channel traits the orchestration layer consumes
//! - `session`: [`RusshTransport`], the factory, and the per-hop handle
//!   that owns a `russh::client::Handle`
//! - `handler`: the russh client handler (known_hosts check, disconnect
//!   notification, forwarded-tcpip dispatch)
//! - `auth`: password, public key and certificate authentication
//! - `shell` / `forward` / `socks`: channels opened on an authenticated hop
//! - `mock`: a scripted in-memory transport for tests

mod auth;
#[cfg(feature = "port_forward")]
mod forward;
mod handler;
#[cfg(test)]
pub(crate) mod mock;
mod session;
mod shell;
#[cfg(feature = "port_forward")]
mod socks;
mod traits;

pub use session::{RusshSession, RusshTransport};
pub use traits::{
    DisconnectEvent, DisconnectReason, DisconnectSender, ForwardingHandle, SessionFactory,
    SessionHandle, SessionId, ShellChannel, ShellEvent, ShellRequest, ShellStream,
};
