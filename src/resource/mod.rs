//! Resources opened on the target hop of an authenticated chain.
//!
//! # Architecture
//!
//! - `terminal`: [`TerminalManager`], a registry of interactive shells.
//!   Output is buffered per terminal and read by offset. A shell that ends
//!   deletes its terminal, which tears the chain down.
//! - `forwarding`: [`ForwardingManager`], a registry of local, remote and
//!   dynamic port forwardings, at most one running per stored definition.
//!
//! Both managers plug into their [`Registry`](crate::registry::Registry)
//! through `ResourceHooks`: the resource is opened once the chain is ready
//! and closed when the registry entry goes away. A failure to open only
//! marks the resource failed; the chain stays up so a retry reopens the
//! resource without reconnecting any hop.

mod forwarding;
mod terminal;

pub use forwarding::ForwardingManager;
pub use terminal::{DEFAULT_TERM, ShellOutput, TerminalManager, TerminalOptions, TerminalTarget};

use crate::error::{SessionError, SessionResult};
use crate::registry::ChainedResource;
use crate::types::Host;

/// Replacement credentials for the hop a chain is stuck on.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub password: Option<String>,
    pub key_id: Option<String>,
}

/// Copy of the current hop's host with `credentials` applied.
pub(crate) fn current_hop_with<P>(
    resource: &ChainedResource<P>,
    credentials: Credentials,
) -> SessionResult<Host> {
    let index = resource
        .current_hop()
        .ok_or_else(|| SessionError::new("All hops are already authenticated"))?;
    let mut host = resource.chain[index].host.clone();
    if let Some(password) = credentials.password {
        host.password = Some(password);
    }
    if let Some(key_id) = credentials.key_id {
        host.key_id = Some(key_id);
    }
    Ok(host)
}
