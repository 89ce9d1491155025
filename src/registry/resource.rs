use uuid::Uuid;

use crate::chain::{self, ChainEntry};
use crate::error::SessionError;
use crate::types::ResourceStatus;

/// A terminal or port forwarding together with the chain it runs over.
#[derive(Debug, Clone)]
pub struct ChainedResource<P> {
    pub uuid: Uuid,
    pub name: String,
    /// What the chain was built for: a `Host` or a `PortForwarding`.
    pub target: P,
    pub chain: Vec<ChainEntry>,
    pub status: ResourceStatus,
    /// Failure of the resource itself, e.g. a refused shell or a busy port.
    pub error: Option<SessionError>,
    /// RFC3339 creation time.
    pub created_at: String,
}

impl<P> ChainedResource<P> {
    pub fn is_ready(&self) -> bool {
        chain::is_ready(&self.chain)
    }

    pub fn current_hop(&self) -> Option<usize> {
        chain::current_hop(&self.chain)
    }

    /// The error a client should be shown for this resource.
    pub fn display_error(&self) -> Option<&SessionError> {
        chain::chain_error(&self.chain, self.error.as_ref())
    }

    /// A hop is being worked on, or the resource is opening on a ready chain.
    pub fn is_busy(&self) -> bool {
        chain::is_loading(&self.chain)
            || (self.status == ResourceStatus::Pending && self.is_ready())
    }
}
