use std::fmt;
use std::sync::Arc;

use crate::error::SessionError;
use crate::transport::SessionHandle;
use crate::types::{CheckServerKey, Host, HopStatus};

/// One hop of a chain: the host it reaches and the session that reaches it.
#[derive(Clone)]
pub struct ChainEntry {
    /// Snapshot of the host taken when the chain was resolved.
    pub host: Host,
    pub session: Arc<dyn SessionHandle>,
    pub status: HopStatus,
    /// Set while the establisher is working on this hop.
    pub loading: bool,
    pub error: Option<SessionError>,
    /// Trust decision for an unknown host key, consumed by the next connect.
    pub check_server_key: Option<CheckServerKey>,
}

impl ChainEntry {
    pub fn new(host: Host, session: Arc<dyn SessionHandle>) -> Self {
        Self {
            host,
            session,
            status: HopStatus::Connecting,
            loading: false,
            error: None,
            check_server_key: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == HopStatus::Authenticated
    }
}

impl fmt::Debug for ChainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainEntry")
            .field("host", &self.host.id)
            .field("session", &self.session.id())
            .field("status", &self.status)
            .field("loading", &self.loading)
            .field("error", &self.error)
            .field("check_server_key", &self.check_server_key)
            .finish()
    }
}
