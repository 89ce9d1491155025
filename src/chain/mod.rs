//! Jump-host chains: resolving, establishing and tearing down.
//!
//! # Architecture
//!
//! - `resolver`: host + jump host ids -> unconnected [`ChainEntry`] list
//! - `establish`: sequential connect/authenticate state machine per hop
//! - `demolish`: reverse-order disconnect
//!
//! A chain is a plain `Vec<ChainEntry>`, nearest hop first and the target
//! last. Hop `i + 1` is always tunneled through the session of hop `i`.
//! The helpers below compute the views a client renders from a chain.

mod demolish;
mod entry;
mod establish;
mod resolver;

use std::sync::Arc;

pub use demolish::tear_down;
pub use entry::ChainEntry;
pub use establish::establish;
pub use resolver::resolve;

use crate::error::SessionError;
use crate::transport::SessionHandle;

/// Index of the first hop that is not yet authenticated.
pub fn current_hop(chain: &[ChainEntry]) -> Option<usize> {
    chain.iter().position(|e| !e.is_authenticated())
}

/// The last hop is authenticated, so resources can be opened on it.
pub fn is_ready(chain: &[ChainEntry]) -> bool {
    chain.last().is_some_and(ChainEntry::is_authenticated)
}

/// Whether any hop is being connected or authenticated right now.
pub fn is_loading(chain: &[ChainEntry]) -> bool {
    chain.iter().any(|e| e.loading)
}

/// Session of the target hop, once the whole chain is authenticated.
pub fn target_session(chain: &[ChainEntry]) -> Option<Arc<dyn SessionHandle>> {
    if is_ready(chain) {
        chain.last().map(|e| e.session.clone())
    } else {
        None
    }
}

/// Error to show for a chained resource: the first failing hop wins over
/// the resource's own error.
pub fn chain_error<'a>(
    chain: &'a [ChainEntry],
    resource_error: Option<&'a SessionError>,
) -> Option<&'a SessionError> {
    chain
        .iter()
        .filter(|e| !e.is_authenticated())
        .find_map(|e| e.error.as_ref())
        .or(resource_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::HostLookup;
    use crate::transport::mock::{self, MockTransport};
    use crate::types::HopStatus;
    use tokio::sync::mpsc;

    fn chain() -> Vec<ChainEntry> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let inventory = mock::inventory();
        let target = inventory.host("target").unwrap();
        resolve(&target, &inventory, &MockTransport::new(), &tx).unwrap()
    }

    #[test]
    fn test_current_hop_is_first_unauthenticated() {
        let mut chain = chain();
        assert_eq!(current_hop(&chain), Some(0));
        chain[0].status = HopStatus::Authenticated;
        chain[1].status = HopStatus::Connected;
        assert_eq!(current_hop(&chain), Some(1));
        chain[1].status = HopStatus::Authenticated;
        chain[2].status = HopStatus::Authenticated;
        assert_eq!(current_hop(&chain), None);
    }

    #[test]
    fn test_ready_only_when_target_authenticated() {
        let mut chain = chain();
        assert!(!is_ready(&chain));
        assert!(target_session(&chain).is_none());
        for entry in &mut chain {
            entry.status = HopStatus::Authenticated;
        }
        assert!(is_ready(&chain));
        assert_eq!(target_session(&chain).unwrap().id(), chain[2].session.id());
        assert!(!is_ready(&[]));
    }

    #[test]
    fn test_hop_error_wins_over_resource_error() {
        let mut chain = chain();
        let resource_error = SessionError::new("bind failed");
        assert_eq!(
            chain_error(&chain, Some(&resource_error)),
            Some(&resource_error)
        );

        chain[1].error = Some(SessionError::NotFoundSession);
        assert_eq!(
            chain_error(&chain, Some(&resource_error)),
            Some(&SessionError::NotFoundSession)
        );
    }

    #[test]
    fn test_authenticated_hop_error_is_ignored() {
        let mut chain = chain();
        chain[0].status = HopStatus::Authenticated;
        chain[0].error = Some(SessionError::new("stale"));
        assert_eq!(chain_error(&chain, None), None);
    }

    #[test]
    fn test_loading_flag() {
        let mut chain = chain();
        assert!(!is_loading(&chain));
        chain[2].loading = true;
        assert!(is_loading(&chain));
    }
}
