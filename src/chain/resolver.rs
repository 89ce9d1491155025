use tracing::debug;

use crate::chain::ChainEntry;
use crate::error::{SessionError, SessionResult};
use crate::inventory::HostLookup;
use crate::transport::{DisconnectSender, SessionFactory};
use crate::types::Host;

/// Expand `host` and its jump hosts into an unconnected chain, nearest hop
/// first and `host` last.
///
/// Every entry gets a fresh session from `factory` reporting unexpected
/// disconnects on `on_disconnect`. No network activity happens here.
pub fn resolve(
    host: &Host,
    hosts: &dyn HostLookup,
    factory: &dyn SessionFactory,
    on_disconnect: &DisconnectSender,
) -> SessionResult<Vec<ChainEntry>> {
    let mut hops = Vec::with_capacity(host.jump_host_ids().len() + 1);
    for id in host.jump_host_ids() {
        let jump_host = hosts
            .host(id)
            .ok_or_else(|| SessionError::UnresolvedJumpHost(id.clone()))?;
        hops.push(jump_host);
    }
    hops.push(host.clone());

    debug!(
        "Resolved chain for {}: {}",
        host.id,
        hops.iter()
            .map(|h| h.id.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    Ok(hops
        .into_iter()
        .map(|hop| ChainEntry::new(hop, factory.create(on_disconnect.clone())))
        .collect())
}
