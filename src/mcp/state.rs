//! Process-wide state shared by every MCP tool call.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{TransportConfig, resolve_inventory_path};
use crate::error::{SessionError, SessionResult};
use crate::inventory::Inventory;
use crate::registry::{ChainedResource, Registry};
use crate::resource::{ForwardingManager, TerminalManager};
use crate::transport::{RusshTransport, SessionFactory};
use crate::types::ResourceStatus;

/// Upper bound for `wait_secs` on tool calls.
pub const MAX_WAIT_SECS: u64 = 120;

/// Inventory plus the two resource managers.
///
/// Both managers share one session factory, so every hop of every chain
/// goes through the same transport configuration.
pub struct JumpState {
    pub inventory: Arc<Inventory>,
    /// Interactive shells, one chain each
    pub terminals: TerminalManager,
    /// Running port forwardings, one chain each
    pub forwardings: ForwardingManager,
}

impl JumpState {
    pub fn new(inventory: Arc<Inventory>, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            terminals: TerminalManager::new(inventory.clone(), inventory.clone(), factory.clone()),
            forwardings: ForwardingManager::new(
                inventory.clone(),
                inventory.clone(),
                inventory.clone(),
                factory,
            ),
            inventory,
        }
    }

    /// Inventory from `SSH_INVENTORY` and a russh transport configured from
    /// the `SSH_*` variables. A missing inventory file yields an empty one.
    pub fn from_env() -> SessionResult<Self> {
        let path = resolve_inventory_path(None);
        let inventory = if path.exists() {
            Inventory::load(&path)?
        } else {
            warn!(
                "Inventory {} does not exist, starting without hosts",
                path.display()
            );
            Inventory::default()
        };
        let transport = RusshTransport::new(TransportConfig::from_env());
        Ok(Self::new(Arc::new(inventory), Arc::new(transport)))
    }

    /// Close every terminal and forwarding and wait for their chains.
    pub async fn shutdown(&self) {
        futures::join!(
            self.terminals.registry().clear(),
            self.forwardings.registry().clear()
        );
        info!("All chains closed");
    }
}

/// Wait up to `wait_secs` for `uuid` to leave `Pending`, then return its
/// latest state. Without `wait_secs` the current state is returned.
pub async fn settle<P>(
    registry: &Registry<P>,
    uuid: Uuid,
    wait_secs: Option<u64>,
) -> SessionResult<ChainedResource<P>>
where
    P: Clone + Send + Sync + 'static,
{
    if let Some(secs) = wait_secs.filter(|s| *s > 0) {
        let mut rx = registry.subscribe();
        let wait = Duration::from_secs(secs.min(MAX_WAIT_SECS));
        // A timeout just returns the resource as it is
        let _ = tokio::time::timeout(
            wait,
            rx.wait_for(|state| {
                state
                    .get(&uuid)
                    .is_none_or(|r| r.status != ResourceStatus::Pending)
            }),
        )
        .await;
    }
    registry
        .get(uuid)
        .ok_or(SessionError::NotFoundResource(uuid))
}

/// Parse a resource id passed by a client, ignoring surrounding whitespace.
pub fn parse_uuid(id: &str) -> SessionResult<Uuid> {
    Uuid::parse_str(id.trim()).map_err(|e| SessionError::new(format!("Invalid id '{}': {}", id, e)))
}
