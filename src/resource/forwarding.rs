//! Port forwardings over a jump-host chain.
//!
//! Every stored [`PortForwarding`] definition runs at most once at a time.
//! The forwarding itself is opened on the target hop when the chain is
//! ready; stopping closes it first and then deletes the resource, which
//! tears the chain down.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SessionError, SessionResult};
use crate::inventory::{HostLookup, KeyLookup, PortForwardingLookup};
use crate::registry::{ChainedResource, Registry, ResourceHooks};
use crate::resource::{Credentials, current_hop_with};
use crate::transport::{ForwardingHandle, SessionFactory, SessionHandle};
use crate::types::{CheckServerKey, PortForwarding, PortForwardingKind, ResourceStatus};

type ActiveForwardings = Arc<DashMap<Uuid, Arc<dyn ForwardingHandle>>>;

/// Destination of a local or remote forwarding.
fn remote_endpoint(forwarding: &PortForwarding) -> SessionResult<(&str, u16)> {
    match (&forwarding.remote_address, forwarding.remote_port) {
        (Some(address), Some(port)) if !address.is_empty() => Ok((address.as_str(), port)),
        _ => Err(SessionError::new(format!(
            "Port forwarding {} needs a remote address and port",
            forwarding.id
        ))),
    }
}

async fn open_forwarding(
    session: &dyn SessionHandle,
    forwarding: &PortForwarding,
) -> SessionResult<Box<dyn ForwardingHandle>> {
    match forwarding.kind {
        PortForwardingKind::Local => {
            let (remote_address, remote_port) = remote_endpoint(forwarding)?;
            session
                .open_local_forwarding(
                    &forwarding.local_address,
                    forwarding.local_port,
                    remote_address,
                    remote_port,
                )
                .await
        }
        PortForwardingKind::Remote => {
            let (remote_address, remote_port) = remote_endpoint(forwarding)?;
            session
                .open_remote_forwarding(
                    &forwarding.local_address,
                    forwarding.local_port,
                    remote_address,
                    remote_port,
                )
                .await
        }
        PortForwardingKind::Dynamic => {
            session
                .open_dynamic_forwarding(&forwarding.local_address, forwarding.local_port)
                .await
        }
    }
}

async fn close_forwarding(uuid: Uuid, handle: Arc<dyn ForwardingHandle>) {
    if let Err(e) = handle.close().await {
        debug!("Closing forwarding {}: {}", uuid, e);
    }
}

struct ForwardingHooks {
    active: ActiveForwardings,
}

#[async_trait]
impl ResourceHooks<PortForwarding> for ForwardingHooks {
    async fn on_ready(
        &self,
        registry: &Registry<PortForwarding>,
        uuid: Uuid,
        session: Arc<dyn SessionHandle>,
    ) {
        let Some(resource) = registry.get(uuid) else {
            return;
        };
        if let Some((_, stale)) = self.active.remove(&uuid) {
            close_forwarding(uuid, stale).await;
        }

        match open_forwarding(session.as_ref(), &resource.target).await {
            Ok(handle) => {
                let handle: Arc<dyn ForwardingHandle> = Arc::from(handle);
                self.active.insert(uuid, handle.clone());
                if registry.set_status(uuid, ResourceStatus::Success, None) {
                    info!(
                        "Port forwarding '{}' running: {}",
                        resource.name,
                        resource.target.describe()
                    );
                } else if self.active.remove(&uuid).is_some() {
                    // Stopped while the forwarding was opening
                    close_forwarding(uuid, handle).await;
                }
            }
            Err(e) => {
                warn!("Failed to open port forwarding '{}': {}", resource.name, e);
                registry.set_status(uuid, ResourceStatus::Failed, Some(e));
            }
        }
    }

    async fn on_removed(&self, resource: &ChainedResource<PortForwarding>) {
        if let Some((_, handle)) = self.active.remove(&resource.uuid) {
            close_forwarding(resource.uuid, handle).await;
        }
    }
}

/// Running port forwardings keyed by uuid.
#[derive(Clone)]
pub struct ForwardingManager {
    registry: Registry<PortForwarding>,
    active: ActiveForwardings,
    hosts: Arc<dyn HostLookup>,
    forwardings: Arc<dyn PortForwardingLookup>,
}

impl ForwardingManager {
    pub fn new(
        hosts: Arc<dyn HostLookup>,
        keys: Arc<dyn KeyLookup>,
        forwardings: Arc<dyn PortForwardingLookup>,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        let active: ActiveForwardings = Arc::new(DashMap::new());
        let hooks = Arc::new(ForwardingHooks {
            active: active.clone(),
        });
        Self {
            registry: Registry::new("port forwarding", hosts.clone(), keys, factory, hooks),
            active,
            hosts,
            forwardings,
        }
    }

    pub fn registry(&self) -> &Registry<PortForwarding> {
        &self.registry
    }

    /// Start the stored forwarding `port_forwarding_id`, or return the
    /// resource already running it.
    pub fn start(&self, port_forwarding_id: &str) -> SessionResult<ChainedResource<PortForwarding>> {
        let forwarding = self
            .forwardings
            .port_forwarding(port_forwarding_id)
            .ok_or_else(|| SessionError::UnresolvedPortForwarding(port_forwarding_id.to_string()))?;

        if let Some(running) = self
            .registry
            .get_state()
            .values()
            .find(|r| r.target.id == forwarding.id)
        {
            debug!(
                "Port forwarding {} already running as {}",
                forwarding.id, running.uuid
            );
            return Ok(running.clone());
        }

        if forwarding.kind != PortForwardingKind::Dynamic {
            remote_endpoint(&forwarding)?;
        }
        let host = self
            .hosts
            .host(&forwarding.host_id)
            .ok_or_else(|| SessionError::UnresolvedHost(forwarding.host_id.clone()))?;

        let (resource, _) = self
            .registry
            .add(forwarding.name.clone(), forwarding, &host)?;
        Ok(resource)
    }

    /// Latest state of a running forwarding, or `NotFoundResource`.
    pub fn get(&self, uuid: Uuid) -> SessionResult<ChainedResource<PortForwarding>> {
        self.registry
            .get(uuid)
            .ok_or(SessionError::NotFoundResource(uuid))
    }

    /// Every running forwarding, oldest first.
    pub fn list(&self) -> Vec<ChainedResource<PortForwarding>> {
        self.registry.resources()
    }

    /// Close the forwarding, then delete the resource and its chain.
    pub async fn stop(&self, uuid: Uuid) -> SessionResult<ChainedResource<PortForwarding>> {
        self.get(uuid)?;
        if let Some((_, handle)) = self.active.remove(&uuid) {
            close_forwarding(uuid, handle).await;
        }
        self.registry
            .delete(uuid)
            .0
            .ok_or(SessionError::NotFoundResource(uuid))
    }

    /// Resume a failed forwarding: the chain from its current hop, or only
    /// the forwarding when every hop is authenticated.
    pub fn retry(&self, uuid: Uuid) -> SessionResult<()> {
        self.registry.establish(uuid)
    }

    pub fn reconnect(&self, uuid: Uuid, check_server_key: CheckServerKey) -> SessionResult<()> {
        self.registry.reconnect(uuid, check_server_key)
    }

    pub fn reauthenticate(&self, uuid: Uuid, credentials: Credentials) -> SessionResult<()> {
        let host = current_hop_with(&self.get(uuid)?, credentials)?;
        self.registry.reauthenticate(uuid, host)
    }
}
