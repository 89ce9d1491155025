//! Copy-on-write registry of chained resources.
//!
//! # Architecture
//!
//! The registry state is an immutable `Arc<HashMap<Uuid, ChainedResource>>`
//! published through a `tokio::sync::watch` channel. Every mutation builds
//! a new map (`Arc::make_mut` on a shared snapshot) and publishes it, so a
//! snapshot handed out earlier never changes under its holder.
//!
//! - `add` resolves the chain, stores a `Pending` resource and spawns the
//!   establisher. Hop progress is written back with per-hop updates that
//!   only land while the resource is still present.
//! - A per-resource watcher deletes the resource on the first unexpected
//!   disconnect of any hop.
//! - `delete` removes the resource, runs the `on_removed` hook and tears the
//!   chain down in the background. Deleting twice is a no-op.
//!
//! What happens once a chain is fully authenticated is up to the
//! [`ResourceHooks`] the registry was built with: the terminal manager opens
//! a shell, the forwarding manager opens a port forwarding.

mod resource;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use resource::ChainedResource;

use crate::chain::{self, ChainEntry};
use crate::error::{SessionError, SessionResult};
use crate::inventory::{HostLookup, KeyLookup};
use crate::transport::{DisconnectEvent, SessionFactory, SessionHandle};
use crate::types::{CheckServerKey, Host, ResourceStatus};

pub type Snapshot<P> = Arc<HashMap<Uuid, ChainedResource<P>>>;

/// Resource-specific steps around a chain's lifetime.
#[async_trait]
pub trait ResourceHooks<P>: Send + Sync
where
    P: Clone + Send + Sync + 'static,
{
    /// The chain of `uuid` is fully authenticated; open the resource on
    /// `session` and record the outcome with [`Registry::set_status`].
    async fn on_ready(&self, registry: &Registry<P>, uuid: Uuid, session: Arc<dyn SessionHandle>);

    /// The resource has left the registry; its chain is torn down afterwards.
    async fn on_removed(&self, resource: &ChainedResource<P>);
}

struct RegistryInner<P>
where
    P: Clone + Send + Sync + 'static,
{
    kind: &'static str,
    hosts: Arc<dyn HostLookup>,
    keys: Arc<dyn KeyLookup>,
    factory: Arc<dyn SessionFactory>,
    hooks: Arc<dyn ResourceHooks<P>>,
    state: watch::Sender<Snapshot<P>>,
}

/// Cheaply clonable handle to one registry.
pub struct Registry<P>
where
    P: Clone + Send + Sync + 'static,
{
    inner: Arc<RegistryInner<P>>,
}

impl<P> Clone for Registry<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> Registry<P>
where
    P: Clone + Send + Sync + 'static,
{
    /// Create an empty registry.
    ///
    /// # Arguments
    ///
    /// * `kind` - Resource noun used in log lines, e.g. `"terminal"`
    /// * `hosts` - Lookup used to resolve jump host chains
    /// * `keys` - Lookup for the private keys hops authenticate with
    /// * `factory` - Builds one fresh session handle per hop
    /// * `hooks` - Opens and closes the resource on top of a ready chain
    pub fn new(
        kind: &'static str,
        hosts: Arc<dyn HostLookup>,
        keys: Arc<dyn KeyLookup>,
        factory: Arc<dyn SessionFactory>,
        hooks: Arc<dyn ResourceHooks<P>>,
    ) -> Self {
        let (state, _) = watch::channel(Arc::new(HashMap::new()));
        Self {
            inner: Arc::new(RegistryInner {
                kind,
                hosts,
                keys,
                factory,
                hooks,
                state,
            }),
        }
    }

    /// Resolve the chain to `host`, store a pending resource for `target`
    /// and start establishing it in the background.
    pub fn add(
        &self,
        name: String,
        target: P,
        host: &Host,
    ) -> SessionResult<(ChainedResource<P>, Snapshot<P>)> {
        let uuid = Uuid::new_v4();
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let mut chain = chain::resolve(
            host,
            self.inner.hosts.as_ref(),
            self.inner.factory.as_ref(),
            &disconnect_tx,
        )?;
        drop(disconnect_tx);
        if let Some(first) = chain.first_mut() {
            first.loading = true;
        }

        let resource = ChainedResource {
            uuid,
            name,
            target,
            chain,
            status: ResourceStatus::Pending,
            error: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        self.inner.state.send_modify(|state| {
            Arc::make_mut(state).insert(uuid, resource.clone());
        });
        info!(
            "Added {} {} '{}' ({} hops)",
            self.inner.kind,
            uuid,
            resource.name,
            resource.chain.len()
        );

        self.watch_disconnects(uuid, disconnect_rx);
        self.spawn_establish(uuid);
        Ok((resource, self.get_state()))
    }

    /// Replace a resource, but only while it is still registered.
    pub fn update(&self, resource: ChainedResource<P>) -> bool {
        let uuid = resource.uuid;
        self.inner.state.send_if_modified(move |state| {
            if !state.contains_key(&uuid) {
                return false;
            }
            Arc::make_mut(state).insert(uuid, resource);
            true
        })
    }

    /// Write back one hop. Returns `false` once the resource is gone.
    fn update_hop(&self, uuid: Uuid, index: usize, entry: &ChainEntry) -> bool {
        self.inner.state.send_if_modified(|state| {
            if !state.contains_key(&uuid) {
                return false;
            }
            if let Some(resource) = Arc::make_mut(state).get_mut(&uuid)
                && let Some(slot) = resource.chain.get_mut(index)
            {
                *slot = entry.clone();
            }
            true
        })
    }

    /// Record the outcome of opening the resource itself.
    pub fn set_status(
        &self,
        uuid: Uuid,
        status: ResourceStatus,
        error: Option<SessionError>,
    ) -> bool {
        self.inner.state.send_if_modified(|state| {
            if !state.contains_key(&uuid) {
                return false;
            }
            if let Some(resource) = Arc::make_mut(state).get_mut(&uuid) {
                resource.status = status;
                resource.error = error;
            }
            true
        })
    }

    /// Remove a resource and tear its chain down in the background.
    ///
    /// Returns `None` when the resource was already gone.
    pub fn delete(&self, uuid: Uuid) -> (Option<ChainedResource<P>>, Snapshot<P>) {
        let mut removed = None;
        self.inner.state.send_if_modified(|state| {
            if !state.contains_key(&uuid) {
                return false;
            }
            removed = Arc::make_mut(state).remove(&uuid);
            true
        });

        if let Some(resource) = &removed {
            info!("Deleted {} {} '{}'", self.inner.kind, uuid, resource.name);
            let hooks = self.inner.hooks.clone();
            let resource = resource.clone();
            tokio::spawn(async move {
                hooks.on_removed(&resource).await;
                chain::tear_down(&resource.chain).await;
            });
        }

        (removed, self.get_state())
    }

    /// Remove every resource and wait until all chains are torn down.
    pub async fn clear(&self) {
        let mut removed = HashMap::new();
        self.inner.state.send_if_modified(|state| {
            if state.is_empty() {
                return false;
            }
            removed = std::mem::take(Arc::make_mut(state));
            true
        });
        if removed.is_empty() {
            return;
        }

        info!("Closing {} {} resource(s)", removed.len(), self.inner.kind);
        let hooks = self.inner.hooks.clone();
        join_all(removed.values().map(|resource| {
            let hooks = hooks.clone();
            async move {
                hooks.on_removed(resource).await;
                chain::tear_down(&resource.chain).await;
            }
        }))
        .await;
    }

    /// Current snapshot of every resource, keyed by uuid.
    pub fn get_state(&self) -> Snapshot<P> {
        self.inner.state.borrow().clone()
    }

    /// Latest state of one resource.
    ///
    /// # Returns
    ///
    /// * `Some(resource)` - A clone of the stored resource, chain included
    /// * `None` - The uuid was never registered or has been deleted
    pub fn get(&self, uuid: Uuid) -> Option<ChainedResource<P>> {
        self.inner.state.borrow().get(&uuid).cloned()
    }

    /// All resources, oldest first.
    pub fn resources(&self) -> Vec<ChainedResource<P>> {
        let mut resources: Vec<_> = self.get_state().values().cloned().collect();
        resources.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        resources
    }

    /// Receiver that sees a new snapshot after every hop or status change.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot<P>> {
        self.inner.state.subscribe()
    }

    /// Run the establisher again from the current hop status.
    pub fn establish(&self, uuid: Uuid) -> SessionResult<()> {
        self.begin_establish(uuid, |_| Ok(()))
    }

    /// Retry with a trust decision for the current hop's unknown host key.
    pub fn reconnect(&self, uuid: Uuid, check_server_key: CheckServerKey) -> SessionResult<()> {
        self.begin_establish(uuid, |resource| {
            if let Some(index) = resource.current_hop() {
                resource.chain[index].check_server_key = Some(check_server_key);
            }
            Ok(())
        })
    }

    /// Retry with new credentials for the current hop.
    pub fn reauthenticate(&self, uuid: Uuid, host: Host) -> SessionResult<()> {
        self.begin_establish(uuid, move |resource| {
            let index = resource
                .current_hop()
                .ok_or_else(|| SessionError::new("All hops are already authenticated"))?;
            let entry = &mut resource.chain[index];
            if entry.host.id != host.id {
                return Err(SessionError::new(format!(
                    "Host {} is not the current hop ({})",
                    host.id, entry.host.id
                )));
            }
            entry.host = host;
            Ok(())
        })
    }

    /// Atomically check the resource is idle, apply `prepare`, mark it
    /// pending and spawn the establisher.
    fn begin_establish<F>(&self, uuid: Uuid, prepare: F) -> SessionResult<()>
    where
        F: FnOnce(&mut ChainedResource<P>) -> SessionResult<()>,
    {
        let mut outcome = Err(SessionError::NotFoundResource(uuid));
        self.inner.state.send_if_modified(|state| {
            match state.get(&uuid) {
                None => return false,
                Some(resource) if resource.is_busy() => {
                    outcome = Err(SessionError::Busy);
                    return false;
                }
                Some(_) => {}
            }
            let Some(resource) = Arc::make_mut(state).get_mut(&uuid) else {
                return false;
            };
            if let Err(e) = prepare(resource) {
                outcome = Err(e);
                return false;
            }
            resource.status = ResourceStatus::Pending;
            resource.error = None;
            if let Some(index) = resource.current_hop() {
                resource.chain[index].loading = true;
                resource.chain[index].error = None;
            }
            outcome = Ok(());
            true
        });
        outcome?;

        debug!("Re-establishing {} {}", self.inner.kind, uuid);
        self.spawn_establish(uuid);
        Ok(())
    }

    fn watch_disconnects(&self, uuid: Uuid, mut events: mpsc::UnboundedReceiver<DisconnectEvent>) {
        let registry = self.clone();
        tokio::spawn(async move {
            if let Some(event) = events.recv().await {
                warn!(
                    "Session {} of {} {} disconnected ({:?}), removing it",
                    event.session, registry.inner.kind, uuid, event.reason
                );
                registry.delete(uuid);
            }
        });
    }

    fn spawn_establish(&self, uuid: Uuid) {
        let registry = self.clone();
        tokio::spawn(async move {
            registry.run_establish(uuid).await;
        });
    }

    async fn run_establish(&self, uuid: Uuid) {
        let Some(resource) = self.get(uuid) else {
            return;
        };
        let mut chain = resource.chain;

        let result = match chain::target_session(&chain) {
            Some(session) => Ok(session),
            None => {
                chain::establish(&mut chain, self.inner.keys.as_ref(), |index, entry| {
                    self.update_hop(uuid, index, entry)
                })
                .await
            }
        };

        match result {
            Ok(session) => self.inner.hooks.on_ready(self, uuid, session).await,
            Err(SessionError::Abandoned) => {
                debug!(
                    "{} {} removed during establishment, disconnecting its hops",
                    self.inner.kind, uuid
                );
                chain::tear_down(&chain).await;
            }
            Err(err) => {
                warn!("Establishing {} {} failed: {}", self.inner.kind, uuid, err);
                self.set_status(uuid, ResourceStatus::Failed, Some(err));
            }
        }
    }
}
