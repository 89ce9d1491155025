//! Interactive shells over a jump-host chain.
//!
//! A terminal is a [`ChainedResource`] whose target is a host plus the
//! shell request to run on it. When the chain becomes ready the shell is
//! opened and a reader task appends its output to a buffer. The reader
//! deletes the terminal when the shell sends EOF or closes, which in turn
//! tears the chain down.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SessionError, SessionResult};
use crate::inventory::{HostLookup, KeyLookup};
use crate::registry::{ChainedResource, Registry, ResourceHooks, Snapshot};
use crate::resource::{Credentials, current_hop_with};
use crate::transport::{SessionFactory, SessionHandle, ShellChannel, ShellEvent, ShellRequest};
use crate::types::{CheckServerKey, Host, ResourceStatus, ShellSize};

pub const DEFAULT_TERM: &str = "xterm-256color";
const DEFAULT_LANG: &str = "C.UTF-8";

/// What a terminal connects to and how its shell is requested.
#[derive(Debug, Clone)]
pub struct TerminalTarget {
    pub host: Host,
    pub request: ShellRequest,
}

/// Caller choices for a new terminal.
#[derive(Debug, Clone, Default)]
pub struct TerminalOptions {
    pub size: ShellSize,
    pub term: Option<String>,
    /// Extra environment, applied over the local locale variables.
    pub envs: Vec<(String, String)>,
}

/// A slice of buffered shell output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub data: Vec<u8>,
    pub offset: usize,
    pub next_offset: usize,
}

/// Runtime state of an open shell.
struct RunningShell {
    channel: Arc<dyn ShellChannel>,
    output: Arc<Mutex<Vec<u8>>>,
    cancel_token: CancellationToken,
}

type ShellStorage = Arc<DashMap<Uuid, RunningShell>>;

/// Local `LANG` and `LC_*` values with `extra` applied on top.
fn shell_envs(extra: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut envs: BTreeMap<String, String> = std::env::vars()
        .filter(|(name, _)| name == "LANG" || name.starts_with("LC_"))
        .collect();
    envs.entry("LANG".to_string())
        .or_insert_with(|| DEFAULT_LANG.to_string());
    envs.extend(extra);
    envs.into_iter().collect()
}

/// `host.display_name()`, suffixed with ` (n)` when `n` terminals for the
/// same host are already open.
fn terminal_name(host: &Host, existing: &Snapshot<TerminalTarget>) -> String {
    let open = existing
        .values()
        .filter(|t| t.target.host.id == host.id)
        .count();
    match open {
        0 => host.display_name(),
        n => format!("{} ({})", host.display_name(), n),
    }
}

struct TerminalHooks {
    shells: ShellStorage,
}

impl TerminalHooks {
    async fn open_shell(
        &self,
        registry: &Registry<TerminalTarget>,
        resource: &ChainedResource<TerminalTarget>,
        session: Arc<dyn SessionHandle>,
    ) -> SessionResult<()> {
        if !resource.is_ready() {
            return Err(SessionError::NotAuthenticated);
        }
        let uuid = resource.uuid;
        if let Some((_, stale)) = self.shells.remove(&uuid) {
            close_shell(uuid, stale).await;
        }

        let stream = session.open_shell(resource.target.request.clone()).await?;
        let shell = RunningShell {
            channel: Arc::from(stream.channel),
            output: Arc::new(Mutex::new(Vec::new())),
            cancel_token: CancellationToken::new(),
        };
        let output = shell.output.clone();
        let token = shell.cancel_token.clone();
        self.shells.insert(uuid, shell);

        tokio::spawn(read_shell_output(
            registry.clone(),
            uuid,
            stream.events,
            output,
            token,
        ));
        info!("Shell opened for terminal {} '{}'", uuid, resource.name);
        Ok(())
    }
}

#[async_trait]
impl ResourceHooks<TerminalTarget> for TerminalHooks {
    async fn on_ready(
        &self,
        registry: &Registry<TerminalTarget>,
        uuid: Uuid,
        session: Arc<dyn SessionHandle>,
    ) {
        let Some(resource) = registry.get(uuid) else {
            return;
        };
        match self.open_shell(registry, &resource, session).await {
            Ok(()) => {
                if !registry.set_status(uuid, ResourceStatus::Success, None)
                    && let Some((_, shell)) = self.shells.remove(&uuid)
                {
                    // Closed while the shell was opening
                    close_shell(uuid, shell).await;
                }
            }
            Err(e) => {
                warn!("Failed to open shell for terminal {}: {}", uuid, e);
                registry.set_status(uuid, ResourceStatus::Failed, Some(e));
            }
        }
    }

    async fn on_removed(&self, resource: &ChainedResource<TerminalTarget>) {
        if let Some((_, shell)) = self.shells.remove(&resource.uuid) {
            close_shell(resource.uuid, shell).await;
        }
    }
}

async fn close_shell(uuid: Uuid, shell: RunningShell) {
    shell.cancel_token.cancel();
    if let Err(e) = shell.channel.close().await {
        debug!("Closing shell of terminal {}: {}", uuid, e);
    }
}

async fn read_shell_output(
    registry: Registry<TerminalTarget>,
    uuid: Uuid,
    mut events: mpsc::UnboundedReceiver<ShellEvent>,
    output: Arc<Mutex<Vec<u8>>>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            event = events.recv() => match event {
                Some(ShellEvent::Data(data)) => output.lock().await.extend_from_slice(&data),
                Some(ShellEvent::Eof) | Some(ShellEvent::Close) | None => {
                    // A replaced or closed shell must not take the terminal with it
                    if cancel_token.is_cancelled() {
                        break;
                    }
                    info!("Shell of terminal {} ended", uuid);
                    registry.delete(uuid);
                    break;
                }
            },
        }
    }
}

/// Terminals keyed by uuid, each over its own chain.
#[derive(Clone)]
pub struct TerminalManager {
    registry: Registry<TerminalTarget>,
    shells: ShellStorage,
    hosts: Arc<dyn HostLookup>,
}

impl TerminalManager {
    /// Create a manager with no terminals.
    ///
    /// # Arguments
    ///
    /// * `hosts` - Inventory lookup for target and jump hosts
    /// * `keys` - Inventory lookup for private keys
    /// * `factory` - Transport that builds one session per hop
    pub fn new(
        hosts: Arc<dyn HostLookup>,
        keys: Arc<dyn KeyLookup>,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        let shells: ShellStorage = Arc::new(DashMap::new());
        let hooks = Arc::new(TerminalHooks {
            shells: shells.clone(),
        });
        Self {
            registry: Registry::new("terminal", hosts.clone(), keys, factory, hooks),
            shells,
            hosts,
        }
    }

    pub fn registry(&self) -> &Registry<TerminalTarget> {
        &self.registry
    }

    /// Start a terminal on `host_id`. Returns immediately with the pending
    /// resource; the chain is established in the background.
    pub fn open(
        &self,
        host_id: &str,
        options: TerminalOptions,
    ) -> SessionResult<ChainedResource<TerminalTarget>> {
        let host = self
            .hosts
            .host(host_id)
            .ok_or_else(|| SessionError::UnresolvedHost(host_id.to_string()))?;
        let name = terminal_name(&host, &self.registry.get_state());
        let target = TerminalTarget {
            host: host.clone(),
            request: ShellRequest {
                size: options.size,
                term: options.term.unwrap_or_else(|| DEFAULT_TERM.to_string()),
                envs: shell_envs(options.envs),
            },
        };
        let (resource, _) = self.registry.add(name, target, &host)?;
        Ok(resource)
    }

    /// Latest state of a terminal, or `NotFoundResource`.
    pub fn get(&self, uuid: Uuid) -> SessionResult<ChainedResource<TerminalTarget>> {
        self.registry
            .get(uuid)
            .ok_or(SessionError::NotFoundResource(uuid))
    }

    /// Every terminal, oldest first.
    pub fn list(&self) -> Vec<ChainedResource<TerminalTarget>> {
        self.registry.resources()
    }

    /// Delete the terminal. Its shell and chain are closed in the background.
    pub fn close(&self, uuid: Uuid) -> SessionResult<ChainedResource<TerminalTarget>> {
        self.registry
            .delete(uuid)
            .0
            .ok_or(SessionError::NotFoundResource(uuid))
    }

    /// Resume a failed terminal: the chain from its current hop, or only
    /// the shell when every hop is authenticated.
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

    fn shell_channel(&self, uuid: Uuid) -> SessionResult<Arc<dyn ShellChannel>> {
        if let Some(shell) = self.shells.get(&uuid) {
            return Ok(shell.channel.clone());
        }
        let resource = self.get(uuid)?;
        if resource.is_ready() {
            Err(SessionError::new(format!(
                "Shell of terminal {} is not open",
                uuid
            )))
        } else {
            Err(SessionError::NotAuthenticated)
        }
    }

    /// Write raw input to the terminal's shell.
    ///
    /// # Arguments
    ///
    /// * `uuid` - Terminal to write to
    /// * `data` - Bytes as typed, control characters included
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The bytes were queued on the channel
    /// * `Err(NotAuthenticated)` - The chain is not ready yet
    /// * `Err(NotFoundResource)` - No such terminal
    pub async fn send(&self, uuid: Uuid, data: &[u8]) -> SessionResult<()> {
        let channel = self.shell_channel(uuid)?;
        channel.write(data).await
    }

    /// Send a window change for the terminal's shell.
    pub async fn resize(&self, uuid: Uuid, size: ShellSize) -> SessionResult<()> {
        let channel = self.shell_channel(uuid)?;
        channel.resize(size).await
    }

    /// Output buffered since `offset`.
    pub async fn read(&self, uuid: Uuid, offset: usize) -> SessionResult<ShellOutput> {
        let output = match self.shells.get(&uuid) {
            Some(shell) => shell.output.clone(),
            None => {
                self.get(uuid)?;
                return Ok(ShellOutput {
                    data: Vec::new(),
                    offset,
                    next_offset: offset,
                });
            }
        };
        let buffer = output.lock().await;
        let start = offset.min(buffer.len());
        Ok(ShellOutput {
            data: buffer[start..].to_vec(),
            offset: start,
            next_offset: buffer.len(),
        })
    }
}
