//! Read-only lookups for hosts, keys and port forwarding definitions.
//!
//! The chain layer only ever reads through the lookup traits, so any
//! backing store works. [`Inventory`] is the file-based one used by the
//! binaries:
//!
//! ```json
//! {
//!   "hosts": [{ "id": "bastion", "hostname": "203.0.113.7", "port": 22,
//!               "username": "ops", "authenticationMethod": "PublicKey",
//!               "keyId": "ops-key" }],
//!   "keys": [{ "id": "ops-key", "privateKey": "-----BEGIN OPENSSH ..." }],
//!   "portForwardings": []
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{SessionError, SessionResult};
use crate::types::{Host, Key, PortForwarding};

pub trait HostLookup: Send + Sync {
    fn host(&self, id: &str) -> Option<Host>;
}

pub trait KeyLookup: Send + Sync {
    fn key(&self, id: &str) -> Option<Key>;
}

pub trait PortForwardingLookup: Send + Sync {
    fn port_forwarding(&self, id: &str) -> Option<PortForwarding>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InventoryFile {
    #[serde(default)]
    hosts: Vec<Host>,
    #[serde(default)]
    keys: Vec<Key>,
    #[serde(default)]
    port_forwardings: Vec<PortForwarding>,
}

/// Hosts, keys and port forwardings indexed by id.
#[derive(Debug, Default, Clone)]
pub struct Inventory {
    hosts: HashMap<String, Host>,
    keys: HashMap<String, Key>,
    port_forwardings: HashMap<String, PortForwarding>,
}

impl Inventory {
    pub fn from_json(json: &str) -> SessionResult<Self> {
        let file: InventoryFile = serde_json::from_str(json)
            .map_err(|e| SessionError::new(format!("Invalid inventory: {}", e)))?;
        Ok(Self::from_parts(file.hosts, file.keys, file.port_forwardings))
    }

    pub fn load(path: &Path) -> SessionResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let inventory = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            hosts = inventory.hosts.len(),
            keys = inventory.keys.len(),
            port_forwardings = inventory.port_forwardings.len(),
            "Loaded inventory"
        );
        Ok(inventory)
    }

    pub fn from_parts(
        hosts: Vec<Host>,
        keys: Vec<Key>,
        port_forwardings: Vec<PortForwarding>,
    ) -> Self {
        Self {
            hosts: hosts.into_iter().map(|h| (h.id.clone(), h)).collect(),
            keys: keys.into_iter().map(|k| (k.id.clone(), k)).collect(),
            port_forwardings: port_forwardings
                .into_iter()
                .map(|pf| (pf.id.clone(), pf))
                .collect(),
        }
    }

    /// All hosts sorted by id.
    pub fn hosts(&self) -> Vec<Host> {
        let mut hosts: Vec<Host> = self.hosts.values().cloned().collect();
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        hosts
    }

    /// All port forwardings sorted by id.
    pub fn port_forwardings(&self) -> Vec<PortForwarding> {
        let mut forwardings: Vec<PortForwarding> =
            self.port_forwardings.values().cloned().collect();
        forwardings.sort_by(|a, b| a.id.cmp(&b.id));
        forwardings
    }
}

impl HostLookup for Inventory {
    fn host(&self, id: &str) -> Option<Host> {
        self.hosts.get(id).cloned()
    }
}

impl KeyLookup for Inventory {
    fn key(&self, id: &str) -> Option<Key> {
        self.keys.get(id).cloned()
    }
}

impl PortForwardingLookup for Inventory {
    fn port_forwarding(&self, id: &str) -> Option<PortForwarding> {
        self.port_forwardings.get(id).cloned()
    }
}
