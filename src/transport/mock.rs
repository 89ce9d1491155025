//! Scripted in-memory transport for orchestration tests.
//!
//! Every call made through a [`MockSession`] is appended to a shared log,
//! keyed by the hostname the handle connected to. Failures are queued per
//! hostname and consumed by the next matching call.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use crate::error::{SessionError, SessionResult};
use crate::transport::traits::{
    DisconnectEvent, DisconnectReason, DisconnectSender, ForwardingHandle, SessionFactory,
    SessionHandle, SessionId, ShellChannel, ShellEvent, ShellRequest, ShellStream,
};
use crate::types::{AuthenticationMethod, CheckServerKey, Endpoint, PortForwardingKind, ShellSize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Connect {
        host: String,
        via: Option<String>,
        check_server_key: Option<CheckServerKey>,
    },
    Authenticate {
        host: String,
        method: AuthenticationMethod,
    },
    Disconnect {
        host: String,
    },
    OpenShell {
        host: String,
        term: String,
    },
    Resize {
        host: String,
        size: ShellSize,
    },
    CloseShell {
        host: String,
    },
    OpenForwarding {
        host: String,
        kind: PortForwardingKind,
    },
    CloseForwarding {
        host: String,
    },
}

impl Call {
    pub(crate) fn is_connect_or_authenticate(&self) -> bool {
        matches!(self, Call::Connect { .. } | Call::Authenticate { .. })
    }
}

#[derive(Default)]
struct MockState {
    log: Mutex<Vec<Call>>,
    connect_failures: Mutex<HashMap<String, VecDeque<SessionError>>>,
    auth_failures: Mutex<HashMap<String, VecDeque<SessionError>>>,
    shell_failures: Mutex<HashMap<String, VecDeque<SessionError>>>,
    forwarding_failures: Mutex<HashMap<String, VecDeque<SessionError>>>,
    connect_gates: Mutex<HashMap<String, Arc<Notify>>>,
    connect_delays: Mutex<HashMap<String, Duration>>,
    /// session id -> hostname for connected handles
    connected: Mutex<HashMap<SessionId, String>>,
    senders: Mutex<HashMap<String, (SessionId, DisconnectSender)>>,
    shell_events: Mutex<HashMap<String, mpsc::UnboundedSender<ShellEvent>>>,
    shell_input: Mutex<HashMap<String, Vec<u8>>>,
    disconnected: Mutex<HashSet<SessionId>>,
}

fn pop(queue: &Mutex<HashMap<String, VecDeque<SessionError>>>, host: &str) -> Option<SessionError> {
    queue
        .lock()
        .unwrap()
        .get_mut(host)
        .and_then(|errors| errors.pop_front())
}

fn push(queue: &Mutex<HashMap<String, VecDeque<SessionError>>>, host: &str, err: SessionError) {
    queue
        .lock()
        .unwrap()
        .entry(host.to_string())
        .or_default()
        .push_back(err);
}

#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_connect(&self, host: &str, err: SessionError) {
        push(&self.state.connect_failures, host, err);
    }

    pub(crate) fn fail_auth(&self, host: &str, err: SessionError) {
        push(&self.state.auth_failures, host, err);
    }

    pub(crate) fn fail_shell(&self, host: &str, err: SessionError) {
        push(&self.state.shell_failures, host, err);
    }

    pub(crate) fn fail_forwarding(&self, host: &str, err: SessionError) {
        push(&self.state.forwarding_failures, host, err);
    }

    /// Make the next connect to `host` wait until the returned notify fires.
    pub(crate) fn gate_connect(&self, host: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state
            .connect_gates
            .lock()
            .unwrap()
            .insert(host.to_string(), gate.clone());
        gate
    }

    pub(crate) fn delay_connect(&self, host: &str, delay: Duration) {
        self.state
            .connect_delays
            .lock()
            .unwrap()
            .insert(host.to_string(), delay);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.log.lock().unwrap().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.state.log.lock().unwrap().clear();
    }

    pub(crate) fn connected_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.state.connected.lock().unwrap().values().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Simulate the server dropping the connection of `host`.
    pub(crate) fn drop_connection(&self, host: &str) {
        let entry = self.state.senders.lock().unwrap().get(host).cloned();
        if let Some((session, sender)) = entry {
            self.state.connected.lock().unwrap().remove(&session);
            let _ = sender.send(DisconnectEvent {
                session,
                reason: DisconnectReason::Server,
            });
        }
    }

    /// Push an event into the open shell on `host`.
    pub(crate) fn emit_shell(&self, host: &str, event: ShellEvent) {
        if let Some(events) = self.state.shell_events.lock().unwrap().get(host) {
            let _ = events.send(event);
        }
    }

    pub(crate) fn shell_input(&self, host: &str) -> Vec<u8> {
        self.state
            .shell_input
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, call: Call) {
        self.state.log.lock().unwrap().push(call);
    }
}

impl SessionFactory for MockTransport {
    fn create(&self, on_disconnect: DisconnectSender) -> Arc<dyn SessionHandle> {
        Arc::new(MockSession {
            id: SessionId::new(),
            transport: self.clone(),
            on_disconnect,
        })
    }
}

pub(crate) struct MockSession {
    id: SessionId,
    transport: MockTransport,
    on_disconnect: DisconnectSender,
}

impl MockSession {
    fn host(&self) -> SessionResult<String> {
        self.transport
            .state
            .connected
            .lock()
            .unwrap()
            .get(&self.id)
            .cloned()
            .ok_or(SessionError::NotFoundSession)
    }

    fn forwarding(&self, kind: PortForwardingKind) -> SessionResult<Box<dyn ForwardingHandle>> {
        let host = self.host()?;
        self.transport.record(Call::OpenForwarding {
            host: host.clone(),
            kind,
        });
        if let Some(err) = pop(&self.transport.state.forwarding_failures, &host) {
            return Err(err);
        }
        Ok(Box::new(MockForwarding {
            host,
            transport: self.transport.clone(),
        }))
    }

    fn authenticate(&self, method: AuthenticationMethod) -> SessionResult<()> {
        let host = self.host()?;
        self.transport.record(Call::Authenticate {
            host: host.clone(),
            method,
        });
        match pop(&self.transport.state.auth_failures, &host) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SessionHandle for MockSession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        tunnel_through: Option<SessionId>,
        check_server_key: Option<CheckServerKey>,
    ) -> SessionResult<SessionId> {
        let state = &self.transport.state;
        let host = endpoint.hostname.clone();
        let via = match tunnel_through {
            Some(parent) => Some(
                state
                    .connected
                    .lock()
                    .unwrap()
                    .get(&parent)
                    .cloned()
                    .ok_or(SessionError::NotFoundSession)?,
            ),
            None => None,
        };
        self.transport.record(Call::Connect {
            host: host.clone(),
            via,
            check_server_key,
        });

        let gate = state.connect_gates.lock().unwrap().remove(&host);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let delay = state.connect_delays.lock().unwrap().get(&host).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = pop(&state.connect_failures, &host) {
            return Err(err);
        }

        state.connected.lock().unwrap().insert(self.id, host.clone());
        state
            .senders
            .lock()
            .unwrap()
            .insert(host, (self.id, self.on_disconnect.clone()));
        Ok(self.id)
    }

    async fn authenticate_password(&self, _username: &str, _password: &str) -> SessionResult<()> {
        self.authenticate(AuthenticationMethod::Password)
    }

    async fn authenticate_public_key(
        &self,
        _username: &str,
        _private_key: &str,
        _passphrase: Option<&str>,
    ) -> SessionResult<()> {
        self.authenticate(AuthenticationMethod::PublicKey)
    }

    async fn authenticate_certificate(
        &self,
        _username: &str,
        _private_key: &str,
        _passphrase: Option<&str>,
        _certificate: &str,
    ) -> SessionResult<()> {
        self.authenticate(AuthenticationMethod::Certificate)
    }

    async fn disconnect(&self) -> SessionResult<()> {
        let state = &self.transport.state;
        let host = state.connected.lock().unwrap().remove(&self.id);
        state.disconnected.lock().unwrap().insert(self.id);
        if let Some(host) = host {
            self.transport.record(Call::Disconnect { host });
        }
        Ok(())
    }

    async fn open_shell(&self, request: ShellRequest) -> SessionResult<ShellStream> {
        let host = self.host()?;
        self.transport.record(Call::OpenShell {
            host: host.clone(),
            term: request.term.clone(),
        });
        if let Some(err) = pop(&self.transport.state.shell_failures, &host) {
            return Err(err);
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.transport
            .state
            .shell_events
            .lock()
            .unwrap()
            .insert(host.clone(), events_tx.clone());
        Ok(ShellStream {
            channel: Box::new(MockShell {
                host,
                transport: self.transport.clone(),
                events: events_tx,
            }),
            events: events_rx,
        })
    }

    async fn open_local_forwarding(
        &self,
        _local_address: &str,
        _local_port: u16,
        _remote_address: &str,
        _remote_port: u16,
    ) -> SessionResult<Box<dyn ForwardingHandle>> {
        self.forwarding(PortForwardingKind::Local)
    }

    async fn open_remote_forwarding(
        &self,
        _local_address: &str,
        _local_port: u16,
        _remote_address: &str,
        _remote_port: u16,
    ) -> SessionResult<Box<dyn ForwardingHandle>> {
        self.forwarding(PortForwardingKind::Remote)
    }

    async fn open_dynamic_forwarding(
        &self,
        _local_address: &str,
        _local_port: u16,
    ) -> SessionResult<Box<dyn ForwardingHandle>> {
        self.forwarding(PortForwardingKind::Dynamic)
    }
}

struct MockShell {
    host: String,
    transport: MockTransport,
    events: mpsc::UnboundedSender<ShellEvent>,
}

#[async_trait]
impl ShellChannel for MockShell {
    async fn write(&self, data: &[u8]) -> SessionResult<()> {
        self.transport
            .state
            .shell_input
            .lock()
            .unwrap()
            .entry(self.host.clone())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    async fn resize(&self, size: ShellSize) -> SessionResult<()> {
        self.transport.record(Call::Resize {
            host: self.host.clone(),
            size,
        });
        Ok(())
    }

    async fn close(&self) -> SessionResult<()> {
        self.transport.record(Call::CloseShell {
            host: self.host.clone(),
        });
        let _ = self.events.send(ShellEvent::Close);
        Ok(())
    }
}

struct MockForwarding {
    host: String,
    transport: MockTransport,
}

#[async_trait]
impl ForwardingHandle for MockForwarding {
    async fn close(&self) -> SessionResult<()> {
        self.transport.record(Call::CloseForwarding {
            host: self.host.clone(),
        });
        Ok(())
    }
}

/// Password host whose hostname is `<id>.test`.
pub(crate) fn host(id: &str, jump_host_ids: &[&str]) -> crate::types::Host {
    crate::types::Host {
        id: id.to_string(),
        name: None,
        hostname: format!("{}.test", id),
        port: 22,
        username: "ops".to_string(),
        authentication_method: AuthenticationMethod::Password,
        password: Some("secret".to_string()),
        key_id: None,
        jump_host_ids: if jump_host_ids.is_empty() {
            None
        } else {
            Some(jump_host_ids.iter().map(|id| id.to_string()).collect())
        },
    }
}

/// `target` behind `j1` then `j2`, plus a directly reachable `direct`.
pub(crate) fn inventory() -> crate::inventory::Inventory {
    crate::inventory::Inventory::from_parts(
        vec![
            host("j1", &[]),
            host("j2", &[]),
            host("target", &["j1", "j2"]),
            host("direct", &[]),
        ],
        Vec::new(),
        Vec::new(),
    )
}

/// Poll `check` until it holds, failing the test after five seconds.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}
