//! Bootstrap sessions: the entry point for joining a network.
//!
//! A session owns the transport handle, the protocol state machine and a
//! background availability loop that looks for an online correspondent.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, warn};

use treejoin_core::{Address, Layout, Message, ObjectId, Peer};
use treejoin_store::{
    count_files, make_layout, read_peer, write_peer, IdentityDump, ModelFactory,
};
use treejoin_sync::{
    Latch, MachineConfig, ProtocolStateMachine, SessionHooks, StopSignal, TaskHandle,
    TransportChannel, TransportConnector,
};

use crate::config::BootstrapConfig;
use crate::error::{BootstrapError, Result};

/// Called once when the bootstrap completed.
pub type DoneCallback = Box<dyn FnOnce() + Send>;

/// Where a session is in its life cycle. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Idle,
    AwaitingPeer,
    Exchanging,
    Done,
    Closed,
}

/// Online state of one known peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerStatus {
    pub address: Address,
    /// `None` if the transport could not answer for this peer.
    pub online: Option<bool>,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.online {
            Some(true) => "ONLINE",
            Some(false) => "OFFLINE",
            None => "ERROR",
        };
        write!(f, "{} {}", self.address, state)
    }
}

/// A node joining an existing network.
pub struct BootstrapSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: BootstrapConfig,
    layout: Layout,
    peer: Peer,
    transport: Arc<dyn TransportChannel>,
    machine: Arc<ProtocolStateMachine>,
    state: Mutex<SessionState>,
    availability: TaskHandle,
    starting: AtomicBool,
    done: Latch,
    closed: Latch,
    on_done: Mutex<Option<DoneCallback>>,
}

impl BootstrapSession {
    // ─────────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a session on a fresh root.
    ///
    /// Materializes the directory layout, connects a new transport identity
    /// and starts looking for an online correspondent.
    pub async fn create(
        config: BootstrapConfig,
        name: &str,
        connector: &dyn TransportConnector,
        factory: Arc<dyn ModelFactory>,
        on_done: DoneCallback,
    ) -> Result<Self> {
        let layout = config.layout();
        if Layout::is_initialized(layout.root()) || layout.identity_file().exists() {
            return Err(BootstrapError::AlreadyInitialized(layout.root().to_path_buf()));
        }
        make_layout(&layout)?;

        let identification = ObjectId::random();
        let session = Self::open(config, name, identification, None, connector, factory, on_done)
            .await?;
        info!(
            address = %session.inner.peer.address.short(),
            trusted = session.inner.layout.is_trusted(),
            "bootstrap session created"
        );
        Ok(session)
    }

    /// Reopen a trusted root created earlier, keeping its identity.
    ///
    /// The root must hold exactly one peer descriptor in its roster and a
    /// cached self descriptor.
    pub async fn load(
        config: BootstrapConfig,
        connector: &dyn TransportConnector,
        factory: Arc<dyn ModelFactory>,
        on_done: DoneCallback,
    ) -> Result<Self> {
        let layout = config.layout();
        if !Layout::is_initialized(layout.root()) {
            return Err(BootstrapError::NotInitialized(layout.root().to_path_buf()));
        }
        let self_file = layout.self_peer_file().ok_or_else(|| {
            BootstrapError::NotBootstrapCapable("untrusted roots can not be reopened".into())
        })?;

        let peers = count_files(&layout.peers_dir()).unwrap_or(0);
        if peers != 1 || !self_file.is_file() {
            return Err(BootstrapError::NotBootstrapCapable(format!(
                "{} peers in roster, self descriptor {}",
                peers,
                if self_file.is_file() { "present" } else { "missing" }
            )));
        }

        let peer = read_peer(&self_file)?;
        let dump = IdentityDump::read(&layout.identity_file())?;
        let identity = dump.identity_bytes()?;

        let session = Self::open(
            config,
            &peer.name,
            peer.identification.clone(),
            Some(identity),
            connector,
            factory,
            on_done,
        )
        .await?;
        if session.inner.peer.address != peer.address {
            warn!(
                expected = %peer.address.short(),
                actual = %session.inner.peer.address.short(),
                "transport address changed since the root was created"
            );
        }
        info!(address = %session.inner.peer.address.short(), "bootstrap session loaded");
        Ok(session)
    }

    async fn open(
        config: BootstrapConfig,
        name: &str,
        identification: ObjectId,
        identity: Option<Bytes>,
        connector: &dyn TransportConnector,
        factory: Arc<dyn ModelFactory>,
        on_done: DoneCallback,
    ) -> Result<Self> {
        let layout = config.layout();
        let machine_config =
            MachineConfig::new(layout.clone(), identification.clone(), config.registry())
                .with_resend_interval(config.resend_interval);
        let machine = ProtocolStateMachine::new(machine_config, factory);

        let transport = connector.connect(name, identity, machine.clone()).await?;
        machine.attach_transport(&transport);

        let peer = Peer {
            identification,
            name: name.to_string(),
            address: transport.address()?,
            trusted: layout.is_trusted(),
        };

        let inner = Arc::new(SessionInner {
            config,
            layout,
            peer,
            transport,
            machine,
            state: Mutex::new(SessionState::Idle),
            availability: TaskHandle::new(),
            starting: AtomicBool::new(false),
            done: Latch::new(),
            closed: Latch::new(),
            on_done: Mutex::new(Some(on_done)),
        });
        let hooks: Arc<dyn SessionHooks> = inner.clone();
        inner.machine.attach_hooks(&hooks);

        let weak = Arc::downgrade(&inner);
        let period = inner.config.poll_interval;
        inner
            .availability
            .spawn(move |stop| availability_loop(weak, period, stop));

        Ok(Self { inner })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Ask the member at `address` to accept this node.
    ///
    /// Transport errors are returned unchanged and leave the session usable
    /// for another attempt.
    pub async fn start(&self, address: &Address) -> Result<()> {
        if self.inner.closed.is_fired() {
            return Err(BootstrapError::Closed);
        }
        let _guard = StartGuard::acquire(&self.inner.starting)?;

        let descriptor = self.inner.peer.to_json()?;
        self.inner
            .transport
            .request_connection(address, &descriptor)
            .await?;

        self.inner.advance(SessionState::AwaitingPeer);
        info!(address = %address.short(), "connection requested");
        Ok(())
    }

    /// This node's own connectable address.
    pub fn address(&self) -> Result<Address> {
        Ok(self.inner.transport.address()?)
    }

    /// Persist the layout, the self descriptor and the transport identity.
    ///
    /// Returns the first error; calling it again is safe.
    pub fn store(&self) -> Result<()> {
        self.inner.store()
    }

    /// Known peers and whether they are online. A peer the transport can not
    /// answer for is reported with an unknown state.
    pub async fn status(&self) -> Result<Vec<PeerStatus>> {
        let friends = self.inner.transport.friend_addresses().await?;
        let mut statuses = Vec::with_capacity(friends.len());
        for address in friends {
            let online = match self.inner.transport.is_online(&address).await {
                Ok(online) => Some(online),
                Err(e) => {
                    debug!(address = %address.short(), "status query failed: {}", e);
                    None
                }
            };
            statuses.push(PeerStatus { address, online });
        }
        Ok(statuses)
    }

    /// Print [`status`](Self::status) to stdout, one peer per line.
    pub async fn print_status(&self) {
        match self.status().await {
            Ok(statuses) => {
                for status in statuses {
                    println!("{}", status);
                }
            }
            Err(e) => println!("ERROR {}", e),
        }
    }

    /// Stop every background task and release the transport.
    ///
    /// Closing twice, or after completion, is a no-op.
    pub async fn close(&self) {
        if !self.inner.closed.fire() {
            return;
        }
        self.inner.availability.shutdown().await;
        self.inner.machine.shutdown().await;
        self.inner.transport.close().await;
        self.inner.advance(SessionState::Closed);
        info!(address = %self.inner.peer.address.short(), "bootstrap session closed");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        *self.inner.state()
    }

    pub fn peer(&self) -> &Peer {
        &self.inner.peer
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    /// The protocol state machine driving this session.
    pub fn machine(&self) -> &Arc<ProtocolStateMachine> {
        &self.inner.machine
    }

    /// Whether the availability loop is still polling.
    pub fn is_polling(&self) -> bool {
        self.inner.availability.is_running()
    }
}

impl SessionInner {
    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, to: SessionState) {
        let mut state = self.state();
        if to > *state {
            debug!(from = ?*state, to = ?to, "session state");
            *state = to;
        }
    }

    fn store(&self) -> Result<()> {
        persist(&self.layout, &self.peer, &self.transport.identity())
    }

    async fn done(&self) {
        if !self.done.fire() {
            return;
        }
        self.availability.cancel();

        let (layout, peer) = (self.layout.clone(), self.peer.clone());
        let identity = self.transport.identity();
        let stored = tokio::task::spawn_blocking(move || persist(&layout, &peer, &identity)).await;
        match stored {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(root = %self.layout.root().display(), "failed to store session: {}", e)
            }
            Err(e) => warn!(root = %self.layout.root().display(), "store task failed: {}", e),
        }
        self.advance(SessionState::Done);

        let callback = self
            .on_done
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// One availability tick. Returns whether to keep polling.
    async fn poll(&self) -> bool {
        let online = match self.transport.online_addresses().await {
            Ok(online) => online,
            Err(e) => {
                debug!("online query failed: {}", e);
                return true;
            }
        };
        let Some(target) = online.first() else {
            return true;
        };
        if online.len() > 1 {
            warn!(
                count = online.len(),
                chosen = %target.short(),
                "several peers online, using the first"
            );
        }

        if self.layout.is_trusted() {
            let request = match Message::model_request().to_json() {
                Ok(request) => request,
                Err(e) => {
                    warn!("failed to encode model request: {}", e);
                    return false;
                }
            };
            if let Err(e) = self.transport.send(target, &request).await {
                warn!(address = %target.short(), "model request failed: {}", e);
            } else {
                debug!(address = %target.short(), "model requested");
            }
            true
        } else {
            info!(address = %target.short(), "correspondent online");
            self.advance(SessionState::Exchanging);
            false
        }
    }
}

#[async_trait]
impl SessionHooks for SessionInner {
    fn on_answer(&self) {
        self.availability.cancel();
        self.advance(SessionState::Exchanging);
    }

    async fn on_complete(&self) {
        self.done().await;
    }
}

/// Write the layout, the self descriptor and the transport identity.
fn persist(layout: &Layout, peer: &Peer, identity: &Bytes) -> Result<()> {
    make_layout(layout)?;
    let self_peer = match layout.self_peer_file() {
        Some(path) => {
            write_peer(&layout.peers_dir(), peer)?;
            std::fs::write(&path, peer.to_json()?)?;
            Some(peer.clone())
        }
        None => None,
    };
    IdentityDump::new(self_peer, identity).write(&layout.identity_file())?;
    debug!(root = %layout.root().display(), "session stored");
    Ok(())
}

async fn availability_loop(inner: Weak<SessionInner>, period: Duration, mut stop: StopSignal) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                if !inner.poll().await {
                    break;
                }
            }
        }
    }
    debug!("availability loop stopped");
}

/// Marks a `start` call in flight; released on drop.
struct StartGuard<'a>(&'a AtomicBool);

impl<'a> StartGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(BootstrapError::AlreadyStarting);
        }
        Ok(Self(flag))
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_guard_rejects_concurrent_start() {
        let flag = AtomicBool::new(false);
        let guard = StartGuard::acquire(&flag).unwrap();
        assert!(matches!(
            StartGuard::acquire(&flag),
            Err(BootstrapError::AlreadyStarting)
        ));
        drop(guard);
        assert!(StartGuard::acquire(&flag).is_ok());
    }

    #[test]
    fn test_states_only_move_forward() {
        assert!(SessionState::Idle < SessionState::AwaitingPeer);
        assert!(SessionState::Exchanging < SessionState::Done);
        assert!(SessionState::Done < SessionState::Closed);
    }

    #[test]
    fn test_peer_status_rendering() {
        let status = |online| PeerStatus {
            address: Address::new("abc"),
            online,
        };
        assert_eq!(status(Some(true)).to_string(), "abc ONLINE");
        assert_eq!(status(Some(false)).to_string(), "abc OFFLINE");
        assert_eq!(status(None).to_string(), "abc ERROR");
    }
}
