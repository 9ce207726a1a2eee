//! Bootstrap protocol state machine.
//!
//! The machine is the transport's event sink. In trusted mode it asks the
//! correspondent for its tree snapshot, diffs it against a freshly built
//! local model, fetches every missing file and applies it. In untrusted mode
//! it only collects the peer descriptors the correspondent pushes.
//!
//! Events may arrive concurrently. Pending work lives in [`PendingSet`]s whose
//! locks are never held across an await, and completion is guarded by a
//! [`Latch`] so it fires at most once.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use treejoin_core::{
    Address, Layout, Message, ObjectId, ObjectInfo, PushMessage, StagedName, UpdateMessage,
};
use treejoin_store::{DirectoryRegistry, ModelFactory, ModelStore, StoreError};

use crate::error::{Result, SyncError};
use crate::pending::PendingSet;
use crate::signal::{Latch, StopSignal, TaskHandle};
use crate::transport::{ChannelEvents, FileAdmission, TransportChannel};

/// Callbacks from the machine to whoever drives the bootstrap.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// The correspondent answered; stop looking for one.
    fn on_answer(&self);

    /// Every outstanding object or push has been received and applied.
    async fn on_complete(&self);
}

/// Configuration of one state machine.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub layout: Layout,
    /// Identification of the local peer; handed to the model factory.
    pub self_id: ObjectId,
    /// How often outstanding object requests are re-sent.
    pub resend_interval: Duration,
    /// Roots that completed a trusted bootstrap are recorded here.
    pub registry: DirectoryRegistry,
}

impl MachineConfig {
    pub fn new(layout: Layout, self_id: ObjectId, registry: DirectoryRegistry) -> Self {
        Self {
            layout,
            self_id,
            resend_interval: Duration::from_secs(60),
            registry,
        }
    }

    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }
}

/// Reacts to transport events and tracks what is still outstanding.
pub struct ProtocolStateMachine {
    me: Weak<ProtocolStateMachine>,
    config: MachineConfig,
    factory: Arc<dyn ModelFactory>,
    transport: OnceLock<Weak<dyn TransportChannel>>,
    hooks: OnceLock<Weak<dyn SessionHooks>>,
    /// Set once the foreign snapshot has been diffed.
    model: AsyncMutex<Option<Arc<dyn ModelStore>>>,
    correspondent: Mutex<Option<Address>>,
    pending: PendingSet<ObjectId, UpdateMessage>,
    pushes: PendingSet<String, PushMessage>,
    finished: Latch,
    resend: TaskHandle,
}

impl ProtocolStateMachine {
    pub fn new(config: MachineConfig, factory: Arc<dyn ModelFactory>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            factory,
            transport: OnceLock::new(),
            hooks: OnceLock::new(),
            model: AsyncMutex::new(None),
            correspondent: Mutex::new(None),
            pending: PendingSet::new(),
            pushes: PendingSet::new(),
            finished: Latch::new(),
            resend: TaskHandle::new(),
        })
    }

    /// Wire the transport the machine sends through. Only the first call
    /// takes effect.
    pub fn attach_transport(&self, transport: &Arc<dyn TransportChannel>) {
        let _ = self.transport.set(Arc::downgrade(transport));
    }

    /// Wire the completion hooks. Only the first call takes effect.
    pub fn attach_hooks(&self, hooks: &Arc<dyn SessionHooks>) {
        let _ = self.hooks.set(Arc::downgrade(hooks));
    }

    pub fn layout(&self) -> &Layout {
        &self.config.layout
    }

    pub fn is_trusted(&self) -> bool {
        self.config.layout.is_trusted()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_fired()
    }

    /// Identifications of objects still being fetched.
    pub fn pending_objects(&self) -> Vec<ObjectId> {
        self.pending.keys()
    }

    /// Number of announced pushes not yet received.
    pub fn pending_pushes(&self) -> usize {
        self.pushes.len()
    }

    /// The model built from the foreign snapshot, once there is one.
    pub async fn model(&self) -> Option<Arc<dyn ModelStore>> {
        self.model.lock().await.clone()
    }

    pub fn correspondent(&self) -> Option<Address> {
        lock(&self.correspondent).clone()
    }

    /// Stop the resend loop.
    pub async fn shutdown(&self) {
        self.resend.shutdown().await;
    }

    fn transport(&self) -> Result<Arc<dyn TransportChannel>> {
        self.transport
            .get()
            .and_then(Weak::upgrade)
            .ok_or(SyncError::Closed)
    }

    fn hooks(&self) -> Option<Arc<dyn SessionHooks>> {
        self.hooks.get().and_then(Weak::upgrade)
    }

    fn set_correspondent(&self, address: &Address) {
        *lock(&self.correspondent) = Some(address.clone());
    }

    fn set_correspondent_if_unset(&self, address: &Address) {
        lock(&self.correspondent).get_or_insert_with(|| address.clone());
    }

    async fn send(&self, address: &Address, message: &Message) -> Result<()> {
        let text = message.to_json()?;
        self.transport()?.send(address, &text).await
    }

    fn staging_dir(&self) -> PathBuf {
        self.config.layout.receiving_dir()
    }

    async fn finish(&self) {
        if !self.finished.fire() {
            return;
        }
        if self.is_trusted() {
            let root = self.config.layout.root();
            match self.config.registry.register(root) {
                Ok(true) => debug!(root = %root.display(), "root registered"),
                Ok(false) => {}
                Err(e) => warn!(root = %root.display(), "failed to register root: {}", e),
            }
        }
        info!("bootstrap complete");
        if let Some(hooks) = self.hooks() {
            hooks.on_complete().await;
        }
    }

    /// Untrusted: a peer announced a descriptor it is about to push.
    fn record_push(&self, address: &Address, push: PushMessage) {
        let key = push_key(address, &push.identification);
        debug!(address = %address.short(), name = %push.name, "push announced");
        self.pushes.insert(key, push);
        if let Some(hooks) = self.hooks() {
            hooks.on_answer();
        }
    }

    /// Untrusted: a pushed descriptor arrived.
    async fn receive_push(&self, address: &Address, path: &Path, staged: StagedName) -> Result<()> {
        let key = push_key(address, &staged.identification);
        let Some(push) = self.pushes.claim(&key) else {
            discard(path).await;
            return Err(SyncError::UntrackedPush(staged.to_string()));
        };

        let name = &push.name;
        match self.move_to_roster(path, name).await {
            Ok(()) => debug!(name = %name, "peer descriptor received"),
            Err(e) => error!(name = %name, "failed to store peer descriptor: {}", e),
        }

        if self.pushes.release(&key) {
            self.finish().await;
        }
        Ok(())
    }

    async fn move_to_roster(&self, path: &Path, name: &str) -> Result<()> {
        let peers = self.config.layout.peers_dir();
        tokio::fs::create_dir_all(&peers).await?;
        tokio::fs::rename(path, peers.join(bare_name(name))).await?;
        Ok(())
    }

    /// Trusted: the foreign snapshot arrived. Diff it and request what is
    /// missing.
    async fn receive_model(
        &self,
        address: &Address,
        path: &Path,
        slot: &mut Option<Arc<dyn ModelStore>>,
    ) -> Result<()> {
        if let Some(hooks) = self.hooks() {
            hooks.on_answer();
        }
        // Objects are fetched from whoever sent the snapshot.
        self.set_correspondent(address);

        let data = tokio::fs::read(path).await?;
        discard(path).await;
        let foreign = ObjectInfo::from_json(&data)?;

        let layout = &self.config.layout;
        let model = self
            .factory
            .create(layout.root(), &self.config.self_id, &layout.local_dir())
            .await?;
        model.update().await?;
        let updates = model.bootstrap(&foreign).await?;
        *slot = Some(Arc::clone(&model));

        let mut fetches = Vec::new();
        for update in updates {
            if update.needs_content() {
                fetches.push(update);
                continue;
            }
            if update.object.directory {
                let dir = update.object.local_path(model.root_path());
                tokio::fs::create_dir_all(&dir).await?;
            }
            match model.apply_update_message(&update).await {
                Ok(()) => {}
                Err(e) if e.is_conflict() => {
                    debug!(path = %update.object.path, "conflict applying update")
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            address = %address.short(),
            fetches = fetches.len(),
            "snapshot diffed"
        );

        if fetches.is_empty() {
            self.finish().await;
            return Ok(());
        }

        // Record everything before the first request goes out so an early
        // answer can not empty the set.
        let ids: Vec<ObjectId> = fetches
            .iter()
            .map(|update| update.object.identification.clone())
            .collect();
        for update in fetches {
            self.pending.insert(update.object.identification.clone(), update);
        }
        for id in ids {
            if let Err(e) = self.send(address, &Message::object_request(id.clone())).await {
                warn!(address = %address.short(), object = %id, "object request failed: {}", e);
            }
        }

        self.start_resend_loop();
        Ok(())
    }

    /// Trusted: the content of one requested object arrived.
    async fn receive_object(
        &self,
        model: Arc<dyn ModelStore>,
        path: &Path,
        staged: StagedName,
    ) -> Result<()> {
        let id = &staged.identification;
        let Some(update) = self.pending.claim(id) else {
            debug!(object = %id, "discarding stray file");
            discard(path).await;
            return Ok(());
        };

        let path_in_tree = &update.object.path;
        match self.apply_object(&model, path, &update).await {
            Ok(()) => debug!(path = %path_in_tree, "object applied"),
            Err(e) if e.is_conflict() => debug!(path = %path_in_tree, "conflict applying object"),
            Err(e) => error!(path = %path_in_tree, "failed to apply object: {}", e),
        }

        if self.pending.release(id) {
            self.finish().await;
        }
        Ok(())
    }

    async fn apply_object(
        &self,
        model: &Arc<dyn ModelStore>,
        path: &Path,
        update: &UpdateMessage,
    ) -> std::result::Result<(), StoreError> {
        let staging = model.staging_path(&update.object.identification);
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(path, &staging).await?;
        model.apply_update_message(update).await
    }

    fn start_resend_loop(&self) {
        let me = self.me.clone();
        let period = self.config.resend_interval;
        self.resend.spawn(move |stop| resend_loop(me, period, stop));
    }

    async fn resend_outstanding(&self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let Some(address) = self.correspondent() else {
            return true;
        };
        let outstanding = self.pending.keys();
        debug!(address = %address.short(), count = outstanding.len(), "re-sending object requests");
        for id in outstanding {
            if let Err(e) = self.send(&address, &Message::object_request(id)).await {
                warn!(address = %address.short(), "resend failed: {}", e);
            }
        }
        true
    }

    async fn handle_file(&self, address: &Address, path: &Path, name: &str) -> Result<()> {
        let staged = match StagedName::parse(name) {
            Ok(staged) => staged,
            Err(e) => {
                discard(path).await;
                return Err(e.into());
            }
        };
        if &staged.sender != address {
            warn!(
                address = %address.short(),
                name,
                "staged name does not match sender, dropping"
            );
            discard(path).await;
            return Ok(());
        }

        if !self.is_trusted() {
            return self.receive_push(address, path, staged).await;
        }

        let mut slot = self.model.lock().await;
        if let Some(model) = slot.clone() {
            drop(slot);
            return self.receive_object(model, path, staged).await;
        }

        if !staged.identification.is_model() {
            warn!(object = %staged.identification, "file arrived before the snapshot, dropping");
            discard(path).await;
            return Ok(());
        }
        self.receive_model(address, path, &mut slot).await
    }
}

async fn resend_loop(me: Weak<ProtocolStateMachine>, period: Duration, mut stop: StopSignal) {
    let mut ticker = tokio::time::interval(period);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let Some(machine) = me.upgrade() else { break };
                if !machine.resend_outstanding().await {
                    debug!("nothing outstanding, resend loop done");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ChannelEvents for ProtocolStateMachine {
    async fn on_connection_request(&self, address: &Address, _message: &str) {
        info!(address = %address.short(), "ignoring connection request while bootstrapping");
    }

    async fn on_message(&self, address: &Address, message: &str) {
        if self.is_trusted() {
            debug!(address = %address.short(), "dropping message");
            return;
        }
        match Message::decode(message) {
            Ok(Message::Push(push)) => self.record_push(address, push),
            Ok(Message::Lock(_)) => {}
            Ok(other) => debug!(address = %address.short(), "unexpected message: {:?}", other),
            Err(e) => warn!(address = %address.short(), "undecodable message: {}", e),
        }
    }

    fn on_allow_file(&self, address: &Address, name: &str) -> FileAdmission {
        if !is_plain_name(name) {
            warn!(address = %address.short(), name, "rejecting file with unusable name");
            return FileAdmission::Reject;
        }
        let staged = StagedName::new(address.clone(), ObjectId::new(name));
        FileAdmission::Accept(self.staging_dir().join(staged.to_string()))
    }

    async fn on_file_received(&self, address: &Address, path: &Path, name: &str) {
        if let Err(e) = self.handle_file(address, path, name).await {
            error!(address = %address.short(), name, "failed to handle file: {}", e);
        }
    }

    async fn on_file_canceled(&self, address: &Address, path: &Path) {
        info!(address = %address.short(), path = %path.display(), "file transfer canceled");
        if self.is_trusted() {
            return;
        }
        let staged = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| StagedName::parse(name).ok());
        if let Some(staged) = staged {
            if self
                .pushes
                .remove(&push_key(address, &staged.identification))
                .is_some()
            {
                debug!(object = %staged.identification, "dropped canceled push");
            }
        }
    }

    async fn on_connected(&self, address: &Address) {
        info!(address = %address.short(), "connected");
        self.set_correspondent_if_unset(address);
    }
}

/// Delete a staged file. Failing to do so is logged, never fatal.
async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), "failed to remove staged file: {}", e);
    }
}

fn push_key(address: &Address, identification: &ObjectId) -> String {
    format!("{}:{}", address, identification)
}

/// Last path component of a pushed name.
fn bare_name(name: &str) -> &str {
    name.rsplit(['/', '\\'])
        .find(|part| !part.is_empty() && *part != "." && *part != "..")
        .unwrap_or("peer.json")
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
