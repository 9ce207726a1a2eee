//! Test fixtures and helpers.
//!
//! [`SnapshotBuilder`] describes a remote tree and [`RemotePeer`] plays the
//! member a joining node talks to, answering requests over a memory network.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;

use treejoin_core::{Address, Message, ObjectId, ObjectInfo, Peer, RequestKind};
use treejoin_sync::{ChannelEvents, FileAdmission, MemoryChannel, MemoryNetwork, TransportChannel};

/// A remote tree together with the content of its files.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tree: ObjectInfo,
    pub contents: HashMap<ObjectId, Vec<u8>>,
}

impl Snapshot {
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec(&self.tree).unwrap_or_default()
    }

    pub fn file_count(&self) -> usize {
        self.tree.descendants().iter().filter(|o| !o.directory).count()
    }

    pub fn directory_count(&self) -> usize {
        self.tree.descendants().iter().filter(|o| o.directory).count()
    }

    /// Identifications of every file, in snapshot order.
    pub fn file_ids(&self) -> Vec<ObjectId> {
        self.tree
            .descendants()
            .iter()
            .filter(|o| !o.directory)
            .map(|o| o.identification.clone())
            .collect()
    }

    /// Check that every file of the snapshot exists below `root` with the
    /// expected content.
    pub fn matches_disk(&self, root: &Path) -> bool {
        self.tree.descendants().iter().all(|object| {
            let path = object.local_path(root);
            if object.directory {
                path.is_dir()
            } else {
                std::fs::read(&path).ok().as_ref() == self.contents.get(&object.identification)
            }
        })
    }
}

/// Builds a [`Snapshot`]. Parent directories are added on demand.
#[derive(Debug)]
pub struct SnapshotBuilder {
    tree: ObjectInfo,
    contents: HashMap<ObjectId, Vec<u8>>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            tree: ObjectInfo::directory(ObjectId::new("root"), ""),
            contents: HashMap::new(),
        }
    }

    /// Add a directory whose identification is derived from its path.
    pub fn dir(self, path: &str) -> Self {
        self.dir_with_id(derived_id(path), path)
    }

    pub fn dir_with_id(mut self, id: impl Into<ObjectId>, path: &str) -> Self {
        if find_mut(&mut self.tree, path).is_none() {
            self = self.ensure_parent(path);
            self.attach(ObjectInfo::directory(id.into(), path));
        }
        self
    }

    /// Add a file whose identification is derived from its path.
    pub fn file(self, path: &str, content: &[u8]) -> Self {
        self.file_with_id(derived_id(path), path, content)
    }

    pub fn file_with_id(mut self, id: impl Into<ObjectId>, path: &str, content: &[u8]) -> Self {
        let id = id.into();
        self = self.ensure_parent(path);
        let hash = blake3::hash(content).to_hex().to_string();
        self.attach(ObjectInfo::file(id.clone(), path, hash));
        self.contents.insert(id, content.to_vec());
        self
    }

    pub fn build(self) -> Snapshot {
        Snapshot {
            tree: self.tree,
            contents: self.contents,
        }
    }

    fn ensure_parent(self, path: &str) -> Self {
        match path.rsplit_once('/') {
            Some((parent, _)) if !parent.is_empty() => self.dir(parent),
            _ => self,
        }
    }

    fn attach(&mut self, object: ObjectInfo) {
        let parent = object
            .path
            .rsplit_once('/')
            .map(|(parent, _)| parent.to_string())
            .unwrap_or_default();
        if let Some(node) = find_mut(&mut self.tree, &parent) {
            node.objects.push(object);
        }
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn derived_id(path: &str) -> ObjectId {
    ObjectId::new(blake3::hash(path.as_bytes()).to_hex().to_string())
}

fn find_mut<'a>(node: &'a mut ObjectInfo, path: &str) -> Option<&'a mut ObjectInfo> {
    if node.path == path {
        return Some(node);
    }
    node.objects
        .iter_mut()
        .filter(|child| child.directory)
        .find_map(|child| find_mut(child, path))
}

/// A member of the network that answers a joining node.
///
/// It accepts every connection request. With a snapshot it answers model and
/// object requests; with a roster it pushes every peer descriptor right after
/// accepting.
pub struct RemotePeer {
    channel: Arc<MemoryChannel>,
    responder: Arc<Responder>,
}

struct Responder {
    network: Weak<MemoryNetwork>,
    address: OnceLock<Address>,
    snapshot: Option<Snapshot>,
    roster: Vec<Peer>,
    ignore_objects: AtomicUsize,
    model_requests: AtomicUsize,
    object_requests: Mutex<Vec<ObjectId>>,
    joined: Mutex<Vec<Peer>>,
}

impl RemotePeer {
    /// A trusted member serving `snapshot`.
    pub async fn serving(network: &Arc<MemoryNetwork>, snapshot: Snapshot) -> Self {
        Self::spawn(network, Some(snapshot), Vec::new()).await
    }

    /// A member that pushes `roster` to whoever joins.
    pub async fn pushing(network: &Arc<MemoryNetwork>, roster: Vec<Peer>) -> Self {
        Self::spawn(network, None, roster).await
    }

    async fn spawn(
        network: &Arc<MemoryNetwork>,
        snapshot: Option<Snapshot>,
        roster: Vec<Peer>,
    ) -> Self {
        let responder = Arc::new(Responder::new(network, snapshot, roster));
        let channel = network
            .create_channel("remote", None, responder.clone())
            .await;
        if let Ok(address) = channel.address() {
            let _ = responder.address.set(address);
        }
        Self { channel, responder }
    }

    pub fn address(&self) -> Address {
        self.responder.address.get().cloned().unwrap_or_else(|| Address::new(""))
    }

    pub fn channel(&self) -> &Arc<MemoryChannel> {
        &self.channel
    }

    /// Leave the next `count` object requests unanswered.
    pub fn ignore_object_requests(&self, count: usize) {
        self.responder.ignore_objects.store(count, Ordering::SeqCst);
    }

    pub fn model_requests(&self) -> usize {
        self.responder.model_requests.load(Ordering::SeqCst)
    }

    /// Every object request received, in arrival order.
    pub fn object_requests(&self) -> Vec<ObjectId> {
        lock(&self.responder.object_requests).clone()
    }

    /// Descriptors that arrived with connection requests.
    pub fn joined(&self) -> Vec<Peer> {
        lock(&self.responder.joined).clone()
    }
}

impl Responder {
    fn new(network: &Arc<MemoryNetwork>, snapshot: Option<Snapshot>, roster: Vec<Peer>) -> Self {
        Self {
            network: Arc::downgrade(network),
            address: OnceLock::new(),
            snapshot,
            roster,
            ignore_objects: AtomicUsize::new(0),
            model_requests: AtomicUsize::new(0),
            object_requests: Mutex::new(Vec::new()),
            joined: Mutex::new(Vec::new()),
        }
    }

    async fn channel(&self) -> Option<Arc<MemoryChannel>> {
        let network = self.network.upgrade()?;
        network.channel(self.address.get()?).await
    }

    async fn push_roster(&self, channel: &MemoryChannel, to: &Address) {
        for peer in &self.roster {
            let push = Message::push(peer.identification.clone(), peer.roster_file_name());
            if let Ok(text) = push.to_json() {
                let _ = channel.send(to, &text).await;
            }
        }
        // Announcements are delivered on their own tasks; let them land first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        for peer in &self.roster {
            if let Ok(json) = peer.to_json() {
                let _ = channel
                    .send_file(to, peer.identification.as_str(), json.as_bytes())
                    .await;
            }
        }
    }
}

#[async_trait]
impl ChannelEvents for Responder {
    async fn on_connection_request(&self, address: &Address, message: &str) {
        if let Ok(peer) = Peer::from_json(message.as_bytes()) {
            lock(&self.joined).push(peer);
        }
        let Some(channel) = self.channel().await else { return };
        if channel.accept_connection(address).await.is_err() {
            return;
        }
        if !self.roster.is_empty() {
            self.push_roster(&channel, address).await;
        }
    }

    async fn on_message(&self, address: &Address, message: &str) {
        let Ok(Message::Request(request)) = Message::decode(message) else {
            return;
        };
        let Some(channel) = self.channel().await else { return };
        let Some(snapshot) = &self.snapshot else { return };

        match request.request {
            RequestKind::Model => {
                self.model_requests.fetch_add(1, Ordering::SeqCst);
                let _ = channel
                    .send_file(address, request.identification.as_str(), &snapshot.to_json())
                    .await;
            }
            RequestKind::Object => {
                lock(&self.object_requests).push(request.identification.clone());
                let skip = self
                    .ignore_objects
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if skip {
                    return;
                }
                if let Some(content) = snapshot.contents.get(&request.identification) {
                    let _ = channel
                        .send_file(address, request.identification.as_str(), content)
                        .await;
                }
            }
        }
    }

    fn on_allow_file(&self, _address: &Address, _name: &str) -> FileAdmission {
        FileAdmission::Reject
    }

    async fn on_file_received(&self, _address: &Address, _path: &Path, _name: &str) {}

    async fn on_file_canceled(&self, _address: &Address, _path: &Path) {}

    async fn on_connected(&self, _address: &Address) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_nests_and_adds_parents() {
        let snapshot = SnapshotBuilder::new()
            .file_with_id("obj1", "docs/a.txt", b"one")
            .file_with_id("obj2", "docs/b.txt", b"two")
            .dir("empty")
            .build();

        assert_eq!(snapshot.file_count(), 2);
        assert_eq!(snapshot.directory_count(), 2);
        assert_eq!(snapshot.tree.objects[0].path, "docs");
        assert_eq!(snapshot.tree.objects[0].objects.len(), 2);
        assert_eq!(snapshot.file_ids(), vec![ObjectId::new("obj1"), ObjectId::new("obj2")]);
        assert_eq!(
            snapshot.tree.objects[0].objects[0].content,
            blake3::hash(b"one").to_hex().to_string()
        );
    }

    #[tokio::test]
    async fn test_remote_answers_model_request() {
        let network = MemoryNetwork::new();
        let snapshot = SnapshotBuilder::new().file("a.txt", b"a").build();
        let remote = RemotePeer::serving(&network, snapshot).await;

        let model = Message::model_request().to_json().unwrap();
        let idle = Arc::new(Responder::new(&network, None, Vec::new()));
        let joiner = network.create_channel("joiner", None, idle).await;
        joiner.send(&remote.address(), &model).await.unwrap();

        assert!(eventually(Duration::from_secs(1), || remote.model_requests() == 1).await);
    }
}
