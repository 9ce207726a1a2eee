//! Transport abstraction for the bootstrap protocol.
//!
//! The transport handles identities, friend requests, text messages and file
//! pushes. It calls back into a [`ChannelEvents`] sink, possibly from many
//! tasks at once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use treejoin_core::Address;

use crate::error::Result;

/// Answer to a sender's request to push a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAdmission {
    /// Accept and write the file to this path.
    Accept(PathBuf),
    Reject,
}

/// Outgoing side of a transport.
///
/// Implementations must be thread-safe (Send + Sync). Sends are fire and
/// forget: an `Ok` only means the message was handed to the transport.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    /// This node's own connectable address.
    fn address(&self) -> Result<Address>;

    /// Ask `address` to accept this node, attaching `message`.
    async fn request_connection(&self, address: &Address, message: &str) -> Result<()>;

    /// Friends that are currently online, in the transport's enumeration order.
    async fn online_addresses(&self) -> Result<Vec<Address>>;

    /// All known friends.
    async fn friend_addresses(&self) -> Result<Vec<Address>>;

    /// Whether a known friend is online.
    async fn is_online(&self, address: &Address) -> Result<bool>;

    /// Send a text message.
    async fn send(&self, address: &Address, message: &str) -> Result<()>;

    /// Exportable identity blob, enough to reconnect under the same address.
    fn identity(&self) -> Bytes;

    /// Release the transport. No events are delivered afterwards.
    async fn close(&self);
}

/// Callbacks a transport delivers.
#[async_trait]
pub trait ChannelEvents: Send + Sync {
    /// Someone asked to become a friend.
    async fn on_connection_request(&self, address: &Address, message: &str);

    /// A text message arrived.
    async fn on_message(&self, address: &Address, message: &str);

    /// A sender proposes to push a file called `name`.
    fn on_allow_file(&self, address: &Address, name: &str) -> FileAdmission;

    /// A pushed file was written completely to `path`; `name` is its file name.
    async fn on_file_received(&self, address: &Address, path: &Path, name: &str);

    /// A push was abandoned by the sender.
    async fn on_file_canceled(&self, address: &Address, path: &Path);

    /// A friend came online.
    async fn on_connected(&self, address: &Address);
}

/// Opens transports.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Open a channel for `name`, reusing `identity` when given.
    async fn connect(
        &self,
        name: &str,
        identity: Option<Bytes>,
        events: Arc<dyn ChannelEvents>,
    ) -> Result<Arc<dyn TransportChannel>>;
}

/// A simple in-memory transport for testing.
///
/// Every event is delivered on its own task, like a real transport's worker
/// pool. Sends can be dropped on purpose to simulate loss.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

    use tokio::sync::RwLock;

    use crate::error::SyncError;

    /// A message handed to [`TransportChannel::send`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentMessage {
        pub to: Address,
        pub message: String,
        /// False if the message was dropped on purpose.
        pub delivered: bool,
    }

    struct Node {
        address: Address,
        name: String,
        identity: Bytes,
        events: Arc<dyn ChannelEvents>,
        /// Friends in the order they were added.
        friends: Mutex<Vec<Address>>,
        online: AtomicBool,
        closed: AtomicBool,
        drop_sends: AtomicUsize,
        sent: Mutex<Vec<SentMessage>>,
    }

    impl Node {
        fn add_friend(&self, address: &Address) {
            let mut friends = lock(&self.friends);
            if !friends.contains(address) {
                friends.push(address.clone());
            }
        }

        fn friends(&self) -> Vec<Address> {
            lock(&self.friends).clone()
        }

        fn is_up(&self) -> bool {
            self.online.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
        }
    }

    /// Shared state for the memory transport network.
    pub struct MemoryNetwork {
        me: Weak<MemoryNetwork>,
        nodes: RwLock<HashMap<Address, Arc<Node>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new_cyclic(|me| Self {
                me: me.clone(),
                nodes: RwLock::new(HashMap::new()),
            })
        }

        /// Create a channel connected to this network.
        ///
        /// The address is derived from the identity, so reconnecting with an
        /// exported identity yields the same address.
        pub async fn create_channel(
            self: &Arc<Self>,
            name: &str,
            identity: Option<Bytes>,
            events: Arc<dyn ChannelEvents>,
        ) -> Arc<MemoryChannel> {
            let identity = identity.unwrap_or_else(|| {
                use rand::Rng;
                let bytes: [u8; 32] = rand::thread_rng().gen();
                Bytes::copy_from_slice(&bytes)
            });
            let address = Address::new(blake3::hash(&identity).to_hex().to_string());

            let node = Arc::new(Node {
                address: address.clone(),
                name: name.to_string(),
                identity,
                events,
                friends: Mutex::new(Vec::new()),
                online: AtomicBool::new(true),
                closed: AtomicBool::new(false),
                drop_sends: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
            });
            self.nodes.write().await.insert(address, Arc::clone(&node));

            Arc::new(MemoryChannel {
                node,
                network: Arc::clone(self),
            })
        }

        /// Look up a channel by address.
        pub async fn channel(self: &Arc<Self>, address: &Address) -> Option<Arc<MemoryChannel>> {
            let node = self.nodes.read().await.get(address).cloned()?;
            Some(Arc::new(MemoryChannel {
                node,
                network: Arc::clone(self),
            }))
        }

        async fn node(&self, address: &Address) -> Option<Arc<Node>> {
            self.nodes.read().await.get(address).cloned()
        }
    }

    #[async_trait]
    impl TransportConnector for MemoryNetwork {
        async fn connect(
            &self,
            name: &str,
            identity: Option<Bytes>,
            events: Arc<dyn ChannelEvents>,
        ) -> Result<Arc<dyn TransportChannel>> {
            let network = self
                .me
                .upgrade()
                .ok_or_else(|| SyncError::TransportError("network dropped".into()))?;
            let channel: Arc<dyn TransportChannel> =
                network.create_channel(name, identity, events).await;
            Ok(channel)
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryChannel {
        node: Arc<Node>,
        network: Arc<MemoryNetwork>,
    }

    impl MemoryChannel {
        pub fn name(&self) -> &str {
            &self.node.name
        }

        /// Accept a friend request from `address`; both sides see each
        /// other come online.
        pub async fn accept_connection(&self, address: &Address) -> Result<()> {
            let other = self
                .network
                .node(address)
                .await
                .ok_or_else(|| SyncError::PeerNotFound(address.to_string()))?;
            self.node.add_friend(address);
            other.add_friend(&self.node.address);

            if other.is_up() && self.node.is_up() {
                deliver_connected(&self.node, &other.address);
                deliver_connected(&other, &self.node.address);
            }
            Ok(())
        }

        /// Toggle whether this node appears online to its friends.
        pub fn set_online(&self, online: bool) {
            self.node.online.store(online, Ordering::SeqCst);
        }

        /// Silently drop the next `count` outgoing messages.
        pub fn drop_next_sends(&self, count: usize) {
            self.node.drop_sends.store(count, Ordering::SeqCst);
        }

        /// Every message handed to `send`, in order.
        pub fn sent(&self) -> Vec<SentMessage> {
            lock(&self.node.sent).clone()
        }

        /// Messages handed to `send` for `address`.
        pub fn sent_to(&self, address: &Address) -> Vec<SentMessage> {
            self.sent()
                .into_iter()
                .filter(|m| &m.to == address)
                .collect()
        }

        /// Push a file to `to`, proposing `name`.
        ///
        /// Returns the path the receiver admitted the file to.
        pub async fn send_file(&self, to: &Address, name: &str, data: &[u8]) -> Result<PathBuf> {
            let target = self.reachable(to).await?;
            let path = match target.events.on_allow_file(&self.node.address, name) {
                FileAdmission::Accept(path) => path,
                FileAdmission::Reject => {
                    return Err(SyncError::TransportError(format!("file {} rejected", name)))
                }
            };

            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
            tokio::fs::create_dir_all(&parent).await?;
            // Land the file in one step so a reader never sees it half written.
            let partial = parent.join(format!(".{}.part", file_name));
            tokio::fs::write(&partial, data).await?;
            tokio::fs::rename(&partial, &path).await?;

            let from = self.node.address.clone();
            let events = Arc::clone(&target.events);
            let received = path.clone();
            tokio::spawn(async move {
                events.on_file_received(&from, &received, &file_name).await;
            });
            Ok(path)
        }

        /// Abandon a push of `name` to `to`.
        pub async fn cancel_file(&self, to: &Address, name: &str) -> Result<()> {
            let target = self.reachable(to).await?;
            let path = match target.events.on_allow_file(&self.node.address, name) {
                FileAdmission::Accept(path) => path,
                FileAdmission::Reject => return Ok(()),
            };
            let from = self.node.address.clone();
            let events = Arc::clone(&target.events);
            tokio::spawn(async move {
                events.on_file_canceled(&from, &path).await;
            });
            Ok(())
        }

        async fn reachable(&self, to: &Address) -> Result<Arc<Node>> {
            if self.node.closed.load(Ordering::SeqCst) {
                return Err(SyncError::Closed);
            }
            let target = self
                .network
                .node(to)
                .await
                .ok_or_else(|| SyncError::PeerNotFound(to.to_string()))?;
            if !target.is_up() {
                return Err(SyncError::TransportError(format!("{} is offline", to.short())));
            }
            Ok(target)
        }
    }

    #[async_trait]
    impl TransportChannel for MemoryChannel {
        fn address(&self) -> Result<Address> {
            Ok(self.node.address.clone())
        }

        async fn request_connection(&self, address: &Address, message: &str) -> Result<()> {
            let target = self.reachable(address).await?;
            self.node.add_friend(address);

            let from = self.node.address.clone();
            let message = message.to_string();
            let events = Arc::clone(&target.events);
            tokio::spawn(async move {
                events.on_connection_request(&from, &message).await;
            });
            Ok(())
        }

        async fn online_addresses(&self) -> Result<Vec<Address>> {
            if self.node.closed.load(Ordering::SeqCst) {
                return Err(SyncError::Closed);
            }
            let nodes = self.network.nodes.read().await;
            Ok(self
                .node
                .friends()
                .into_iter()
                .filter(|friend| {
                    nodes.get(friend).map(|n| n.is_up()).unwrap_or(false)
                        && nodes
                            .get(friend)
                            .map(|n| n.friends().contains(&self.node.address))
                            .unwrap_or(false)
                })
                .collect())
        }

        async fn friend_addresses(&self) -> Result<Vec<Address>> {
            Ok(self.node.friends())
        }

        async fn is_online(&self, address: &Address) -> Result<bool> {
            if !self.node.friends().contains(address) {
                return Err(SyncError::PeerNotFound(address.to_string()));
            }
            Ok(self
                .network
                .node(address)
                .await
                .map(|n| n.is_up())
                .unwrap_or(false))
        }

        async fn send(&self, address: &Address, message: &str) -> Result<()> {
            if self.node.closed.load(Ordering::SeqCst) {
                return Err(SyncError::Closed);
            }

            let dropped = self
                .node
                .drop_sends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            lock(&self.node.sent).push(SentMessage {
                to: address.clone(),
                message: message.to_string(),
                delivered: !dropped,
            });
            if dropped {
                return Ok(());
            }

            let target = self.reachable(address).await?;
            let from = self.node.address.clone();
            let message = message.to_string();
            let events = Arc::clone(&target.events);
            tokio::spawn(async move {
                events.on_message(&from, &message).await;
            });
            Ok(())
        }

        fn identity(&self) -> Bytes {
            self.node.identity.clone()
        }

        async fn close(&self) {
            if self.node.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            self.network.nodes.write().await.remove(&self.node.address);
        }
    }

    fn deliver_connected(node: &Arc<Node>, address: &Address) {
        let events = Arc::clone(&node.events);
        let address = address.clone();
        tokio::spawn(async move {
            events.on_connected(&address).await;
        });
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryNetwork;
    use super::*;
    use std::sync::Mutex;

    /// Records every event it sees.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        inbox: PathBuf,
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelEvents for Recorder {
        async fn on_connection_request(&self, address: &Address, message: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("request {} {}", address.short(), message));
        }

        async fn on_message(&self, _address: &Address, message: &str) {
            self.events.lock().unwrap().push(format!("message {}", message));
        }

        fn on_allow_file(&self, _address: &Address, name: &str) -> FileAdmission {
            FileAdmission::Accept(self.inbox.join(name))
        }

        async fn on_file_received(&self, _address: &Address, _path: &Path, name: &str) {
            self.events.lock().unwrap().push(format!("file {}", name));
        }

        async fn on_file_canceled(&self, _address: &Address, _path: &Path) {
            self.events.lock().unwrap().push("canceled".into());
        }

        async fn on_connected(&self, address: &Address) {
            self.events
                .lock()
                .unwrap()
                .push(format!("connected {}", address.short()));
        }
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_friend_request_and_messages() {
        let network = MemoryNetwork::new();
        let a_events = Arc::new(Recorder::default());
        let b_events = Arc::new(Recorder::default());
        let a = network.create_channel("a", None, a_events.clone()).await;
        let b = network.create_channel("b", None, b_events.clone()).await;
        let a_addr = a.address().unwrap();
        let b_addr = b.address().unwrap();

        a.request_connection(&b_addr, "hi").await.unwrap();
        settle().await;
        assert_eq!(b_events.seen(), vec![format!("request {} hi", a_addr.short())]);
        assert!(a.online_addresses().await.unwrap().is_empty());

        b.accept_connection(&a_addr).await.unwrap();
        settle().await;
        assert_eq!(a.online_addresses().await.unwrap(), vec![b_addr.clone()]);
        assert!(a_events.seen().contains(&format!("connected {}", b_addr.short())));

        a.send(&b_addr, "ping").await.unwrap();
        settle().await;
        assert!(b_events.seen().contains(&"message ping".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_sends_are_logged_but_not_delivered() {
        let network = MemoryNetwork::new();
        let b_events = Arc::new(Recorder::default());
        let a = network.create_channel("a", None, Arc::new(Recorder::default())).await;
        let b = network.create_channel("b", None, b_events.clone()).await;
        let b_addr = b.address().unwrap();

        a.drop_next_sends(1);
        a.send(&b_addr, "lost").await.unwrap();
        a.send(&b_addr, "kept").await.unwrap();
        settle().await;

        let sent = a.sent_to(&b_addr);
        assert_eq!(sent.len(), 2);
        assert!(!sent[0].delivered);
        assert!(sent[1].delivered);
        assert_eq!(b_events.seen(), vec!["message kept".to_string()]);
    }

    #[tokio::test]
    async fn test_file_push_lands_at_admitted_path() {
        let dir = tempfile::tempdir().unwrap();
        let network = MemoryNetwork::new();
        let b_events = Arc::new(Recorder {
            inbox: dir.path().to_path_buf(),
            ..Default::default()
        });
        let a = network.create_channel("a", None, Arc::new(Recorder::default())).await;
        let b = network.create_channel("b", None, b_events.clone()).await;

        let path = a.send_file(&b.address().unwrap(), "obj1", b"data").await.unwrap();
        settle().await;

        assert_eq!(std::fs::read(&path).unwrap(), b"data");
        assert_eq!(b_events.seen(), vec!["file obj1".to_string()]);
    }

    #[tokio::test]
    async fn test_identity_reuse_keeps_address_and_close_unregisters() {
        let network = MemoryNetwork::new();
        let a = network.create_channel("a", None, Arc::new(Recorder::default())).await;
        let addr = a.address().unwrap();
        let identity = a.identity();

        a.close().await;
        a.close().await;
        assert!(network.channel(&addr).await.is_none());
        assert!(matches!(a.send(&addr, "x").await, Err(crate::SyncError::Closed)));

        let again = network
            .create_channel("a", Some(identity), Arc::new(Recorder::default()))
            .await;
        assert_eq!(again.address().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_is_online_unknown_friend_errors() {
        let network = MemoryNetwork::new();
        let a = network.create_channel("a", None, Arc::new(Recorder::default())).await;
        assert!(a.is_online(&Address::new("nobody")).await.is_err());
    }
}
