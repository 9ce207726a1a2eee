//! On-disk layout of a bootstrapped directory.
//!
//! Trusted peers keep all bookkeeping under a hidden marker directory inside
//! the shared root. Untrusted peers use a visible layout directly in the root
//! and never hold a self descriptor.
//!
//! ```text
//! trusted                          untrusted
//! <root>/.treejoin/org/peers/      <root>/org/peers/
//! <root>/.treejoin/local/          <root>/local/
//! <root>/.treejoin/receiving/      <root>/receiving/
//! <root>/.treejoin/temp/
//! ```

use std::path::{Path, PathBuf};

/// Name of the hidden marker directory of a trusted root.
pub const DOT_DIR: &str = ".treejoin";

const ORG_DIR: &str = "org";
const PEERS_DIR: &str = "peers";
const LOCAL_DIR: &str = "local";
const RECEIVING_DIR: &str = "receiving";
const TEMP_DIR: &str = "temp";
const SELF_PEER_FILE: &str = "self.json";
const IDENTITY_FILE: &str = "transport.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
    trusted: bool,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>, trusted: bool) -> Self {
        Self {
            root: root.into(),
            trusted,
        }
    }

    pub fn trusted(root: impl Into<PathBuf>) -> Self {
        Self::new(root, true)
    }

    pub fn untrusted(root: impl Into<PathBuf>) -> Self {
        Self::new(root, false)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_trusted(&self) -> bool {
        self.trusted
    }

    /// Directory all bookkeeping lives in.
    pub fn base(&self) -> PathBuf {
        if self.trusted {
            self.root.join(DOT_DIR)
        } else {
            self.root.clone()
        }
    }

    /// Peer roster.
    pub fn peers_dir(&self) -> PathBuf {
        self.base().join(ORG_DIR).join(PEERS_DIR)
    }

    /// Private store of the local model and identity.
    pub fn local_dir(&self) -> PathBuf {
        self.base().join(LOCAL_DIR)
    }

    pub fn receiving_dir(&self) -> PathBuf {
        self.base().join(RECEIVING_DIR)
    }

    /// Staging area received objects are moved to before the model applies them.
    pub fn temp_dir(&self) -> PathBuf {
        self.base().join(TEMP_DIR)
    }

    /// Cached self descriptor. Only trusted roots have one.
    pub fn self_peer_file(&self) -> Option<PathBuf> {
        self.trusted
            .then(|| self.local_dir().join(SELF_PEER_FILE))
    }

    /// Persisted transport identity.
    pub fn identity_file(&self) -> PathBuf {
        self.local_dir().join(IDENTITY_FILE)
    }

    /// Every directory that makes up this layout.
    pub fn directories(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.peers_dir(), self.local_dir(), self.receiving_dir()];
        if self.trusted {
            dirs.push(self.temp_dir());
        }
        dirs
    }

    /// Whether the root carries the marker of a trusted tree.
    pub fn is_initialized(root: &Path) -> bool {
        root.join(DOT_DIR).is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trusted_paths_are_hidden() {
        let layout = Layout::trusted("/data/shared");
        assert_eq!(layout.peers_dir(), PathBuf::from("/data/shared/.treejoin/org/peers"));
        assert_eq!(layout.receiving_dir(), PathBuf::from("/data/shared/.treejoin/receiving"));
        assert_eq!(
            layout.self_peer_file(),
            Some(PathBuf::from("/data/shared/.treejoin/local/self.json"))
        );
        assert_eq!(layout.directories().len(), 4);
    }

    #[test]
    fn test_untrusted_paths_are_visible() {
        let layout = Layout::untrusted("/data/shared");
        assert_eq!(layout.peers_dir(), PathBuf::from("/data/shared/org/peers"));
        assert_eq!(layout.receiving_dir(), PathBuf::from("/data/shared/receiving"));
        assert_eq!(layout.self_peer_file(), None);
        assert!(!layout.directories().contains(&layout.temp_dir()));
    }
}
