//! On-disk persistence of a bootstrapping root.
//!
//! Everything here is small and synchronous: directory structure, peer
//! descriptors, the transport identity dump and the registry of roots that
//! finished bootstrapping.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use treejoin_core::{Layout, Peer};

use crate::error::{Result, StoreError};

/// Create every directory of `layout`. Existing directories are kept.
pub fn make_layout(layout: &Layout) -> Result<()> {
    for dir in layout.directories() {
        fs::create_dir_all(&dir)?;
    }
    Ok(())
}

/// Write `peer` into the roster directory `dir`.
pub fn write_peer(dir: &Path, peer: &Peer) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(peer.roster_file_name());
    fs::write(&path, peer.to_json()?)?;
    Ok(path)
}

/// Read a peer descriptor.
pub fn read_peer(path: &Path) -> Result<Peer> {
    let data = fs::read(path)?;
    Ok(Peer::from_json(&data)?)
}

/// Number of regular files directly inside `dir`.
pub fn count_files(dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in fs::read_dir(dir)? {
        if entry?.file_type()?.is_file() {
            count += 1;
        }
    }
    Ok(count)
}

/// Persisted transport identity, plus the self descriptor for trusted roots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDump {
    pub self_peer: Option<Peer>,
    /// Hex encoded identity blob exported by the transport.
    pub identity: String,
}

impl IdentityDump {
    pub fn new(self_peer: Option<Peer>, identity: &[u8]) -> Self {
        Self {
            self_peer,
            identity: hex::encode(identity),
        }
    }

    pub fn identity_bytes(&self) -> Result<Bytes> {
        hex::decode(&self.identity)
            .map(Bytes::from)
            .map_err(|e| StoreError::InvalidData(format!("identity: {}", e)))
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Append-only list of roots that completed a bootstrap, one path per line.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    path: PathBuf,
}

impl DirectoryRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registered roots, in registration order. A missing registry is empty.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(PathBuf::from)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Add `root` unless it is already listed.
    ///
    /// Returns whether a line was appended.
    pub fn register(&self, root: &Path) -> Result<bool> {
        if self.list()?.iter().any(|known| known == root) {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", root.display())?;
        tracing::debug!(root = %root.display(), registry = %self.path.display(), "registered root");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treejoin_core::Address;

    #[test]
    fn test_make_layout_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::trusted(dir.path());
        make_layout(&layout).unwrap();
        for d in layout.directories() {
            assert!(d.is_dir(), "{} missing", d.display());
        }
        assert!(Layout::is_initialized(dir.path()));
        make_layout(&layout).unwrap();
    }

    #[test]
    fn test_untrusted_layout_has_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        make_layout(&Layout::untrusted(dir.path())).unwrap();
        assert!(!Layout::is_initialized(dir.path()));
        assert!(dir.path().join("org/peers").is_dir());
    }

    #[test]
    fn test_peer_files_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let peer = Peer::create("laptop", Address::new("aa11"), true);
        let path = write_peer(dir.path(), &peer).unwrap();
        assert_eq!(read_peer(&path).unwrap(), peer);
        fs::create_dir(dir.path().join("nested")).unwrap();
        assert_eq!(count_files(dir.path()).unwrap(), 1);
    }

    #[test]
    fn test_identity_dump_keeps_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local/transport.json");
        let dump = IdentityDump::new(None, &[1, 2, 3, 0xff]);
        dump.write(&path).unwrap();

        let back = IdentityDump::read(&path).unwrap();
        assert_eq!(back.self_peer, None);
        assert_eq!(back.identity_bytes().unwrap(), Bytes::from_static(&[1, 2, 3, 0xff]));
    }

    #[test]
    fn test_identity_dump_rejects_bad_hex() {
        let dump = IdentityDump {
            self_peer: None,
            identity: "zz".into(),
        };
        assert!(matches!(dump.identity_bytes(), Err(StoreError::InvalidData(_))));
    }

    #[test]
    fn test_registry_is_append_only_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DirectoryRegistry::new(dir.path().join("cfg/directories.list"));
        assert!(registry.list().unwrap().is_empty());

        assert!(registry.register(Path::new("/a")).unwrap());
        assert!(registry.register(Path::new("/b")).unwrap());
        assert!(!registry.register(Path::new("/a")).unwrap());

        assert_eq!(
            registry.list().unwrap(),
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }
}
