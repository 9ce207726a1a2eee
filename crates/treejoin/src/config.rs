//! Session configuration.

use std::path::PathBuf;
use std::time::Duration;

use treejoin_core::Layout;
use treejoin_store::DirectoryRegistry;

const REGISTRY_FILE: &str = "directories";

/// Configuration for a bootstrap session.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Root of the tree to join.
    pub root: PathBuf,
    /// Trusted peers replicate the whole tree; untrusted peers only the roster.
    pub trusted: bool,
    /// How often the availability loop looks for an online correspondent.
    pub poll_interval: Duration,
    /// How often outstanding object requests are re-sent.
    pub resend_interval: Duration,
    /// Registry of bootstrapped roots. Defaults to a file in the local store.
    pub registry_path: Option<PathBuf>,
}

impl BootstrapConfig {
    /// Trusted configuration with default intervals.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            trusted: true,
            poll_interval: Duration::from_secs(10),
            resend_interval: Duration::from_secs(60),
            registry_path: None,
        }
    }

    pub fn with_trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }

    pub fn with_registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_path = Some(path.into());
        self
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.root, self.trusted)
    }

    pub fn registry(&self) -> DirectoryRegistry {
        let path = self
            .registry_path
            .clone()
            .unwrap_or_else(|| self.layout().local_dir().join(REGISTRY_FILE));
        DirectoryRegistry::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BootstrapConfig::new("/tmp/tree");
        assert!(config.trusted);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.resend_interval, Duration::from_secs(60));
        assert_eq!(
            config.registry().path(),
            PathBuf::from("/tmp/tree/.treejoin/local/directories")
        );
    }

    #[test]
    fn test_untrusted_registry_lives_in_visible_layout() {
        let config = BootstrapConfig::new("/tmp/tree").with_trusted(false);
        assert_eq!(
            config.registry().path(),
            PathBuf::from("/tmp/tree/local/directories")
        );
        let custom = config.with_registry_path("/tmp/registry");
        assert_eq!(custom.registry().path(), PathBuf::from("/tmp/registry"));
    }
}
