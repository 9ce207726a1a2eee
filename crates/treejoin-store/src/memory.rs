//! In-memory implementation of the model traits.
//!
//! This is primarily for testing. Object metadata is kept in memory while
//! content is moved on disk, so a bootstrap against it produces a real tree
//! under the root. Conflicts and failures can be injected per object.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use walkdir::WalkDir;

use treejoin_core::{Layout, ObjectId, ObjectInfo, Operation, UpdateMessage, DOT_DIR};

use crate::error::{Result, StoreError};
use crate::traits::{ModelFactory, ModelStore};

/// In-memory model bound to a single root.
pub struct MemoryModel {
    root: PathBuf,
    self_id: ObjectId,
    store_path: PathBuf,
    staging: PathBuf,
    faults: Faults,
    inner: RwLock<MemoryModelInner>,
}

struct MemoryModelInner {
    /// Known objects by path relative to the root.
    objects: HashMap<String, LocalObject>,
    /// Every update applied, in order, including conflicting ones.
    applied: Vec<UpdateMessage>,
}

#[derive(Debug, Clone)]
struct LocalObject {
    directory: bool,
    content: String,
}

#[derive(Debug, Clone, Default)]
struct Faults {
    conflicts: HashSet<ObjectId>,
    failures: HashSet<ObjectId>,
    delays: HashMap<ObjectId, Duration>,
}

impl MemoryModel {
    /// Create an empty model for `root`.
    pub fn new(root: impl Into<PathBuf>, self_id: ObjectId, store_path: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let staging = Layout::trusted(&root).temp_dir();
        Self {
            root,
            self_id,
            store_path: store_path.into(),
            staging,
            faults: Faults::default(),
            inner: RwLock::new(MemoryModelInner {
                objects: HashMap::new(),
                applied: Vec::new(),
            }),
        }
    }

    pub fn self_id(&self) -> &ObjectId {
        &self.self_id
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Updates applied so far, in application order.
    pub fn applied(&self) -> Vec<UpdateMessage> {
        self.read().applied.clone()
    }

    /// Whether the model tracks an object at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.read().objects.contains_key(path)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryModelInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryModelInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record an applied update and report whether it overwrote diverging state.
    fn record(&self, update: &UpdateMessage, diverged: bool) -> Result<()> {
        let object = &update.object;
        let mut inner = self.write();
        let previous = match update.operation {
            Operation::Remove => inner.objects.remove(&object.path),
            Operation::Create | Operation::Modify => inner.objects.insert(
                object.path.clone(),
                LocalObject {
                    directory: object.directory,
                    content: object.content.clone(),
                },
            ),
        };
        inner.applied.push(update.clone());
        drop(inner);

        let conflict = self.faults.conflicts.contains(&object.identification)
            || diverged
            || (update.operation == Operation::Create && previous.is_some());
        if conflict {
            return Err(StoreError::Conflict {
                path: object.path.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ModelStore for MemoryModel {
    fn root_path(&self) -> &Path {
        &self.root
    }

    fn staging_path(&self, identification: &ObjectId) -> PathBuf {
        self.staging.join(identification.as_str())
    }

    async fn update(&self) -> Result<()> {
        let root = self.root.clone();
        let scanned = tokio::task::spawn_blocking(move || scan(&root))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        let mut inner = self.write();
        inner.objects = scanned;
        tracing::debug!(objects = inner.objects.len(), "model updated from disk");
        Ok(())
    }

    async fn bootstrap(&self, foreign: &ObjectInfo) -> Result<Vec<UpdateMessage>> {
        let inner = self.read();
        let mut updates = Vec::new();

        for node in foreign.descendants() {
            let operation = match inner.objects.get(&node.path) {
                None => Operation::Create,
                Some(local) if local.directory && node.directory => continue,
                Some(local) if !local.directory && !node.directory && local.content == node.content => {
                    continue
                }
                Some(_) => Operation::Modify,
            };
            updates.push(UpdateMessage::new(operation, node.shallow()));
        }

        Ok(updates)
    }

    async fn apply_update_message(&self, update: &UpdateMessage) -> Result<()> {
        let object = &update.object;
        if self.faults.failures.contains(&object.identification) {
            return Err(StoreError::InvalidData(format!(
                "refusing to apply {}",
                object.path
            )));
        }

        if let Some(delay) = self.faults.delays.get(&object.identification) {
            tokio::time::sleep(*delay).await;
        }

        let target = object.local_path(&self.root);

        if update.operation == Operation::Remove {
            if object.directory {
                if tokio::fs::metadata(&target).await.is_ok() {
                    tokio::fs::remove_dir_all(&target).await?;
                }
            } else if tokio::fs::metadata(&target).await.is_ok() {
                tokio::fs::remove_file(&target).await?;
            }
            return self.record(update, false);
        }

        if object.directory {
            tokio::fs::create_dir_all(&target).await?;
            return self.record(update, false);
        }

        let staged = self.staging_path(&object.identification);
        if tokio::fs::metadata(&staged).await.is_err() {
            return Err(StoreError::NotFound(format!(
                "staged content for {}",
                object.identification
            )));
        }

        // A file sitting where the update expects nothing is overwritten.
        let diverged = update.operation == Operation::Create
            && tokio::fs::metadata(&target).await.is_ok()
            && !self.contains(&object.path);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&staged, &target).await?;
        self.record(update, diverged)
    }
}

/// Walk `root` and describe everything outside the marker directory.
fn scan(root: &Path) -> Result<HashMap<String, LocalObject>> {
    let mut objects = HashMap::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != DOT_DIR);

    for entry in walker {
        let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| StoreError::InvalidData(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let object = if entry.file_type().is_dir() {
            LocalObject {
                directory: true,
                content: String::new(),
            }
        } else {
            let data = std::fs::read(entry.path())?;
            LocalObject {
                directory: false,
                content: blake3::hash(&data).to_hex().to_string(),
            }
        };
        objects.insert(relative, object);
    }

    Ok(objects)
}

/// Builds [`MemoryModel`]s, optionally with injected faults.
#[derive(Default)]
pub struct MemoryModelFactory {
    faults: Faults,
    fail_create: bool,
    created: Mutex<Vec<Arc<MemoryModel>>>,
}

impl MemoryModelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applying `identification` reports a conflict.
    pub fn with_conflict(mut self, identification: impl Into<ObjectId>) -> Self {
        self.faults.conflicts.insert(identification.into());
        self
    }

    /// Applying `identification` fails outright.
    pub fn with_failure(mut self, identification: impl Into<ObjectId>) -> Self {
        self.faults.failures.insert(identification.into());
        self
    }

    /// Applying `identification` takes at least `delay`.
    pub fn with_delay(mut self, identification: impl Into<ObjectId>, delay: Duration) -> Self {
        self.faults.delays.insert(identification.into(), delay);
        self
    }

    /// Every `create` call fails.
    pub fn failing(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// The most recently created model.
    pub fn last_model(&self) -> Option<Arc<MemoryModel>> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Number of models created so far.
    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl ModelFactory for MemoryModelFactory {
    async fn create(
        &self,
        root: &Path,
        self_id: &ObjectId,
        store_path: &Path,
    ) -> Result<Arc<dyn ModelStore>> {
        if self.fail_create {
            return Err(StoreError::InvalidData(format!(
                "cannot create model for {}",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(StoreError::NotFound(root.display().to_string()));
        }

        let mut model = MemoryModel::new(root, self_id.clone(), store_path);
        model.faults = self.faults.clone();
        let model = Arc::new(model);
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&model));
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foreign() -> ObjectInfo {
        ObjectInfo::directory(ObjectId::new("root"), "")
            .with_child(
                ObjectInfo::directory(ObjectId::new("docs"), "docs")
                    .with_child(ObjectInfo::file(ObjectId::new("obj1"), "docs/a.txt", "h1"))
                    .with_child(ObjectInfo::file(ObjectId::new("obj2"), "docs/b.txt", "h2")),
            )
    }

    async fn stage(model: &MemoryModel, id: &str, data: &[u8]) {
        let path = model.staging_path(&ObjectId::new(id));
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(path, data).await.unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_empty_root_creates_everything() {
        let dir = tempfile::tempdir().unwrap();
        let model = MemoryModel::new(dir.path(), ObjectId::new("me"), dir.path().join("store"));
        model.update().await.unwrap();

        let updates = model.bootstrap(&foreign()).await.unwrap();
        let summary: Vec<(Operation, &str, bool)> = updates
            .iter()
            .map(|u| (u.operation, u.object.identification.as_str(), u.object.directory))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Operation::Create, "docs", true),
                (Operation::Create, "obj1", false),
                (Operation::Create, "obj2", false),
            ]
        );
        assert!(updates.iter().all(|u| u.object.objects.is_empty()));
    }

    #[tokio::test]
    async fn test_bootstrap_skips_identical_and_modifies_diverging() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a.txt"), b"same").unwrap();
        std::fs::write(dir.path().join("docs/b.txt"), b"local").unwrap();
        std::fs::create_dir_all(dir.path().join(DOT_DIR).join("temp")).unwrap();

        let same_hash = blake3::hash(b"same").to_hex().to_string();
        let tree = ObjectInfo::directory(ObjectId::new("root"), "").with_child(
            ObjectInfo::directory(ObjectId::new("docs"), "docs")
                .with_child(ObjectInfo::file(ObjectId::new("obj1"), "docs/a.txt", same_hash))
                .with_child(ObjectInfo::file(ObjectId::new("obj2"), "docs/b.txt", "remote")),
        );

        let model = MemoryModel::new(dir.path(), ObjectId::new("me"), dir.path().join("store"));
        model.update().await.unwrap();
        assert!(!model.contains(DOT_DIR));

        let updates = model.bootstrap(&tree).await.unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].operation, Operation::Modify);
        assert_eq!(updates[0].object.identification, ObjectId::new("obj2"));
    }

    #[tokio::test]
    async fn test_apply_moves_staged_file_into_tree() {
        let dir = tempfile::tempdir().unwrap();
        let model = MemoryModel::new(dir.path(), ObjectId::new("me"), dir.path().join("store"));
        stage(&model, "obj1", b"hello").await;

        let update = UpdateMessage::new(
            Operation::Create,
            ObjectInfo::file(ObjectId::new("obj1"), "docs/a.txt", "h1"),
        );
        model.apply_update_message(&update).await.unwrap();

        let content = std::fs::read(dir.path().join("docs/a.txt")).unwrap();
        assert_eq!(content, b"hello");
        assert!(!model.staging_path(&ObjectId::new("obj1")).exists());
        assert_eq!(model.applied(), vec![update]);
    }

    #[tokio::test]
    async fn test_apply_without_staged_content_fails() {
        let dir = tempfile::tempdir().unwrap();
        let model = MemoryModel::new(dir.path(), ObjectId::new("me"), dir.path().join("store"));
        let update = UpdateMessage::new(
            Operation::Create,
            ObjectInfo::file(ObjectId::new("obj1"), "a.txt", "h1"),
        );
        let err = model.apply_update_message(&update).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_over_existing_directory_conflicts_but_applies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        let model = MemoryModel::new(dir.path(), ObjectId::new("me"), dir.path().join("store"));
        model.update().await.unwrap();

        let update = UpdateMessage::new(
            Operation::Create,
            ObjectInfo::directory(ObjectId::new("docs"), "docs"),
        );
        let err = model.apply_update_message(&update).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(model.applied().len(), 1);
    }

    #[tokio::test]
    async fn test_factory_injects_faults() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MemoryModelFactory::new()
            .with_conflict("obj1")
            .with_failure("obj2");
        let model = factory
            .create(dir.path(), &ObjectId::new("me"), &dir.path().join("store"))
            .await
            .unwrap();

        let memory = factory.last_model().unwrap();
        stage(&memory, "obj1", b"one").await;
        stage(&memory, "obj2", b"two").await;

        let conflict = model
            .apply_update_message(&UpdateMessage::new(
                Operation::Create,
                ObjectInfo::file(ObjectId::new("obj1"), "a.txt", "h1"),
            ))
            .await
            .unwrap_err();
        assert!(conflict.is_conflict());
        assert!(dir.path().join("a.txt").exists());

        let failure = model
            .apply_update_message(&UpdateMessage::new(
                Operation::Create,
                ObjectInfo::file(ObjectId::new("obj2"), "b.txt", "h2"),
            ))
            .await
            .unwrap_err();
        assert!(!failure.is_conflict());
        assert!(!dir.path().join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_failing_factory() {
        let dir = tempfile::tempdir().unwrap();
        let factory = MemoryModelFactory::new().failing();
        let result = factory
            .create(dir.path(), &ObjectId::new("me"), &dir.path().join("store"))
            .await;
        assert!(result.is_err());
        assert_eq!(factory.created_count(), 0);
    }
}
