//! Model traits: the contract of the local directory model.
//!
//! Walking, hashing and merging a tree is the model's business. The bootstrap
//! protocol only needs to diff a foreign snapshot against local state and
//! apply the resulting updates one at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use treejoin_core::{ObjectId, ObjectInfo, UpdateMessage};

use crate::error::Result;

/// A local directory model bound to one root.
#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Root of the tree this model describes.
    fn root_path(&self) -> &Path;

    /// Where the content of `identification` must be placed before its
    /// update is applied.
    fn staging_path(&self, identification: &ObjectId) -> PathBuf;

    /// Reconcile the model with what is currently on disk.
    async fn update(&self) -> Result<()>;

    /// Diff a foreign snapshot against local state.
    ///
    /// Returned updates are ordered so that a directory always precedes the
    /// objects inside it.
    async fn bootstrap(&self, foreign: &ObjectInfo) -> Result<Vec<UpdateMessage>>;

    /// Apply one update.
    ///
    /// # Returns
    /// - `Ok(())` if the update was applied cleanly.
    /// - `Err(StoreError::Conflict)` if local state diverged. The update was
    ///   applied anyway.
    /// - Any other error if the update could not be applied.
    async fn apply_update_message(&self, update: &UpdateMessage) -> Result<()>;
}

/// Creates models. Bootstrap sessions build their model only once the
/// foreign snapshot has arrived.
#[async_trait]
pub trait ModelFactory: Send + Sync {
    async fn create(
        &self,
        root: &Path,
        self_id: &ObjectId,
        store_path: &Path,
    ) -> Result<Arc<dyn ModelStore>>;
}
