//! Proptest generators for property-based testing.

use proptest::prelude::*;

use crate::fixtures::{Snapshot, SnapshotBuilder};

/// Shape of a generated remote tree.
#[derive(Debug, Clone)]
pub struct SnapshotParams {
    /// Top-level directory names.
    pub dirs: Vec<String>,
    /// Files as (directory index, name, content). An index past the end of
    /// `dirs` puts the file at the root.
    pub files: Vec<(usize, String, Vec<u8>)>,
}

/// Generate a path component.
pub fn component() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,7}"
}

/// Generate file content of at most `max_len` bytes.
pub fn content(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate tree shapes with up to `max_dirs` directories and `max_files`
/// files.
pub fn snapshot_params(max_dirs: usize, max_files: usize) -> impl Strategy<Value = SnapshotParams> {
    (
        prop::collection::btree_set(component(), 0..=max_dirs),
        prop::collection::vec((any::<usize>(), component(), content(64)), 0..=max_files),
    )
        .prop_map(|(dirs, files)| {
            let dirs: Vec<String> = dirs.into_iter().map(|d| format!("d_{}", d)).collect();
            let files = files
                .into_iter()
                .enumerate()
                .map(|(i, (slot, name, data))| {
                    let index = if dirs.is_empty() { 0 } else { slot % (dirs.len() + 1) };
                    (index, format!("{}_{}.txt", name, i), data)
                })
                .collect();
            SnapshotParams { dirs, files }
        })
}

/// Build the snapshot a set of parameters describes.
pub fn snapshot_from_params(params: &SnapshotParams) -> Snapshot {
    let mut builder = SnapshotBuilder::new();
    for dir in &params.dirs {
        builder = builder.dir(dir);
    }
    for (index, name, data) in &params.files {
        let path = match params.dirs.get(*index) {
            Some(dir) => format!("{}/{}", dir, name),
            None => name.clone(),
        };
        builder = builder.file(&path, data);
    }
    builder.build()
}

/// Generate a permutation of `0..len`.
pub fn arrival_order(len: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..len).collect::<Vec<_>>()).prop_shuffle()
}

/// Generate a snapshot together with an arrival order of its files.
pub fn snapshot_with_order(
    max_dirs: usize,
    max_files: usize,
) -> impl Strategy<Value = (Snapshot, Vec<usize>)> {
    snapshot_params(max_dirs, max_files).prop_flat_map(|params| {
        let snapshot = snapshot_from_params(&params);
        let files = snapshot.file_count();
        (Just(snapshot), arrival_order(files))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn test_snapshot_counts_match_params(params in snapshot_params(4, 8)) {
            let snapshot = snapshot_from_params(&params);
            prop_assert_eq!(snapshot.directory_count(), params.dirs.len());
            prop_assert_eq!(snapshot.file_count(), params.files.len());
            prop_assert_eq!(snapshot.contents.len(), params.files.len());
        }

        #[test]
        fn test_snapshot_ids_are_unique(params in snapshot_params(4, 8)) {
            let snapshot = snapshot_from_params(&params);
            let ids: HashSet<_> = snapshot
                .tree
                .descendants()
                .iter()
                .map(|o| o.identification.clone())
                .collect();
            prop_assert_eq!(ids.len(), snapshot.tree.descendants().len());
        }

        #[test]
        fn test_arrival_order_is_permutation((snapshot, order) in snapshot_with_order(3, 6)) {
            let mut sorted = order.clone();
            sorted.sort_unstable();
            prop_assert_eq!(sorted, (0..snapshot.file_count()).collect::<Vec<_>>());
        }
    }
}
