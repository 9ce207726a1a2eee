//! Tree snapshots and the update messages derived from them.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::ObjectId;

/// One node of a directory tree snapshot.
///
/// The root of a snapshot has an empty `path`; every other node carries its
/// path relative to the root, using `/` as separator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub identification: ObjectId,
    pub name: String,
    pub path: String,
    pub directory: bool,
    /// Content hash for files, empty for directories.
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<ObjectInfo>,
}

impl ObjectInfo {
    /// A directory node with no children yet.
    pub fn directory(identification: ObjectId, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            identification,
            name: base_name(&path),
            path,
            directory: true,
            content: String::new(),
            objects: Vec::new(),
        }
    }

    /// A file node.
    pub fn file(identification: ObjectId, path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            identification,
            name: base_name(&path),
            path,
            directory: false,
            content: content.into(),
            objects: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: ObjectInfo) -> Self {
        self.objects.push(child);
        self
    }

    /// Visit every node below this one in pre-order, parents before children.
    pub fn descendants(&self) -> Vec<&ObjectInfo> {
        let mut out = Vec::new();
        let mut stack: Vec<&ObjectInfo> = self.objects.iter().rev().collect();
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.objects.iter().rev());
        }
        out
    }

    /// Where this object lives below `root` on the local file system.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        self.path
            .split('/')
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .fold(root.to_path_buf(), |path, part| path.join(part))
    }

    /// A copy of this node without its children.
    pub fn shallow(&self) -> Self {
        Self {
            objects: Vec::new(),
            ..self.clone()
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

fn base_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Kind of change an [`UpdateMessage`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Modify,
    Remove,
}

/// One idempotent change to apply to a local tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub operation: Operation,
    pub object: ObjectInfo,
}

impl UpdateMessage {
    pub fn new(operation: Operation, object: ObjectInfo) -> Self {
        Self { operation, object }
    }

    /// Whether applying this update needs the object's content first.
    pub fn needs_content(&self) -> bool {
        !self.object.directory && self.operation != Operation::Remove
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ObjectInfo {
        ObjectInfo::directory(ObjectId::new("root"), "")
            .with_child(
                ObjectInfo::directory(ObjectId::new("docs"), "docs")
                    .with_child(ObjectInfo::file(ObjectId::new("obj1"), "docs/a.txt", "h1"))
                    .with_child(ObjectInfo::file(ObjectId::new("obj2"), "docs/b.txt", "h2")),
            )
            .with_child(ObjectInfo::file(ObjectId::new("obj3"), "top.txt", "h3"))
    }

    #[test]
    fn test_descendants_preorder() {
        let tree = sample();
        let ids: Vec<&str> = tree
            .descendants()
            .iter()
            .map(|o| o.identification.as_str())
            .collect();
        assert_eq!(ids, vec!["docs", "obj1", "obj2", "obj3"]);
    }

    #[test]
    fn test_names_from_paths() {
        let tree = sample();
        assert_eq!(tree.objects[0].name, "docs");
        assert_eq!(tree.objects[0].objects[1].name, "b.txt");
    }

    #[test]
    fn test_snapshot_json() {
        let tree = sample();
        let back = ObjectInfo::from_json(&tree.to_json().unwrap()).unwrap();
        assert_eq!(tree, back);
    }

    #[test]
    fn test_local_path_stays_below_root() {
        let file = ObjectInfo::file(ObjectId::new("f"), "docs/../a.txt", "h");
        assert_eq!(file.local_path(Path::new("/r")), PathBuf::from("/r/docs/a.txt"));
        let root = ObjectInfo::directory(ObjectId::new("root"), "");
        assert_eq!(root.local_path(Path::new("/r")), PathBuf::from("/r"));
    }

    #[test]
    fn test_needs_content() {
        let file = ObjectInfo::file(ObjectId::new("f"), "f", "h");
        let dir = ObjectInfo::directory(ObjectId::new("d"), "d");
        assert!(UpdateMessage::new(Operation::Create, file.clone()).needs_content());
        assert!(UpdateMessage::new(Operation::Modify, file.clone()).needs_content());
        assert!(!UpdateMessage::new(Operation::Remove, file).needs_content());
        assert!(!UpdateMessage::new(Operation::Create, dir).needs_content());
    }
}
