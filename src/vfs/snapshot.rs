//! Portable form of a tree.
//!
//! A snapshot is a JSON object mapping every path (depth-first, parents before
//! children) to `{"f": <text or null>}` for files or `{"d": <local>}` for
//! directories. A `null` body is a file whose content was never fetched.
//! Reserved paths are not part of a snapshot.

use std::fmt;

use log::debug;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::Result;
use crate::core::error::FsError;
use crate::core::utils::{dirname, is_reserved_path, normalize};
use crate::vfs::node::{DirFlavor, NodeKind, Payload};
use crate::vfs::tree::Tree;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotEntry {
    #[serde(rename = "f")]
    File(Option<String>),
    /// `true` for a local directory, `false` for a remote shadow.
    #[serde(rename = "d")]
    Directory(bool),
}

/// Ordered list of `(path, entry)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<(String, SnapshotEntry)>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<P: Into<String>>(&mut self, path: P, entry: SnapshotEntry) {
        self.entries.push((path.into(), entry));
    }

    pub fn entries(&self) -> &[(String, SnapshotEntry)] {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&SnapshotEntry> {
        self.entries
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, entry)| entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|err| {
            debug!("snapshot encoding failed: {err}");
            FsError::malformed("snapshot")
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| {
            debug!("snapshot decoding failed: {err}");
            FsError::malformed("snapshot")
        })
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (path, entry) in &self.entries {
            map.serialize_entry(path, entry)?;
        }
        map.end()
    }
}

struct SnapshotVisitor;

impl<'de> Visitor<'de> for SnapshotVisitor {
    type Value = Snapshot;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of paths to file or directory entries")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Snapshot, A::Error> {
        let mut snapshot = Snapshot::new();
        while let Some((path, entry)) = access.next_entry::<String, SnapshotEntry>()? {
            snapshot.push(path, entry);
        }
        Ok(snapshot)
    }
}

impl<'de> Deserialize<'de> for Snapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(SnapshotVisitor)
    }
}

/// Dumps every non-reserved node of `tree`.
pub(crate) fn capture(tree: &Tree) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for (path, id) in tree.walk() {
        if is_reserved_path(&path, tree.lib()) {
            continue;
        }
        let Some(node) = tree.get(id) else { continue };
        let entry = match &node.kind {
            NodeKind::File { content } => SnapshotEntry::File(
                content
                    .as_ref()
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
            ),
            NodeKind::Directory { flavor, .. } => SnapshotEntry::Directory(*flavor == DirFlavor::Local),
        };
        snapshot.push(path, entry);
    }
    snapshot
}

/// Replays `snapshot` onto `tree` in order. Missing parents are created on the way.
pub(crate) fn replay(tree: &mut Tree, snapshot: &Snapshot) -> Result<()> {
    for (path, entry) in snapshot.entries() {
        let abspath = normalize(path)?;
        if is_reserved_path(&abspath, tree.lib()) {
            continue;
        }
        match entry {
            SnapshotEntry::File(body) => {
                let parent = tree.mkdir_all(dirname(&abspath))?;
                let body = body.as_ref().map(|text| text.as_bytes().to_vec());
                tree.put(parent, &abspath, Payload::File(body))?;
            }
            SnapshotEntry::Directory(local) => {
                let dir = tree.mkdir_all(&abspath)?;
                let flavor = if *local {
                    DirFlavor::Local
                } else {
                    DirFlavor::Remote
                };
                tree.set_flavor(dir, flavor);
            }
        }
    }
    Ok(())
}
