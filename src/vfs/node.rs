use chrono::{DateTime, Utc};

use crate::core::utils::{DIR_MODE, FILE_MODE};

/// Stable handle of a node inside a tree arena.
///
/// A handle survives `rename` (the node is relinked, never copied) and turns
/// into "absent" once the node is removed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryType {
    File,
    Directory,
}

/// Directories under the library root start out as remote shadows of a
/// location that has not been listed yet. A miss inside a shadow directory
/// may be answered by the remote source; a miss inside a local directory is final.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DirFlavor {
    Local,
    Remote,
}

/// What the write primitive puts at a path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Payload {
    Directory(DirFlavor),
    /// `None` is a file known to exist whose body was never fetched.
    File(Option<Vec<u8>>),
}

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Directory {
        // insertion ordered
        children: Vec<(String, NodeId)>,
        flavor: DirFlavor,
    },
    File {
        content: Option<Vec<u8>>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) parent: Option<NodeId>,
    pub(crate) name: String,
    pub(crate) birthtime: DateTime<Utc>,
    pub(crate) mtime: DateTime<Utc>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(
        parent: Option<NodeId>,
        name: &str,
        payload: Payload,
        now: DateTime<Utc>,
    ) -> Node {
        let kind = match payload {
            Payload::Directory(flavor) => NodeKind::Directory {
                children: Vec::new(),
                flavor,
            },
            Payload::File(content) => NodeKind::File { content },
        };
        Node {
            parent,
            name: name.to_string(),
            birthtime: now,
            mtime: now,
            kind,
        }
    }

    pub(crate) fn entry_type(&self) -> EntryType {
        match self.kind {
            NodeKind::Directory { .. } => EntryType::Directory,
            NodeKind::File { .. } => EntryType::File,
        }
    }

    pub(crate) fn is_dir(&self) -> bool {
        self.entry_type() == EntryType::Directory
    }

    pub(crate) fn is_file(&self) -> bool {
        self.entry_type() == EntryType::File
    }

    pub(crate) fn child(&self, name: &str) -> Option<NodeId> {
        match &self.kind {
            NodeKind::Directory { children, .. } => children
                .iter()
                .find(|(child, _)| child == name)
                .map(|(_, id)| *id),
            NodeKind::File { .. } => None,
        }
    }

    pub(crate) fn children(&self) -> &[(String, NodeId)] {
        match &self.kind {
            NodeKind::Directory { children, .. } => children,
            NodeKind::File { .. } => &[],
        }
    }

    pub(crate) fn flavor(&self) -> Option<DirFlavor> {
        match &self.kind {
            NodeKind::Directory { flavor, .. } => Some(*flavor),
            NodeKind::File { .. } => None,
        }
    }

    pub(crate) fn content(&self) -> Option<&[u8]> {
        match &self.kind {
            NodeKind::File { content } => content.as_deref(),
            NodeKind::Directory { .. } => None,
        }
    }

    /// A content-less file, or a directory that only shadows a remote location.
    pub(crate) fn is_remote(&self) -> bool {
        match &self.kind {
            NodeKind::File { content } => content.is_none(),
            NodeKind::Directory { flavor, .. } => *flavor == DirFlavor::Remote,
        }
    }

    pub(crate) fn stats(&self) -> Stats {
        let (mode, size) = match &self.kind {
            NodeKind::Directory { .. } => (DIR_MODE, 0),
            NodeKind::File { content } => (
                FILE_MODE,
                content.as_ref().map(|c| c.len() as u64).unwrap_or(0),
            ),
        };
        Stats {
            entry_type: self.entry_type(),
            mode,
            size,
            birthtime: self.birthtime,
            mtime: self.mtime,
            remote: self.is_remote(),
        }
    }
}

/// Metadata snapshot returned by `stat`.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    entry_type: EntryType,
    mode: u32,
    size: u64,
    birthtime: DateTime<Utc>,
    mtime: DateTime<Utc>,
    remote: bool,
}

impl Stats {
    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    pub fn is_file(&self) -> bool {
        self.entry_type == EntryType::File
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Directory
    }

    /// Always `false`; links are not supported.
    pub fn is_symlink(&self) -> bool {
        false
    }

    /// Fixed permission bits: `0o40755` for directories, `0o100644` for files.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Body length in bytes. Zero for directories and unfetched files.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn birthtime(&self) -> DateTime<Utc> {
        self.birthtime
    }

    pub fn mtime(&self) -> DateTime<Utc> {
        self.mtime
    }

    /// `true` for a remote-shadow directory or a file whose body was never fetched.
    pub fn is_remote(&self) -> bool {
        self.remote
    }
}

/// Recursive directory listing, children in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub enum Listing {
    File,
    Directory(Vec<(String, Listing)>),
}

impl Listing {
    /// Looks up a direct child of a directory listing.
    pub fn get(&self, name: &str) -> Option<&Listing> {
        match self {
            Listing::Directory(children) => children
                .iter()
                .find(|(child, _)| child == name)
                .map(|(_, listing)| listing),
            Listing::File => None,
        }
    }
}
