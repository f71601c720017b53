//! The namespace tree: an arena of nodes linked by parent handles.
//!
//! Every node stores the handle of its parent and the name it is known by in
//! that parent, so a path is never stored, only derived. Structural changes go
//! through `put`, `detach` and `relink`, which keep the parent/child links
//! consistent and record an `Event` for each change. The owner drains events
//! with `take_events` and delivers them before returning control.

use chrono::{DateTime, Duration, Utc};
use log::debug;

use crate::core::Result;
use crate::core::error::FsError;
use crate::core::utils::{basename, dirname, is_reserved_path, join, to_tokens};
use crate::vfs::node::{DirFlavor, EntryType, Listing, Node, NodeId, NodeKind, Payload};
use crate::vfs::watch::EventKind;

pub(crate) const ROOT: NodeId = NodeId(0);

/// A structural or content change at `path`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Event {
    pub(crate) path: String,
    pub(crate) parent: String,
    pub(crate) name: String,
    pub(crate) kind: EventKind,
}

/// Wall clock that never goes backwards and never repeats a value.
#[derive(Debug)]
struct Clock {
    last: DateTime<Utc>,
}

impl Clock {
    fn new() -> Self {
        Self { last: Utc::now() }
    }

    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        self.last = if now > self.last {
            now
        } else {
            self.last + Duration::nanoseconds(1)
        };
        self.last
    }
}

#[derive(Debug)]
pub(crate) struct Tree {
    // slots of removed nodes stay `None` until `clear`
    nodes: Vec<Option<Node>>,
    lib: String,
    lib_id: NodeId,
    clock: Clock,
    events: Vec<Event>,
}

impl Tree {
    /// Creates a tree holding the root and the reserved library directory.
    pub(crate) fn new(lib: &str) -> Self {
        let mut clock = Clock::new();
        let now = clock.tick();
        let mut root = Node::new(None, "", Payload::Directory(DirFlavor::Local), now);
        let lib_id = NodeId(1);
        if let NodeKind::Directory { children, .. } = &mut root.kind {
            children.push((lib.to_string(), lib_id));
        }
        let lib_node = Node::new(Some(ROOT), lib, Payload::Directory(DirFlavor::Remote), now);
        Self {
            nodes: vec![Some(root), Some(lib_node)],
            lib: lib.to_string(),
            lib_id,
            clock,
            events: Vec::new(),
        }
    }

    pub(crate) fn lib(&self) -> &str {
        &self.lib
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(|slot| slot.as_ref())
    }

    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    pub(crate) fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Walks the tokens of a normalized path from the root. Absent as soon as a
    /// segment is missing or a file is indexed into.
    pub(crate) fn lookup(&self, path: &str) -> Option<NodeId> {
        self.lookup_from(ROOT, path)
    }

    /// Like [`Tree::lookup`], with the tokens of `path` taken relative to `start`.
    pub(crate) fn lookup_from(&self, start: NodeId, path: &str) -> Option<NodeId> {
        let mut current = start;
        for token in to_tokens(path) {
            current = self.get(current)?.child(token)?;
        }
        Some(current)
    }

    /// Direct children of a directory. `None` for files and removed nodes.
    pub(crate) fn children(&self, id: NodeId) -> Option<&[(String, NodeId)]> {
        self.get(id).filter(|node| node.is_dir()).map(|node| node.children())
    }

    /// Deepest existing node on the way to `path`, with the number of segments
    /// it consumed.
    pub(crate) fn deepest(&self, path: &str) -> (NodeId, usize) {
        let mut current = ROOT;
        let mut depth = 0;
        for token in to_tokens(path) {
            match self.get(current).and_then(|node| node.child(token)) {
                Some(child) => {
                    current = child;
                    depth += 1;
                }
                None => break,
            }
        }
        (current, depth)
    }

    /// Rebuilds the path of a node by following parent handles.
    /// `None` if the node was removed.
    pub(crate) fn derive_path(&self, id: NodeId) -> Option<String> {
        let mut names = Vec::new();
        let mut current = id;
        loop {
            let node = self.get(current)?;
            match node.parent {
                Some(parent) => {
                    names.push(node.name.as_str());
                    current = parent;
                }
                None if current == ROOT => break,
                None => return None,
            }
        }
        names.reverse();
        Some(format!("/{}", names.join("/")))
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(Some(node));
        NodeId(self.nodes.len() - 1)
    }

    fn push_event(&mut self, path: &str, kind: EventKind) {
        self.events.push(Event {
            path: path.to_string(),
            parent: dirname(path).to_string(),
            name: basename(path).to_string(),
            kind,
        });
    }

    /// The write primitive. Creates `path` inside `parent` or overwrites the
    /// file already there.
    ///
    /// Creating a child bumps the parent's mtime and records a `Rename` event.
    /// Overwriting keeps the birth time, bumps only the node's own mtime and
    /// records a `Change` event.
    ///
    /// Fails without mutating anything when
    /// * `parent` is not a directory (`NotADirectory`);
    /// * a file is written over a directory (`IsADirectory`);
    /// * a directory is written over an existing entry (`AlreadyExists`).
    pub(crate) fn put(&mut self, parent: NodeId, path: &str, payload: Payload) -> Result<NodeId> {
        let name = basename(path);
        if name.is_empty() {
            return Err(FsError::is_a_directory(path));
        }
        let parent_node = self
            .get(parent)
            .ok_or_else(|| FsError::not_found(path))?;
        if !parent_node.is_dir() {
            return Err(FsError::not_a_directory(path));
        }

        match parent_node.child(name) {
            Some(existing) => {
                let now = self.clock.tick();
                let node = self
                    .get_mut(existing)
                    .ok_or_else(|| FsError::not_found(path))?;
                match (&mut node.kind, payload) {
                    (NodeKind::File { content }, Payload::File(body)) => *content = body,
                    (NodeKind::Directory { .. }, Payload::File(_)) => {
                        return Err(FsError::is_a_directory(path));
                    }
                    (_, Payload::Directory(_)) => return Err(FsError::already_exists(path)),
                }
                node.mtime = now;
                self.push_event(path, EventKind::Change);
                Ok(existing)
            }
            None => {
                let now = self.clock.tick();
                let id = self.alloc(Node::new(Some(parent), name, payload, now));
                let parent_node = self
                    .get_mut(parent)
                    .ok_or_else(|| FsError::not_found(path))?;
                if let NodeKind::Directory { children, .. } = &mut parent_node.kind {
                    children.push((name.to_string(), id));
                }
                parent_node.mtime = now;
                self.push_event(path, EventKind::Rename);
                Ok(id)
            }
        }
    }

    /// Flavor new directories get at `path`.
    fn flavor_for(&self, path: &str) -> DirFlavor {
        if to_tokens(path).first() == Some(&self.lib.as_str()) {
            DirFlavor::Remote
        } else {
            DirFlavor::Local
        }
    }

    pub(crate) fn set_flavor(&mut self, id: NodeId, flavor: DirFlavor) {
        if let Some(node) = self.get_mut(id) {
            if let NodeKind::Directory { flavor: current, .. } = &mut node.kind {
                *current = flavor;
            }
        }
    }

    /// Creates a single directory. The parent must already be a directory.
    pub(crate) fn mkdir(&mut self, path: &str) -> Result<NodeId> {
        if to_tokens(path).is_empty() {
            return Err(FsError::already_exists(path));
        }
        let parent = self
            .lookup(dirname(path))
            .ok_or_else(|| FsError::not_found(path))?;
        let parent_node = self.get(parent).ok_or_else(|| FsError::not_found(path))?;
        if !parent_node.is_dir() {
            return Err(FsError::not_a_directory(path));
        }
        if parent_node.child(basename(path)).is_some() {
            return Err(FsError::already_exists(path));
        }
        let flavor = self.flavor_for(path);
        self.put(parent, path, Payload::Directory(flavor))
    }

    /// Creates `path` and every missing ancestor. Idempotent: an existing
    /// directory at `path` is returned as is.
    pub(crate) fn mkdir_all(&mut self, path: &str) -> Result<NodeId> {
        let flavor = self.flavor_for(path);
        let mut current = ROOT;
        let mut current_path = String::from("/");
        for token in to_tokens(path) {
            current_path = join(&current_path, token);
            let node = self.get(current).ok_or_else(|| FsError::not_found(path))?;
            current = match node.child(token) {
                Some(child) => match self.get(child) {
                    Some(child_node) if child_node.is_dir() => child,
                    _ => return Err(FsError::not_a_directory(path)),
                },
                None => self.put(current, &current_path, Payload::Directory(flavor))?,
            };
        }
        Ok(current)
    }

    /// Unlinks `id` from its parent without touching its content.
    /// The back-reference is cleared before the parent entry goes away.
    fn detach(&mut self, id: NodeId) -> Result<()> {
        let now = self.clock.tick();
        let node = self.get_mut(id).ok_or_else(|| FsError::not_found(""))?;
        let Some(parent) = node.parent.take() else {
            return Err(FsError::permission_denied("/"));
        };
        let name = node.name.clone();
        if let Some(parent_node) = self.get_mut(parent) {
            if let NodeKind::Directory { children, .. } = &mut parent_node.kind {
                children.retain(|(child, child_id)| !(child == &name && *child_id == id));
            }
            parent_node.mtime = now;
        }
        Ok(())
    }

    /// Frees the slots of a detached node and everything below it.
    fn free(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(current.0).and_then(Option::take) {
                stack.extend(node.children().iter().map(|(_, child)| *child));
            }
        }
    }

    /// Removes the entry at `path` if it is of kind `must_be`. Directories are
    /// removed with their whole subtree.
    pub(crate) fn remove(&mut self, path: &str, must_be: EntryType) -> Result<()> {
        if is_reserved_path(path, &self.lib) {
            debug!("refusing to remove reserved path {path}");
            return Err(FsError::permission_denied(path));
        }
        let id = self.lookup(path).ok_or_else(|| FsError::not_found(path))?;
        match self.get(id) {
            Some(node) if node.entry_type() == must_be => {}
            _ => return Err(FsError::not_found(path)),
        }
        self.detach(id)?;
        self.free(id);
        self.push_event(path, EventKind::Rename);
        Ok(())
    }

    fn is_ancestor(&self, ancestor: NodeId, of: NodeId) -> bool {
        let mut current = Some(of);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.get(id).and_then(|node| node.parent);
        }
        false
    }

    /// Moves the node at `from` to `to`, keeping its identity, kind and times.
    ///
    /// An existing destination is replaced when the kinds agree (a file over a
    /// file, a directory over an empty directory).
    pub(crate) fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        for path in [from, to] {
            if is_reserved_path(path, &self.lib) {
                debug!("refusing to rename reserved path {path}");
                return Err(FsError::permission_denied(path));
            }
        }
        let id = self.lookup(from).ok_or_else(|| FsError::not_found(from))?;
        if from == to {
            return Ok(());
        }
        let new_parent = self
            .lookup(dirname(to))
            .filter(|parent| self.get(*parent).is_some_and(Node::is_dir))
            .ok_or_else(|| FsError::not_found(to))?;
        if self.is_ancestor(id, new_parent) {
            return Err(FsError::malformed(to));
        }

        let source = self.get(id).ok_or_else(|| FsError::not_found(from))?;
        let replaced = match self.get(new_parent).and_then(|parent| parent.child(basename(to))) {
            Some(target) => {
                let target_node = self.get(target).ok_or_else(|| FsError::not_found(to))?;
                match (source.entry_type(), target_node.entry_type()) {
                    (EntryType::File, EntryType::Directory) => {
                        return Err(FsError::is_a_directory(to));
                    }
                    (EntryType::Directory, EntryType::File) => {
                        return Err(FsError::not_a_directory(to));
                    }
                    (EntryType::Directory, EntryType::Directory)
                        if !target_node.children().is_empty() =>
                    {
                        return Err(FsError::already_exists(to));
                    }
                    _ => Some(target),
                }
            }
            None => None,
        };

        // Validated; from here on nothing can fail.
        if let Some(target) = replaced {
            self.detach(target)?;
            self.free(target);
        }
        self.detach(id)?;
        let now = self.clock.tick();
        let name = basename(to).to_string();
        if let Some(node) = self.get_mut(id) {
            node.name = name.clone();
            node.parent = Some(new_parent);
        }
        if let Some(parent_node) = self.get_mut(new_parent) {
            if let NodeKind::Directory { children, .. } = &mut parent_node.kind {
                children.push((name, id));
            }
            parent_node.mtime = now;
        }
        self.push_event(from, EventKind::Rename);
        self.push_event(to, EventKind::Rename);
        Ok(())
    }

    /// Drops everything except the root and an empty library root.
    pub(crate) fn clear(&mut self) {
        let mut doomed: Vec<NodeId> = Vec::new();
        for dir in [ROOT, self.lib_id] {
            if let Some(node) = self.get(dir) {
                doomed.extend(
                    node.children()
                        .iter()
                        .map(|(_, id)| *id)
                        .filter(|id| *id != self.lib_id),
                );
            }
        }
        for id in doomed {
            if let Some(path) = self.derive_path(id) {
                if self.detach(id).is_ok() {
                    self.free(id);
                    self.push_event(&path, EventKind::Rename);
                }
            }
        }
        self.set_flavor(self.lib_id, DirFlavor::Remote);
    }

    /// Nested listing below `id`.
    pub(crate) fn listing(&self, id: NodeId) -> Listing {
        match self.get(id) {
            Some(node) if node.is_dir() => Listing::Directory(
                node.children()
                    .iter()
                    .map(|(name, child)| (name.clone(), self.listing(*child)))
                    .collect(),
            ),
            _ => Listing::File,
        }
    }

    /// Every node below the root in depth-first pre-order, with its path.
    pub(crate) fn walk(&self) -> Vec<(String, NodeId)> {
        let mut out = Vec::new();
        let mut stack: Vec<(String, NodeId)> = Vec::new();
        if let Some(root) = self.get(ROOT) {
            for (name, id) in root.children().iter().rev() {
                stack.push((join("/", name), *id));
            }
        }
        while let Some((path, id)) = stack.pop() {
            if let Some(node) = self.get(id) {
                for (name, child) in node.children().iter().rev() {
                    stack.push((join(&path, name), *child));
                }
            }
            out.push((path, id));
        }
        out
    }
}
