//! This module provides the in-memory file system whose library subtree is
//! populated from a remote source the first time it is accessed.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, warn};

use crate::core::utils::{dirname, normalize};
use crate::core::{FsBackend, FsError, Result};
use crate::vfs::node::{EntryType, Listing, NodeId, Payload, Stats};
use crate::vfs::remote::{self, Expect, FetchError, FetchPlan, Fetcher, Gateway};
use crate::vfs::snapshot::{self, Snapshot};
use crate::vfs::tree::Tree;
use crate::vfs::watch::{self, Listener, Notifier, WatchEvent, Watcher};

/// Settings of a [`LazyFS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LazyFsConfig {
    lib_dir: String,
    package_json_depth: usize,
    remote: bool,
}

impl Default for LazyFsConfig {
    fn default() -> Self {
        Self {
            lib_dir: "node_modules".to_string(),
            package_json_depth: 3,
            remote: true,
        }
    }
}

impl LazyFsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the reserved top-level library directory.
    pub fn with_lib_dir<S: Into<String>>(mut self, name: S) -> Self {
        self.lib_dir = name.into();
        self
    }

    /// `package.json` lookups with more path segments than this are never
    /// fetched. With the default of 3, `/node_modules/pkg/package.json` is
    /// fetched and `/node_modules/pkg/lib/package.json` is not.
    pub fn with_package_json_depth(mut self, depth: usize) -> Self {
        self.package_json_depth = depth;
        self
    }

    /// Turns remote population on or off.
    pub fn with_remote(mut self, enabled: bool) -> Self {
        self.remote = enabled;
        self
    }

    pub fn lib_dir(&self) -> &str {
        &self.lib_dir
    }

    pub fn package_json_depth(&self) -> usize {
        self.package_json_depth
    }

    pub fn remote(&self) -> bool {
        self.remote
    }
}

/// An in-memory virtual file system with a lazily fetched library subtree.
///
/// `LazyFS` keeps every file and directory in a node tree owned by the
/// instance. Paths are `/`-separated; relative paths resolve against `/`.
///
/// ### Library subtree
///
/// The top-level directory named by [`LazyFsConfig::with_lib_dir`]
/// (`/node_modules` by default) is reserved: it always exists, can't be
/// removed or renamed, and misses inside it may be answered by a
/// [`Fetcher`]. Only the `*_async` verbs ever reach the fetcher; the blocking
/// [`FsBackend`] verbs report exactly what is in memory.
///
/// ### Invariants
///
/// 1. **Root existence**: `/` and the library root always exist and are directories.
/// 2. **Single owner**: a node is the child of exactly one directory; rename
///    relinks it without copying, so a [`NodeId`] follows the node around.
/// 3. **Directory times**: a directory's mtime moves only when a direct
///    child is added, removed or renamed.
/// 4. **No partial failure**: an operation that fails leaves the tree as it was.
///
/// ### Thread Safety
///
/// `LazyFS` is single-threaded (`!Send`, `!Sync`). Concurrent async calls on
/// one thread are fine and share in-flight fetches.
///
/// ### Example
///
/// ```no_run
/// use lazy_vfs::{FsBackend, LazyFS};
///
/// let fs = LazyFS::new();
/// fs.write("/docs/note.txt", b"Hello").unwrap();
/// assert_eq!(fs.read_dir("/docs").unwrap(), vec!["note.txt"]);
/// fs.unlink("/docs/note.txt").unwrap();
/// ```
pub struct LazyFS {
    config: LazyFsConfig,
    tree: RefCell<Tree>,
    notifier: Rc<RefCell<Notifier>>,
    gateway: Option<Rc<Gateway>>,
}

impl Default for LazyFS {
    fn default() -> Self {
        Self::new()
    }
}

impl LazyFS {
    /// Creates a purely local file system: library misses stay misses.
    pub fn new() -> Self {
        Self::with_config(LazyFsConfig::default(), None)
    }

    /// Creates a file system that populates its library from `fetcher`.
    pub fn with_fetcher<F: Fetcher + 'static>(fetcher: F) -> Self {
        Self::with_config(LazyFsConfig::default(), Some(Rc::new(Gateway::new(fetcher))))
    }

    /// Creates a file system around a possibly shared gateway.
    pub fn with_config(config: LazyFsConfig, gateway: Option<Rc<Gateway>>) -> Self {
        let tree = Tree::new(config.lib_dir());
        Self {
            config,
            tree: RefCell::new(tree),
            notifier: Rc::new(RefCell::new(Notifier::default())),
            gateway,
        }
    }

    pub fn config(&self) -> &LazyFsConfig {
        &self.config
    }

    pub fn gateway(&self) -> Option<&Rc<Gateway>> {
        self.gateway.as_ref()
    }

    /// Runs a mutation and delivers the events it recorded before returning.
    fn mutate<T>(&self, op: impl FnOnce(&mut Tree) -> Result<T>) -> Result<T> {
        let (result, events) = {
            let mut tree = self.tree.borrow_mut();
            let result = op(&mut tree);
            (result, tree.take_events())
        };
        watch::dispatch(&self.notifier, events);
        result
    }

    /// Handle of the node at `path`, if any.
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        let abspath = normalize(path).ok()?;
        self.tree.borrow().lookup(&abspath)
    }

    /// Current path of a node, rebuilt from its parent links.
    /// `None` once the node has been removed.
    pub fn path_of(&self, id: NodeId) -> Option<String> {
        self.tree.borrow().derive_path(id)
    }

    /// The normalized form of `path`. Links don't exist, so this is the real path.
    pub fn realpath(&self, path: &str) -> Result<String> {
        normalize(path)
    }

    /// Writes a file known to exist whose content is not available yet.
    /// Reads of it fail with `NotFound` until a body is written or fetched.
    pub fn write_placeholder(&self, path: &str) -> Result<()> {
        self.write_payload(path, None)
    }

    fn write_payload(&self, path: &str, content: Option<Vec<u8>>) -> Result<()> {
        let abspath = normalize(path)?;
        self.mutate(|tree| {
            let parent = tree.mkdir_all(dirname(&abspath))?;
            tree.put(parent, &abspath, Payload::File(content))?;
            Ok(())
        })
    }

    /// Nested listing of everything below `path`.
    pub fn read_dir_recursive(&self, path: &str) -> Result<Listing> {
        let abspath = normalize(path)?;
        let tree = self.tree.borrow();
        let id = tree
            .lookup(&abspath)
            .ok_or_else(|| FsError::not_found(&abspath))?;
        match tree.get(id) {
            Some(node) if node.is_dir() => Ok(tree.listing(id)),
            Some(_) => Err(FsError::not_a_directory(&abspath)),
            None => Err(FsError::not_found(&abspath)),
        }
    }

    /// Subscribes `listener` to changes of `path` and, when `path` is a
    /// directory, of its direct children. The path doesn't have to exist.
    pub fn watch<F>(&self, path: &str, listener: F) -> Result<Watcher>
    where
        F: FnMut(&WatchEvent) + 'static,
    {
        let abspath = normalize(path)?;
        let listener: Listener = Rc::new(RefCell::new(listener));
        let id = self.notifier.borrow_mut().subscribe(&abspath, listener);
        Ok(Watcher::new(abspath, id, Rc::downgrade(&self.notifier)))
    }

    /// Number of open watchers registered at `path`.
    pub fn watcher_count(&self, path: &str) -> usize {
        match normalize(path) {
            Ok(abspath) => self.notifier.borrow().subscriber_count(&abspath),
            Err(_) => 0,
        }
    }

    /// Dumps the tree.
    pub fn snapshot(&self) -> Snapshot {
        snapshot::capture(&self.tree.borrow())
    }

    /// Replaces the whole tree (reserved roots aside) with `snapshot`.
    /// A snapshot that can't be replayed leaves the tree untouched.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<()> {
        let mut scratch = Tree::new(self.config.lib_dir());
        snapshot::replay(&mut scratch, snapshot)?;
        self.mutate(|tree| {
            tree.clear();
            snapshot::replay(tree, snapshot)
        })
    }

    pub fn to_json(&self) -> Result<String> {
        self.snapshot().to_json()
    }

    pub fn from_json(&self, json: &str) -> Result<()> {
        self.restore(&Snapshot::from_json(json)?)
    }

    /// `stat` that may populate the library from the remote source.
    pub async fn stat_async(&self, path: &str) -> Result<Stats> {
        let abspath = normalize(path)?;
        self.with_remote(&abspath, Expect::Any, |fs, p| fs.stat(p))
            .await
    }

    /// `read` that may fetch the file, or its directory, from the remote source.
    pub async fn read_async(&self, path: &str) -> Result<Vec<u8>> {
        let abspath = normalize(path)?;
        self.with_remote(&abspath, Expect::File, |fs, p| fs.read(p))
            .await
    }

    /// `read_dir` that may fetch the directory listing from the remote source.
    ///
    /// An empty remote-shadow directory is listed first. Whatever goes wrong
    /// with that listing, the local entries are returned.
    pub async fn read_dir_async(&self, path: &str) -> Result<Vec<String>> {
        let abspath = normalize(path)?;
        let refresh = if self.remote_enabled() {
            remote::plan_listing(&abspath, &self.tree.borrow())
        } else {
            None
        };
        if let Some(plan) = refresh {
            if let Err(err) = self.populate(&plan).await {
                warn!("listing {abspath} failed, answering locally: {err}");
            }
        }
        self.with_remote(&abspath, Expect::Directory, |fs, p| fs.read_dir(p))
            .await
    }

    fn remote_enabled(&self) -> bool {
        self.config.remote() && self.gateway.is_some()
    }

    /// Runs `op`; on a qualifying library miss, populates the tree and runs it
    /// once more. When the fetch fails the first error is returned.
    async fn with_remote<T, F>(&self, abspath: &str, expect: Expect, op: F) -> Result<T>
    where
        F: Fn(&Self, &str) -> Result<T>,
    {
        let err = match op(self, abspath) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !self.remote_enabled() {
            return Err(err);
        }
        let plan = {
            let tree = self.tree.borrow();
            if !remote::should_fetch(&err, abspath, &tree, self.config.package_json_depth()) {
                return Err(err);
            }
            remote::plan(abspath, tree.lib(), expect)
        };
        let Some(plan) = plan else {
            return Err(err);
        };
        if self.populate(&plan).await? {
            op(self, abspath)
        } else {
            Err(err)
        }
    }

    /// Fetches `plan` and writes the answer into the tree. `Ok(false)` when the
    /// fetch failed in a way the caller should not see.
    async fn populate(&self, plan: &FetchPlan) -> Result<bool> {
        let Some(gateway) = self.gateway.clone() else {
            return Ok(false);
        };
        match gateway.fetch(&plan.key).await {
            Ok(fetched) => {
                self.mutate(|tree| remote::apply(tree, plan, fetched))?;
                Ok(true)
            }
            Err(FetchError::Protocol { requested, received }) => {
                debug!("protocol violation fetching {requested}: got {received}");
                Err(FsError::malformed(&plan.local_path))
            }
            Err(err) => {
                debug!("fetch for {} failed, keeping the local error: {err}", plan.local_path);
                Ok(false)
            }
        }
    }

    pub fn symlink(&self, _target: &str, path: &str) -> Result<()> {
        Err(FsError::not_implemented(path))
    }

    pub fn readlink(&self, path: &str) -> Result<String> {
        Err(FsError::not_implemented(path))
    }

    pub fn link(&self, _existing: &str, path: &str) -> Result<()> {
        Err(FsError::not_implemented(path))
    }

    pub fn chmod(&self, path: &str, _mode: u32) -> Result<()> {
        Err(FsError::not_implemented(path))
    }

    pub fn truncate(&self, path: &str, _len: u64) -> Result<()> {
        Err(FsError::not_implemented(path))
    }

    pub fn append(&self, path: &str, _content: &[u8]) -> Result<()> {
        Err(FsError::not_implemented(path))
    }
}

impl FsBackend for LazyFS {
    /// Returns metadata of the entry at `path`.
    fn stat(&self, path: &str) -> Result<Stats> {
        let abspath = normalize(path)?;
        let tree = self.tree.borrow();
        tree.lookup(&abspath)
            .and_then(|id| tree.get(id))
            .map(|node| node.stats())
            .ok_or_else(|| FsError::not_found(&abspath))
    }

    /// Checks if a `path` exists in the VFS.
    fn exists(&self, path: &str) -> bool {
        self.lookup(path).is_some()
    }

    /// Reads the entire contents of a file.
    ///
    /// # Returns
    /// * `Err(NotFound)` - nothing at `path`, or a file whose body was never fetched.
    /// * `Err(IsADirectory)` - `path` is a directory.
    fn read(&self, path: &str) -> Result<Vec<u8>> {
        let abspath = normalize(path)?;
        let tree = self.tree.borrow();
        let node = tree
            .lookup(&abspath)
            .and_then(|id| tree.get(id))
            .ok_or_else(|| FsError::not_found(&abspath))?;
        if node.is_dir() {
            return Err(FsError::is_a_directory(&abspath));
        }
        node.content()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| FsError::not_found(&abspath))
    }

    /// Writes `content` to a file, creating it and every missing parent directory.
    ///
    /// # Returns
    /// * `Err(IsADirectory)` - `path` is a directory (the root and the library root included).
    /// * `Err(NotADirectory)` - an ancestor of `path` is a file.
    ///
    /// # Behavior
    /// - **Overwrites completely**: an existing file keeps its birth time and gets new content.
    /// - **Parent times**: only creation of a new file touches the parent's mtime.
    fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        self.write_payload(path, Some(content.to_vec()))
    }

    /// Creates a single directory. The parent must exist.
    fn mkdir(&self, path: &str) -> Result<()> {
        let abspath = normalize(path)?;
        self.mutate(|tree| tree.mkdir(&abspath).map(|_| ()))
    }

    /// Creates a directory and all its parents (if needed). Calling it again
    /// returns the same node.
    fn mkdir_all(&self, path: &str) -> Result<NodeId> {
        let abspath = normalize(path)?;
        self.mutate(|tree| tree.mkdir_all(&abspath))
    }

    /// Names of the direct children of `path`, in insertion order.
    fn read_dir(&self, path: &str) -> Result<Vec<String>> {
        let abspath = normalize(path)?;
        let tree = self.tree.borrow();
        let id = tree
            .lookup(&abspath)
            .ok_or_else(|| FsError::not_found(&abspath))?;
        let children = tree
            .children(id)
            .ok_or_else(|| FsError::not_a_directory(&abspath))?;
        Ok(children.iter().map(|(name, _)| name.clone()).collect())
    }

    fn unlink(&self, path: &str) -> Result<()> {
        let abspath = normalize(path)?;
        self.mutate(|tree| tree.remove(&abspath, EntryType::File))
    }

    /// Removes a directory together with everything below it.
    fn rmdir(&self, path: &str) -> Result<()> {
        let abspath = normalize(path)?;
        self.mutate(|tree| tree.remove(&abspath, EntryType::Directory))
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = normalize(from)?;
        let to = normalize(to)?;
        self.mutate(|tree| tree.rename(&from, &to))
    }

    /// Removes all artifacts (dirs and files) in vfs, but preserves the
    /// root and an empty library root.
    fn clear(&self) {
        let events = {
            let mut tree = self.tree.borrow_mut();
            tree.clear();
            tree.take_events()
        };
        watch::dispatch(&self.notifier, events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::core::utils::{DIR_MODE, FILE_MODE};
    use crate::vfs::watch::EventKind;

    fn kind<T: std::fmt::Debug>(result: Result<T>) -> ErrorKind {
        result.unwrap_err().kind()
    }

    mod write {
        use super::*;

        #[test]
        fn test_write_and_read_back() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/a.js", b"123")?;
            assert!(fs.exists("/a.js"));
            assert_eq!(fs.read("/a.js")?, b"123");
            fs.write("/a.js", &[52, 53, 54])?;
            assert_eq!(fs.read("a.js")?, b"456");
            fs.write("/a.js", b"")?;
            assert_eq!(fs.read("/a.js")?, b"");
            Ok(())
        }

        #[test]
        fn test_write_builds_the_path() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/a/b/c", b"hi")?;
            assert_eq!(fs.read_dir("/a")?, vec!["b"]);
            assert!(fs.stat("/a/b")?.is_dir());
            assert!(!fs.stat("/a")?.is_remote());
            Ok(())
        }

        #[test]
        fn test_library_parents_are_shadows() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/node_modules/a/b/a.js", b"456")?;
            assert!(fs.stat("/node_modules/a")?.is_remote());
            assert!(fs.stat("/node_modules/a/b")?.is_remote());
            Ok(())
        }

        #[test]
        fn test_write_errors() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/sub/a.js", b"456")?;
            fs.write("/a.js", b"1")?;
            assert_eq!(kind(fs.write("/sub", b"456")), ErrorKind::IsADirectory);
            assert_eq!(kind(fs.write("/", b"456")), ErrorKind::IsADirectory);
            assert_eq!(kind(fs.write("/node_modules", b"x")), ErrorKind::IsADirectory);
            assert_eq!(kind(fs.write("/a.js/b.js", b"456")), ErrorKind::NotADirectory);
            assert_eq!(kind(fs.write("", b"1")), ErrorKind::MalformedInput);
            Ok(())
        }
    }

    mod read {
        use super::*;

        #[test]
        fn test_read_errors() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/sub/a.js", b"456")?;
            fs.write_placeholder("/sub/later.js")?;
            assert_eq!(kind(fs.read("/sub")), ErrorKind::IsADirectory);
            assert_eq!(kind(fs.read("/sub/b.js")), ErrorKind::NotFound);
            assert_eq!(kind(fs.read("/sub/later.js")), ErrorKind::NotFound);
            assert_eq!(kind(fs.read("/node_modules/jquery/src")), ErrorKind::NotFound);
            Ok(())
        }

        #[test]
        fn test_read_dir() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/sub/a.js", b"123")?;
            fs.write("/a.js", b"123")?;
            assert_eq!(fs.read_dir("/")?, vec!["node_modules", "sub", "a.js"]);
            assert_eq!(kind(fs.read_dir("/a.js")), ErrorKind::NotADirectory);
            assert_eq!(kind(fs.read_dir("/nope")), ErrorKind::NotFound);
            Ok(())
        }

        #[test]
        fn test_read_dir_recursive() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/a/b/c", b"123")?;
            let expected = Listing::Directory(vec![
                ("node_modules".to_string(), Listing::Directory(vec![])),
                (
                    "a".to_string(),
                    Listing::Directory(vec![(
                        "b".to_string(),
                        Listing::Directory(vec![("c".to_string(), Listing::File)]),
                    )]),
                ),
            ]);
            assert_eq!(fs.read_dir_recursive("/")?, expected);
            assert_eq!(kind(fs.read_dir_recursive("/a/b/c")), ErrorKind::NotADirectory);
            Ok(())
        }
    }

    mod mkdir {
        use super::*;

        #[test]
        fn test_mkdir() -> Result<()> {
            let fs = LazyFS::new();
            fs.mkdir("/sub")?;
            fs.write("/file", b"")?;
            assert!(fs.stat("/sub")?.is_dir());
            assert_eq!(kind(fs.mkdir("/")), ErrorKind::AlreadyExists);
            assert_eq!(kind(fs.mkdir("/sub")), ErrorKind::AlreadyExists);
            assert_eq!(kind(fs.mkdir("/a/sub")), ErrorKind::NotFound);
            assert_eq!(kind(fs.mkdir("/file")), ErrorKind::AlreadyExists);
            fs.mkdir("/node_modules/sub")?;
            assert!(fs.stat("/node_modules/sub")?.is_remote());
            Ok(())
        }

        #[test]
        fn test_mkdir_all() -> Result<()> {
            let fs = LazyFS::new();
            let dir = fs.mkdir_all("/a/b/c")?;
            assert_eq!(fs.lookup("/a/b/c"), Some(dir));
            assert_eq!(fs.mkdir_all("/a/b/c")?, dir);
            fs.write("/sub", b"123")?;
            assert_eq!(kind(fs.mkdir_all("/sub/a")), ErrorKind::NotADirectory);
            Ok(())
        }
    }

    mod remove {
        use super::*;

        #[test]
        fn test_unlink() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/a.js", b"123")?;
            fs.unlink("/a.js")?;
            assert!(!fs.exists("/a.js"));
            assert_eq!(kind(fs.unlink("/a.js")), ErrorKind::NotFound);
            Ok(())
        }

        #[test]
        fn test_rmdir() -> Result<()> {
            let fs = LazyFS::new();
            fs.mkdir("/sub")?;
            assert_eq!(kind(fs.unlink("/sub")), ErrorKind::NotFound);
            fs.rmdir("/sub")?;
            assert!(!fs.exists("/sub"));
            assert_eq!(kind(fs.rmdir("/")), ErrorKind::PermissionDenied);
            assert_eq!(kind(fs.unlink("/")), ErrorKind::PermissionDenied);
            assert_eq!(kind(fs.rmdir("/node_modules")), ErrorKind::PermissionDenied);
            assert_eq!(kind(fs.unlink("/node_modules/")), ErrorKind::PermissionDenied);
            Ok(())
        }
    }

    mod rename {
        use super::*;

        #[test]
        fn test_rename() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/a.js", b"123")?;
            fs.write("/b.js", b"456")?;
            fs.rename("/a.js", "/c.js")?;
            assert_eq!(fs.read("/c.js")?, b"123");
            assert_eq!(kind(fs.rename("/a.js", "/c.js")), ErrorKind::NotFound);
            assert_eq!(kind(fs.rename("/c.js", "/a/c.js")), ErrorKind::NotFound);
            fs.mkdir("/a")?;
            fs.rename("/c.js", "/a/c.js")?;
            assert_eq!(fs.read("/a/c.js")?, b"123");
            fs.rename("/a", "/d")?;
            assert_eq!(fs.read("/d/c.js")?, b"123");
            assert_eq!(kind(fs.rename("/", "/a.js")), ErrorKind::PermissionDenied);
            assert_eq!(kind(fs.rename("/b.js", "/node_modules")), ErrorKind::PermissionDenied);
            Ok(())
        }

        #[test]
        fn test_node_identity_follows_rename() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/a/b/c", b"123")?;
            let node = fs.lookup("/a/b/c").unwrap();
            fs.rename("/a/b/c", "/x")?;
            assert_eq!(fs.lookup("/x"), Some(node));
            assert_eq!(fs.path_of(node).as_deref(), Some("/x"));
            fs.unlink("/x")?;
            assert_eq!(fs.path_of(node), None);
            Ok(())
        }
    }

    mod stat {
        use super::*;

        #[test]
        fn test_stat() -> Result<()> {
            let fs = LazyFS::new();
            let root = fs.stat("/")?;
            assert!(root.is_dir());
            assert!(!root.is_symlink());
            assert_eq!(root.mode(), DIR_MODE);
            assert_eq!(kind(fs.stat("/a")), ErrorKind::NotFound);
            fs.write("/a", b"123")?;
            let stats = fs.stat("/a")?;
            assert!(stats.is_file());
            assert!(!stats.is_dir());
            assert_eq!(stats.mode(), FILE_MODE);
            assert_eq!(stats.size(), 3);
            Ok(())
        }

        #[test]
        fn test_overwrite_keeps_birthtime() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/a", b"1")?;
            let before = fs.stat("/a")?;
            let dir_before = fs.stat("/")?;
            fs.write("/a", b"2")?;
            let after = fs.stat("/a")?;
            assert_eq!(after.birthtime(), before.birthtime());
            assert!(after.mtime() > before.mtime());
            assert_eq!(fs.stat("/")?.mtime(), dir_before.mtime());
            Ok(())
        }
    }

    mod watch {
        use super::*;

        fn recorder() -> (
            Rc<RefCell<Vec<WatchEvent>>>,
            impl FnMut(&WatchEvent) + 'static,
        ) {
            let seen = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&seen);
            (seen, move |event: &WatchEvent| sink.borrow_mut().push(event.clone()))
        }

        #[test]
        fn test_watch() -> Result<()> {
            let fs = LazyFS::new();
            let (dir_seen, dir_listener) = recorder();
            let (file_seen, file_listener) = recorder();
            let dir_watcher = fs.watch("/", dir_listener)?;
            let file_watcher = fs.watch("/b.js", file_listener)?;

            fs.write("/a.js", b"123")?;
            fs.write("/a.js", b"456")?;
            fs.write("/b.js", b"123")?;
            assert_eq!(
                *dir_seen.borrow(),
                vec![
                    WatchEvent::new(EventKind::Rename, "a.js"),
                    WatchEvent::new(EventKind::Change, "a.js"),
                    WatchEvent::new(EventKind::Rename, "b.js"),
                ]
            );
            assert_eq!(
                *file_seen.borrow(),
                vec![WatchEvent::new(EventKind::Rename, "b.js")]
            );

            assert_eq!(fs.watcher_count("/"), 1);
            dir_watcher.close();
            file_watcher.close();
            fs.write("/a.js", b"789")?;
            assert_eq!(dir_seen.borrow().len(), 3);
            assert_eq!(file_seen.borrow().len(), 1);
            assert_eq!(fs.notifier.borrow().watched_paths(), 0);

            let _relative = fs.watch("x", |_| {})?;
            Ok(())
        }

        #[test]
        fn test_removal_notifies_path_and_parent() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/d/f", b"1")?;
            fs.mkdir("/d/sub")?;
            let (dir_seen, dir_listener) = recorder();
            let (file_seen, file_listener) = recorder();
            let (sub_seen, sub_listener) = recorder();
            let _dir = fs.watch("/d", dir_listener)?;
            let _file = fs.watch("/d/f", file_listener)?;
            let _sub = fs.watch("/d/sub", sub_listener)?;

            fs.unlink("/d/f")?;
            fs.rmdir("/d/sub")?;

            assert_eq!(
                *dir_seen.borrow(),
                vec![
                    WatchEvent::new(EventKind::Rename, "f"),
                    WatchEvent::new(EventKind::Rename, "sub"),
                ]
            );
            assert_eq!(*file_seen.borrow(), vec![WatchEvent::new(EventKind::Rename, "f")]);
            assert_eq!(*sub_seen.borrow(), vec![WatchEvent::new(EventKind::Rename, "sub")]);
            Ok(())
        }

        #[test]
        fn test_rename_notifies_both_locations() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/src/a.js", b"1")?;
            fs.mkdir("/dst")?;
            let (old_seen, old_listener) = recorder();
            let (new_seen, new_listener) = recorder();
            let (src_seen, src_listener) = recorder();
            let (dst_seen, dst_listener) = recorder();
            let _old = fs.watch("/src/a.js", old_listener)?;
            let _new = fs.watch("/dst/b.js", new_listener)?;
            let _src = fs.watch("/src", src_listener)?;
            let _dst = fs.watch("/dst", dst_listener)?;

            fs.rename("/src/a.js", "/dst/b.js")?;

            assert_eq!(*old_seen.borrow(), vec![WatchEvent::new(EventKind::Rename, "a.js")]);
            assert_eq!(*new_seen.borrow(), vec![WatchEvent::new(EventKind::Rename, "b.js")]);
            assert_eq!(*src_seen.borrow(), vec![WatchEvent::new(EventKind::Rename, "a.js")]);
            assert_eq!(*dst_seen.borrow(), vec![WatchEvent::new(EventKind::Rename, "b.js")]);
            Ok(())
        }

        #[test]
        fn test_clear_notifies_top_level_entries() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/a/b", b"1")?;
            let (seen, listener) = recorder();
            let _root = fs.watch("/", listener)?;
            fs.clear();
            assert_eq!(*seen.borrow(), vec![WatchEvent::new(EventKind::Rename, "a")]);
            Ok(())
        }

        #[test]
        fn test_failed_mutation_notifies_nobody() -> Result<()> {
            let fs = LazyFS::new();
            let (seen, listener) = recorder();
            let _watcher = fs.watch("/", listener)?;
            fs.mkdir("/sub")?;
            assert_eq!(kind(fs.write("/sub", b"x")), ErrorKind::IsADirectory);
            assert_eq!(kind(fs.rmdir("/node_modules")), ErrorKind::PermissionDenied);
            assert_eq!(seen.borrow().len(), 1);
            Ok(())
        }

        #[test]
        fn test_listener_may_reenter() -> Result<()> {
            let fs = Rc::new(LazyFS::new());
            let inner = Rc::clone(&fs);
            let _watcher = fs.watch("/trigger", move |event: &WatchEvent| {
                if event.kind() == EventKind::Rename {
                    let _ = inner.write("/echo", b"seen");
                }
            })?;
            fs.write("/trigger", b"1")?;
            assert_eq!(fs.read("/echo")?, b"seen");
            Ok(())
        }
    }

    mod snapshot {
        use super::*;

        #[test]
        fn test_round_trip() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/a/b/c", "123中文".as_bytes())?;
            fs.write_placeholder("/a/b/d")?;
            let json = fs.to_json()?;
            assert!(json.starts_with(r#"{"/a":{"d":true},"/a/b":{"d":true}"#));

            let other = LazyFS::new();
            other.from_json(&json)?;
            assert_eq!(other.read("/a/b/c")?, "123中文".as_bytes());
            assert_eq!(kind(other.read("/a/b/d")), ErrorKind::NotFound);
            assert!(other.exists("/a/b/d"));
            Ok(())
        }

        #[test]
        fn test_clear() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/a/b/c", b"123")?;
            fs.write_placeholder("/a/b/d")?;
            assert_eq!(kind(fs.write_placeholder("/a/b/c/d")), ErrorKind::NotADirectory);
            fs.clear();
            assert_eq!(fs.to_json()?, "{}");
            fs.write_placeholder("/a/b/c/d")?;
            Ok(())
        }

        #[test]
        fn test_bad_snapshot_leaves_tree_alone() -> Result<()> {
            let fs = LazyFS::new();
            fs.write("/keep", b"1")?;
            let err = fs.from_json(r#"{"/x":{"f":"1"},"/x/y":{"f":"2"}}"#).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotADirectory);
            assert_eq!(fs.read("/keep")?, b"1");
            Ok(())
        }
    }

    #[test]
    fn test_unsupported_operations() {
        let fs = LazyFS::new();
        assert_eq!(kind(fs.symlink("/a", "/b")), ErrorKind::NotImplemented);
        assert_eq!(kind(fs.readlink("/b")), ErrorKind::NotImplemented);
        assert_eq!(kind(fs.link("/a", "/b")), ErrorKind::NotImplemented);
        assert_eq!(kind(fs.chmod("/a", 0o777)), ErrorKind::NotImplemented);
        assert_eq!(kind(fs.truncate("/a", 0)), ErrorKind::NotImplemented);
        assert_eq!(kind(fs.append("/a", b"x")), ErrorKind::NotImplemented);
    }

    #[test]
    fn test_realpath() -> Result<()> {
        let fs = LazyFS::new();
        assert_eq!(fs.realpath("a/./b/../c/")?, "/a/c");
        Ok(())
    }
}
