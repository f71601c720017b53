//! Lazy population of the library subtree from a remote content source.
//!
//! A miss under the library root is answered by asking a [`Fetcher`] for the
//! missing resource, writing the answer into the tree and retrying the
//! failed operation once. Identical requests issued while one is in flight
//! share a single fetch and its outcome.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use log::debug;
use thiserror::Error;

use crate::core::Result;
use crate::core::error::{ErrorKind, FsError};
use crate::core::utils::{basename, dirname, in_lib, is_reserved_path, join, to_tokens};
use crate::vfs::node::{DirFlavor, NodeKind, Payload};
use crate::vfs::tree::Tree;

/// Answer of the remote source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// Directory entries; a trailing `/` marks a sub-directory.
    Listing(Vec<String>),
    /// Body of a single file.
    Content(String),
}

#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("remote resource not found: {0}")]
    NotFound(String),
    #[error("remote transport failed: {0}")]
    Transport(Arc<anyhow::Error>),
    /// The source answered for something other than what was asked.
    #[error("registry answered for '{received}' when '{requested}' was requested")]
    Protocol { requested: String, received: String },
}

impl From<anyhow::Error> for FetchError {
    fn from(err: anyhow::Error) -> Self {
        FetchError::Transport(Arc::new(err))
    }
}

pub type FetchResult = std::result::Result<Fetched, FetchError>;
pub type FetchFuture = LocalBoxFuture<'static, FetchResult>;

/// The remote content source.
///
/// `remote_path` is the path below the library root (`/react/index.js` for
/// `/node_modules/react/index.js`). With `wants_directory` the answer must be
/// a [`Fetched::Listing`], otherwise a [`Fetched::Content`].
pub trait Fetcher {
    fn fetch(&self, remote_path: &str, wants_directory: bool) -> FetchFuture;
}

impl<F, Fut> Fetcher for F
where
    F: Fn(&str, bool) -> Fut,
    Fut: Future<Output = FetchResult> + 'static,
{
    fn fetch(&self, remote_path: &str, wants_directory: bool) -> FetchFuture {
        self(remote_path, wants_directory).boxed_local()
    }
}

/// What the failed operation expected to find.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Expect {
    /// `stat`: either kind.
    Any,
    File,
    Directory,
}

/// Dedup key of the gateway.
///
/// This is the path as the file system asks for it, before any version
/// pinning a [`Fetcher`] may apply, so `/react/x` and `/react@1.0.0/x` are
/// separate fetches even when they resolve to the same package.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FetchKey {
    pub(crate) remote_path: String,
    pub(crate) directory: bool,
}

/// One remote request and where its answer lands in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FetchPlan {
    pub(crate) key: FetchKey,
    pub(crate) local_path: String,
}

fn remote_path<'a>(abspath: &'a str, lib: &str) -> &'a str {
    abspath.get(lib.len() + 1..).unwrap_or("")
}

/// Whether a failed lookup of `abspath` may be answered remotely.
///
/// Only `NotFound` misses under the library root qualify, and only when the
/// deepest existing node on the way is a remote-shadow directory or the
/// target itself as an unfetched file. A `package.json` lookup more than
/// `package_json_depth` segments deep is never fetched.
pub(crate) fn should_fetch(err: &FsError, abspath: &str, tree: &Tree, package_json_depth: usize) -> bool {
    if err.kind() != ErrorKind::NotFound || !in_lib(abspath, tree.lib()) {
        return false;
    }
    let tokens = to_tokens(abspath);
    if basename(abspath) == "package.json" && tokens.len() > package_json_depth {
        debug!("not fetching nested package.json lookup {abspath}");
        return false;
    }
    let (deepest, depth) = tree.deepest(abspath);
    match tree.get(deepest) {
        Some(node) if depth == tokens.len() => node.is_file() && node.content().is_none(),
        Some(node) => node.flavor() == Some(DirFlavor::Remote),
        None => false,
    }
}

/// Decides what to ask the remote source for after a miss at `abspath`.
///
/// * A direct child of the library root is always fetched as a listing.
/// * `Expect::File` fetches the file itself.
/// * `Expect::Directory` fetches the listing of `abspath`.
/// * `Expect::Any` fetches the listing of the parent directory, which seeds a
///   whole level at once.
pub(crate) fn plan(abspath: &str, lib: &str, expect: Expect) -> Option<FetchPlan> {
    let remote = remote_path(abspath, lib);
    let depth = to_tokens(remote).len();
    if depth == 0 {
        return None;
    }
    let (remote, local, directory) = match expect {
        _ if depth == 1 => (remote, abspath, true),
        Expect::File => (remote, abspath, false),
        Expect::Directory => (remote, abspath, true),
        Expect::Any => (dirname(remote), dirname(abspath), true),
    };
    Some(FetchPlan {
        key: FetchKey {
            remote_path: remote.to_string(),
            directory,
        },
        local_path: local.to_string(),
    })
}

/// Listing fetch for a remote-shadow directory that exists but holds nothing
/// yet. A shadow with any entry is answered locally.
pub(crate) fn plan_listing(abspath: &str, tree: &Tree) -> Option<FetchPlan> {
    if !in_lib(abspath, tree.lib()) || is_reserved_path(abspath, tree.lib()) {
        return None;
    }
    let node = tree.lookup(abspath).and_then(|id| tree.get(id))?;
    if node.flavor() != Some(DirFlavor::Remote) || !node.children().is_empty() {
        return None;
    }
    Some(FetchPlan {
        key: FetchKey {
            remote_path: remote_path(abspath, tree.lib()).to_string(),
            directory: true,
        },
        local_path: abspath.to_string(),
    })
}

/// Writes a fetch answer into the tree.
///
/// A listing materializes the directory, marks it local and adds a
/// remote-shadow directory or an unfetched file for every listed name not
/// already present. Names are checked before anything is written: a listed
/// sub-directory that already exists as a file fails with `AlreadyExists`.
pub(crate) fn apply(tree: &mut Tree, plan: &FetchPlan, fetched: Fetched) -> Result<()> {
    let local = plan.local_path.as_str();
    match (fetched, plan.key.directory) {
        (Fetched::Listing(entries), true) => {
            let entries: Vec<(&str, bool)> = entries
                .iter()
                .map(|entry| match entry.strip_suffix('/') {
                    Some(name) => (name, true),
                    None => (entry.as_str(), false),
                })
                .filter(|(name, _)| !matches!(*name, "" | "." | "..") && !name.contains('/'))
                .collect();

            if let Some(node) = tree.lookup(local).and_then(|id| tree.get(id)) {
                if !node.is_dir() {
                    return Err(FsError::not_a_directory(local));
                }
                for (name, is_dir) in &entries {
                    let existing = node.child(name).and_then(|id| tree.get(id));
                    if *is_dir && existing.is_some_and(|child| !child.is_dir()) {
                        return Err(FsError::already_exists(join(local, name)));
                    }
                }
            }

            let dir = tree.mkdir_all(local)?;
            tree.set_flavor(dir, DirFlavor::Local);
            for (name, is_dir) in entries {
                let present = tree.get(dir).and_then(|node| node.child(name)).is_some();
                if present {
                    continue;
                }
                let payload = if is_dir {
                    Payload::Directory(DirFlavor::Remote)
                } else {
                    Payload::File(None)
                };
                tree.put(dir, &join(local, name), payload)?;
            }
            Ok(())
        }
        (Fetched::Content(text), false) => {
            if let Some(NodeKind::Directory { .. }) =
                tree.lookup(local).and_then(|id| tree.get(id)).map(|node| &node.kind)
            {
                return Err(FsError::is_a_directory(local));
            }
            let parent = tree.mkdir_all(dirname(local))?;
            tree.put(parent, local, Payload::File(Some(text.into_bytes())))?;
            Ok(())
        }
        _ => {
            log::warn!(
                "remote answered {} with the wrong kind of resource",
                plan.key.remote_path
            );
            Err(FsError::malformed(local))
        }
    }
}

/// Counters of the gateway's traffic.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GatewayStats {
    /// Fetches actually handed to the fetcher.
    pub started: u64,
    /// Requests that attached to an in-flight fetch.
    pub joined: u64,
    pub failed: u64,
}

/// Deduplicating front of a [`Fetcher`].
///
/// One gateway may serve several file systems; the in-flight table lives as
/// long as the gateway.
pub struct Gateway {
    fetcher: Rc<dyn Fetcher>,
    inflight: RefCell<HashMap<FetchKey, Shared<FetchFuture>>>,
    stats: Cell<GatewayStats>,
}

impl Gateway {
    pub fn new<F: Fetcher + 'static>(fetcher: F) -> Self {
        Self::from_rc(Rc::new(fetcher))
    }

    pub fn from_rc(fetcher: Rc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            inflight: RefCell::new(HashMap::new()),
            stats: Cell::new(GatewayStats::default()),
        }
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats.get()
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.borrow().len()
    }

    fn bump(&self, update: impl FnOnce(&mut GatewayStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }

    pub(crate) async fn fetch(&self, key: &FetchKey) -> FetchResult {
        let shared = {
            let mut inflight = self.inflight.borrow_mut();
            match inflight.get(key) {
                Some(pending) => {
                    debug!("joining in-flight fetch of {}", key.remote_path);
                    self.bump(|s| s.joined += 1);
                    pending.clone()
                }
                None => {
                    debug!(
                        "fetching {} ({})",
                        key.remote_path,
                        if key.directory { "listing" } else { "file" }
                    );
                    self.bump(|s| s.started += 1);
                    let pending = self
                        .fetcher
                        .fetch(&key.remote_path, key.directory)
                        .shared();
                    inflight.insert(key.clone(), pending.clone());
                    pending
                }
            }
        };

        let result = shared.clone().await;

        {
            let mut inflight = self.inflight.borrow_mut();
            if inflight
                .get(key)
                .is_some_and(|current| current.ptr_eq(&shared))
            {
                inflight.remove(key);
                if let Err(err) = &result {
                    debug!("fetch of {} failed: {err}", key.remote_path);
                    self.bump(|s| s.failed += 1);
                }
            }
        }
        result
    }
}
