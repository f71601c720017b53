//! An in-memory virtual file system whose library directory fills itself on demand.
//!
//! ### Overview
//!
//! `lazy-vfs` keeps a POSIX-like tree of files and directories in memory. One
//! top-level directory, `/node_modules` by default, is special: it mirrors a
//! remote package source. Nothing of it is downloaded up front. When an async
//! lookup misses inside it, the missing listing or file is fetched, written into
//! the tree and the lookup is retried.
//!
//! **Key ideas**:
//! - **One tree**: every entry is a node with a stable [`NodeId`]; paths are derived, not stored.
//! - **Shared fetches**: concurrent misses for the same resource wait on one request.
//! - **Pinned versions**: [`PinnedFetcher`] keeps a package at the version it was first seen with.
//! - **Watchers**: listeners hear about `rename` and `change` events of a path and its children.
//! - **Snapshots**: the whole tree round-trips through JSON.
//!
//! ```no_run
//! use lazy_vfs::{FetchError, Fetched, LazyFS};
//!
//! let fs = LazyFS::with_fetcher(|path: &str, dir: bool| {
//!     let answer = if dir {
//!         Fetched::Listing(vec!["index.js".into()])
//!     } else {
//!         Fetched::Content(format!("// {path}"))
//!     };
//!     async move { Ok::<_, FetchError>(answer) }
//! });
//! let body = futures::executor::block_on(fs.read_async("/node_modules/left-pad/index.js")).unwrap();
//! assert_eq!(body, b"// /left-pad/index.js");
//! ```

mod core;
mod vfs;

pub use crate::core::{ErrorKind, FsBackend, FsError, Result};
pub use crate::vfs::*;
