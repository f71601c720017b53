mod lazy_fs;
mod node;
mod pin;
mod remote;
mod snapshot;
mod tree;
mod watch;

pub use lazy_fs::{LazyFS, LazyFsConfig};
pub use node::{DirFlavor, EntryType, Listing, NodeId, Stats};
pub use pin::{PackageId, PinnedFetcher, Registry, Resolved, VersionPins};
pub use remote::{Expect, FetchError, FetchFuture, FetchResult, Fetched, Fetcher, Gateway, GatewayStats};
pub use snapshot::{Snapshot, SnapshotEntry};
pub use watch::{EventKind, SubscriptionId, WatchEvent, Watcher};
