pub mod error;
pub mod utils;

use crate::vfs::{NodeId, Stats};

pub use error::{ErrorKind, FsError};

pub type Result<T> = std::result::Result<T, FsError>;

/// Blocking file system verbs. None of them ever reaches a remote source:
/// a miss is reported as it is seen in the in-memory tree.
///
/// Paths may be relative (resolved against `/`) and are normalized first.
pub trait FsBackend {
    fn stat(&self, path: &str) -> Result<Stats>;
    fn exists(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> Result<Vec<u8>>;
    fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    fn mkdir(&self, path: &str) -> Result<()>;
    fn mkdir_all(&self, path: &str) -> Result<NodeId>;
    fn read_dir(&self, path: &str) -> Result<Vec<String>>;
    fn unlink(&self, path: &str) -> Result<()>;
    fn rmdir(&self, path: &str) -> Result<()>;
    fn rename(&self, from: &str, to: &str) -> Result<()>;
    fn clear(&self);
}
