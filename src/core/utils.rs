//! Path helpers. Every path inside the VFS is a `/`-separated string; host path
//! semantics (drive letters, `\` separators) never apply.

use crate::core::Result;
use crate::core::error::FsError;

/// `drwxr-xr-x`
pub const DIR_MODE: u32 = 0o40755;
/// `-rw-r--r--`
pub const FILE_MODE: u32 = 0o100644;

/// Turns an arbitrary path into an absolute normalized path.
///
/// * Relative paths are resolved against the virtual root `/`.
/// * `.` segments and repeated separators are dropped.
/// * `..` removes the previous segment; at the root it is a no-op.
/// * The result never ends with `/` except for the root itself.
///
/// Empty input or input containing a NUL byte is rejected with `MalformedInput`.
pub fn normalize(path: &str) -> Result<String> {
    if path.is_empty() || path.contains('\0') {
        return Err(FsError::malformed(path));
    }
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            name => parts.push(name),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Splits a normalized path into its segments. The root yields no segments.
pub fn to_tokens(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Parent of a normalized path. The parent of `/` is `/`.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Last segment of a normalized path. Empty for the root.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Appends a single segment to a normalized directory path.
pub fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

pub fn is_virtual_root(path: &str) -> bool {
    path == "/"
}

/// Root and the library root can never be created, removed or renamed away.
pub fn is_reserved_path(path: &str, lib: &str) -> bool {
    is_virtual_root(path) || path.strip_prefix('/') == Some(lib)
}

/// Whether a normalized path lies under (or is) the library root.
pub fn in_lib(path: &str, lib: &str) -> bool {
    to_tokens(path).first() == Some(&lib)
}
