use std::fmt;

use thiserror::Error;

/// The closed set of failures every file system operation can report.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    PermissionDenied,
    NotImplemented,
    MalformedInput,
}

impl ErrorKind {
    /// errno-style symbolic code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "ENOENT",
            ErrorKind::AlreadyExists => "EEXIST",
            ErrorKind::NotADirectory => "ENOTDIR",
            ErrorKind::IsADirectory => "EISDIR",
            ErrorKind::PermissionDenied => "EPERM",
            ErrorKind::NotImplemented => "ENOSYS",
            ErrorKind::MalformedInput => "EINVAL",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "no such file or directory",
            ErrorKind::AlreadyExists => "file already exists",
            ErrorKind::NotADirectory => "not a directory",
            ErrorKind::IsADirectory => "illegal operation on a directory",
            ErrorKind::PermissionDenied => "operation not permitted",
            ErrorKind::NotImplemented => "function not implemented",
            ErrorKind::MalformedInput => "invalid argument",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// An error annotated with the path it was raised for.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}: {}, '{}'", .kind.code(), .kind.description(), .path)]
pub struct FsError {
    kind: ErrorKind,
    path: String,
}

impl FsError {
    pub fn new<P: Into<String>>(kind: ErrorKind, path: P) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn not_found<P: Into<String>>(path: P) -> Self {
        Self::new(ErrorKind::NotFound, path)
    }

    pub fn already_exists<P: Into<String>>(path: P) -> Self {
        Self::new(ErrorKind::AlreadyExists, path)
    }

    pub fn not_a_directory<P: Into<String>>(path: P) -> Self {
        Self::new(ErrorKind::NotADirectory, path)
    }

    pub fn is_a_directory<P: Into<String>>(path: P) -> Self {
        Self::new(ErrorKind::IsADirectory, path)
    }

    pub fn permission_denied<P: Into<String>>(path: P) -> Self {
        Self::new(ErrorKind::PermissionDenied, path)
    }

    pub fn not_implemented<P: Into<String>>(path: P) -> Self {
        Self::new(ErrorKind::NotImplemented, path)
    }

    pub fn malformed<P: Into<String>>(path: P) -> Self {
        Self::new(ErrorKind::MalformedInput, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code_description_and_path() {
        let err = FsError::not_found("/a/b");
        assert_eq!(err.to_string(), "ENOENT: no such file or directory, '/a/b'");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.path(), "/a/b");
    }

    #[test]
    fn test_codes_are_distinct() {
        let kinds = [
            ErrorKind::NotFound,
            ErrorKind::AlreadyExists,
            ErrorKind::NotADirectory,
            ErrorKind::IsADirectory,
            ErrorKind::PermissionDenied,
            ErrorKind::NotImplemented,
            ErrorKind::MalformedInput,
        ];
        let codes: std::collections::HashSet<_> = kinds.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), kinds.len());
    }
}
