//! Kernel error kinds
//!
//! Every VFS and syscall failure surfaces as exactly one `KernelError`
//! variant. Each variant carries a short detail message (usually the path
//! or fd involved) and maps to a stable errno-style code via
//! [`KernelError::code`], which is what userland prints.

use thiserror::Error;

/// Result alias used throughout the kernel
pub type KResult<T> = Result<T, KernelError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// No such file or directory
    #[error("{0}: no such file or directory")]
    NoEntry(String),
    /// Name already taken in the target directory
    #[error("{0}: already exists")]
    Exists(String),
    /// Directory where a non-directory was required
    #[error("{0}: is a directory")]
    IsDir(String),
    /// Non-directory where a directory was required
    #[error("{0}: not a directory")]
    NotDir(String),
    /// Permission bits rejected the access
    #[error("{0}: permission denied")]
    Access(String),
    /// Caller does not own the object
    #[error("{0}: operation not permitted")]
    Perm(String),
    /// Symlink expansion exceeded the depth limit
    #[error("{0}: too many levels of symbolic links")]
    Loop(String),
    /// Unmount target is not a mount point
    #[error("{0}: not mounted")]
    NotMounted(String),
    /// Inode kind does not implement the operation
    #[error("{0}: operation not supported")]
    Unsupported(String),
    /// Descriptor not open, or not open for this direction
    #[error("bad file descriptor: {0}")]
    BadFd(String),
    /// Directory still has entries
    #[error("{0}: directory not empty")]
    NotEmpty(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Descriptor table exhausted
    #[error("too many open files")]
    TooManyFiles,
    /// Write or truncate past the configured file size limit
    #[error("file too large ({0})")]
    TooLarge(String),
    /// Broken kernel invariant; a bug rather than a user error
    #[error("internal error: {0}")]
    Internal(String),
}

impl KernelError {
    /// Errno-style string code for this error
    pub fn code(&self) -> &'static str {
        match self {
            KernelError::NoEntry(_) => "ENOENT",
            KernelError::Exists(_) => "EEXIST",
            KernelError::IsDir(_) => "EISDIR",
            KernelError::NotDir(_) => "ENOTDIR",
            KernelError::Access(_) => "EACCES",
            KernelError::Perm(_) => "EPERM",
            KernelError::Loop(_) => "ELOOP",
            KernelError::NotMounted(_) => "ENOTMNT",
            KernelError::Unsupported(_) => "EOPNOTSUPP",
            KernelError::BadFd(_) => "EBADF",
            KernelError::NotEmpty(_) => "ENOTEMPTY",
            KernelError::InvalidArgument(_) => "EINVAL",
            KernelError::TooManyFiles => "EMFILE",
            KernelError::TooLarge(_) => "EFBIG",
            KernelError::Internal(_) => "EDEBUG",
        }
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(e: serde_json::Error) -> Self {
        KernelError::InvalidArgument(format!("config: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(KernelError::NoEntry("/x".into()).code(), "ENOENT");
        assert_eq!(KernelError::Loop("/x".into()).code(), "ELOOP");
        assert_eq!(KernelError::NotMounted("/dev".into()).code(), "ENOTMNT");
        assert_eq!(KernelError::Internal("bad".into()).code(), "EDEBUG");
        assert_eq!(KernelError::TooLarge("1 byte".into()).code(), "EFBIG");
    }

    #[test]
    fn test_error_display() {
        let err = KernelError::Perm("/a/f".into());
        assert_eq!(err.to_string(), "/a/f: operation not permitted");
        assert_eq!(KernelError::TooManyFiles.to_string(), "too many open files");
    }

    #[test]
    fn test_from_json_error() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: KernelError = err.into();
        assert_eq!(err.code(), "EINVAL");
    }
}
