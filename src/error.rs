//! Shared result code used by every fallible operation in the crate.

use std::io;

/// The single error taxonomy propagated end-to-end through the I/O fabric.
///
/// A file read that hits end of stream returns [`ErrorCode::Eof`] even when
/// exposed through a [`crate::transform::Transform`] wrapped around it —
/// identity is preserved across every layer, never translated into a
/// generic failure partway through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorCode {
    #[error("operation not supported")]
    NotSupported,
    #[error("stream closed")]
    Closed,
    #[error("operation timed out")]
    Timeout,
    #[error("internal error")]
    Internal,
    #[error("access denied")]
    Access,
    #[error("already exists")]
    Exists,
    #[error("no space left")]
    NoSpace,
    #[error("does not exist")]
    NotExist,
    #[error("not a directory")]
    NotDir,
    #[error("not empty")]
    NotEmpty,
    #[error("allocation failure")]
    Alloc,
    #[error("end of file")]
    Eof,
    #[error("message too large")]
    TooLarge,
    #[error("host unreachable")]
    HostUnreachable,
    #[error("network unreachable")]
    NetUnreachable,
    #[error("network is down")]
    NetDown,
    #[error("connection reset")]
    NetReset,
    #[error("malformed network address")]
    BadNetAddr,
    #[error("bad argument")]
    BadArg,
}

/// The crate's result alias: `Ok` or exactly one [`ErrorCode`].
pub type Result<T> = std::result::Result<T, ErrorCode>;

impl ErrorCode {
    /// Maps an OS error to one [`ErrorCode`], mirroring `errno_to_fs` from
    /// the original C implementation. Unmapped values collapse to
    /// [`ErrorCode::Internal`].
    pub fn from_io(err: &io::Error) -> Self {
        #[cfg(unix)]
        if let Some(raw) = err.raw_os_error() {
            match raw {
                libc::EPERM | libc::EACCES | libc::EROFS => return ErrorCode::Access,
                libc::ENOENT => return ErrorCode::NotExist,
                libc::ENOTDIR => return ErrorCode::NotDir,
                libc::ENOSPC => return ErrorCode::NoSpace,
                #[cfg(target_os = "linux")]
                libc::EDQUOT => return ErrorCode::NoSpace,
                libc::EEXIST => return ErrorCode::Exists,
                libc::ENOTEMPTY => return ErrorCode::NotEmpty,
                libc::ENOMEM => return ErrorCode::Alloc,
                libc::ETIMEDOUT => return ErrorCode::Timeout,
                libc::ECONNRESET => return ErrorCode::NetReset,
                libc::ENETUNREACH => return ErrorCode::NetUnreachable,
                libc::ENETDOWN => return ErrorCode::NetDown,
                libc::EHOSTUNREACH => return ErrorCode::HostUnreachable,
                libc::EMSGSIZE => return ErrorCode::TooLarge,
                _ => {}
            }
        }

        match err.kind() {
            io::ErrorKind::TimedOut => ErrorCode::Timeout,
            io::ErrorKind::NotFound => ErrorCode::NotExist,
            io::ErrorKind::AlreadyExists => ErrorCode::Exists,
            io::ErrorKind::PermissionDenied => ErrorCode::Access,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                ErrorCode::NetReset
            }
            io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => ErrorCode::Closed,
            io::ErrorKind::UnexpectedEof => ErrorCode::Eof,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorCode::BadArg,
            io::ErrorKind::WouldBlock => ErrorCode::Timeout,
            _ => ErrorCode::Internal,
        }
    }
}

impl From<io::Error> for ErrorCode {
    fn from(err: io::Error) -> Self {
        ErrorCode::from_io(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_errno_collapses_to_internal() {
        let err = io::Error::from_raw_os_error(libc::ENXIO);
        assert_eq!(ErrorCode::from_io(&err), ErrorCode::Internal);
    }

    #[test]
    fn would_block_is_timeout() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert_eq!(ErrorCode::from_io(&err), ErrorCode::Timeout);
    }

    #[test]
    fn not_found_maps_to_not_exist() {
        let err = io::Error::from_raw_os_error(libc::ENOENT);
        assert_eq!(ErrorCode::from_io(&err), ErrorCode::NotExist);
    }
}
