//! Crate-wide error taxonomy.
//!
//! Every public fallible entry point returns one of the error types defined
//! here. Each variant carries the negative errno the design assigns it so
//! callers that need to cross a process boundary (e.g. a CLI exit code) can
//! recover the original category without re-deriving it from the message.

use thiserror::Error;

/// Top-level error type returned by registry, control-protocol, and
/// client-library operations alike.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DevmuxError {
    /// No record matches the supplied resource id.
    #[error("no resource matches the given identifier")]
    NotFound,

    /// An exclusive resource is already held and the claim did not request
    /// (or was not permitted) the hostile override.
    #[error("resource is exclusively held")]
    Busy,

    /// The registry or a bounded array within it is full.
    #[error("no space available: {0}")]
    NoSpace(&'static str),

    /// A required argument was missing, malformed, or an operation is not
    /// supported in the current context.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),

    /// The control channel's major version is incompatible with the peer.
    #[error("incompatible protocol version: local={local:#x} peer={peer:#x}")]
    VersionMismatch { local: u32, peer: u32 },

    /// A wire record could not be read or written.
    #[error("transport error: {0}")]
    TransportError(&'static str),

    /// A wait operation's timeout elapsed before an event arrived.
    #[error("operation timed out")]
    Timeout,

    /// `decrement` was called on a resource whose ref count is already zero.
    #[error("reference count underflow")]
    Underflow,

    /// Passthrough of a host-OS primitive failure.
    #[error("OS error: {0}")]
    OsError(#[from] OsErrorInner),
}

/// Wraps a raw `std::io::Error` so `DevmuxError` can stay `Clone + Eq`.
///
/// `std::io::Error` is neither, so the OS error path stores only the
/// information callers actually compare on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (errno {errno})")]
pub struct OsErrorInner {
    pub errno: i32,
    pub message: String,
}

impl From<std::io::Error> for DevmuxError {
    fn from(e: std::io::Error) -> Self {
        DevmuxError::OsError(OsErrorInner {
            errno: e.raw_os_error().unwrap_or(-1),
            message: e.to_string(),
        })
    }
}

impl DevmuxError {
    /// Negative errno this error category maps onto, per the taxonomy in
    /// the design document. Used by `devmuxctl` and anything else that
    /// needs a C-ABI-compatible exit code.
    pub fn errno(&self) -> i32 {
        match self {
            DevmuxError::NotFound => -libc::ENXIO,
            DevmuxError::Busy => -libc::EBUSY,
            DevmuxError::NoSpace(_) => -libc::ENOMEM,
            DevmuxError::Invalid(_) => -libc::EINVAL,
            DevmuxError::VersionMismatch { .. } => -libc::ENOEXEC,
            DevmuxError::TransportError(_) => -libc::EOVERFLOW,
            DevmuxError::Timeout => -libc::ETIMEDOUT,
            DevmuxError::Underflow => -libc::EINVAL,
            DevmuxError::OsError(inner) => -inner.errno,
        }
    }
}

pub type Result<T> = std::result::Result<T, DevmuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_matches_taxonomy() {
        assert_eq!(DevmuxError::NotFound.errno(), -libc::ENXIO);
        assert_eq!(DevmuxError::Busy.errno(), -libc::EBUSY);
        assert_eq!(DevmuxError::Timeout.errno(), -libc::ETIMEDOUT);
    }

    #[test]
    fn os_error_roundtrips_raw_errno() {
        let io_err = std::io::Error::from_raw_os_error(libc::EAGAIN);
        let err: DevmuxError = io_err.into();
        assert_eq!(err.errno(), -libc::EAGAIN);
    }
}
