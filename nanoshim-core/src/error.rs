/// Nanoshim Error Types
///
/// Every socket, registry and receive-loop operation reports through
/// [`NanoshimError`]; raw transport codes are folded in via `From<Errno>`.

use crate::errno::Errno;
use thiserror::Error;

/// Main error type for Nanoshim operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NanoshimError {
    /// Malformed input (empty payload, duplicate call-site registration)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation on an unbound, closed or reused socket handle
    #[error("Invalid socket handle")]
    InvalidHandle,

    /// Operation interrupted by an in-process abort
    #[error("Operation canceled")]
    Canceled,

    /// Opaque transport failure, code preserved for diagnostics
    #[error("Transport error: {0}")]
    Transport(Errno),

    /// Second stop of a receive loop
    #[error("Receive loop already stopped")]
    AlreadyStopped,

    /// Message buffer allocation failed
    #[error("Resource exhausted: could not allocate {requested} bytes")]
    ResourceExhausted { requested: usize },
}

/// Result type alias for Nanoshim operations
pub type Result<T> = std::result::Result<T, NanoshimError>;

impl NanoshimError {
    /// Create an invalid argument error with a message
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Check if this error is the result of an abort rather than a failure
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Check if a non-blocking call found nothing to do
    #[must_use]
    pub const fn is_would_block(&self) -> bool {
        matches!(self, Self::Transport(Errno::EAGAIN))
    }

    /// Check if a send/receive timeout elapsed
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(Errno::ETIMEDOUT))
    }

    /// The transport code this error corresponds to.
    ///
    /// Hosts that speak the integer convention return the negation of this.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        match self {
            Self::InvalidArgument(_) => Errno::EINVAL,
            Self::InvalidHandle => Errno::EBADF,
            Self::Canceled => Errno::ETERM,
            Self::Transport(code) => *code,
            Self::AlreadyStopped => Errno::EINVAL,
            Self::ResourceExhausted { .. } => Errno::ENOMEM,
        }
    }
}

impl From<Errno> for NanoshimError {
    fn from(code: Errno) -> Self {
        match code {
            Errno::EBADF => Self::InvalidHandle,
            Errno::ETERM | Errno::EINTR => Self::Canceled,
            Errno::ENOMEM | Errno::ENOBUFS => Self::ResourceExhausted { requested: 0 },
            Errno::EINVAL => Self::InvalidArgument("rejected by transport".to_string()),
            other => Self::Transport(other),
        }
    }
}
