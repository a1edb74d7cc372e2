//! Transport error codes.
//!
//! The transport contract reports failures as plain integer codes, the way a
//! C messaging library reports them through `errno`. [`Errno`] keeps the raw
//! code intact so it can be surfaced to a host verbatim (negated) and mapped
//! into [`NanoshimError`](crate::error::NanoshimError) by the socket layer.

use std::fmt;

/// Offset used for codes that have no POSIX counterpart.
const HAUSNUMERO: i32 = 156_384_712;

/// Raw transport error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    /// Interrupted blocking call.
    pub const EINTR: Self = Self(4);
    /// Unknown socket, or a socket whose slot was reused.
    pub const EBADF: Self = Self(9);
    /// Operation would block.
    pub const EAGAIN: Self = Self(11);
    /// Out of memory.
    pub const ENOMEM: Self = Self(12);
    /// Invalid argument.
    pub const EINVAL: Self = Self(22);
    /// Socket table full.
    pub const EMFILE: Self = Self(24);
    /// Message larger than the configured maximum.
    pub const EMSGSIZE: Self = Self(90);
    /// Endpoint scheme not served by this transport.
    pub const EPROTONOSUPPORT: Self = Self(93);
    /// Endpoint already bound.
    pub const EADDRINUSE: Self = Self(98);
    /// Peer went away.
    pub const ECONNRESET: Self = Self(104);
    /// No buffer space available.
    pub const ENOBUFS: Self = Self(105);
    /// Socket already has a peer.
    pub const EISCONN: Self = Self(106);
    /// Send or receive timeout elapsed.
    pub const ETIMEDOUT: Self = Self(110);
    /// Nothing bound at the endpoint.
    pub const ECONNREFUSED: Self = Self(111);
    /// Socket was terminated (zombified or closed under a blocked call).
    pub const ETERM: Self = Self(HAUSNUMERO + 53);

    /// Raw integer code.
    #[must_use]
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Symbolic name, or `None` for codes this crate does not know.
    #[must_use]
    pub const fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::EINTR => "EINTR",
            Self::EBADF => "EBADF",
            Self::EAGAIN => "EAGAIN",
            Self::ENOMEM => "ENOMEM",
            Self::EINVAL => "EINVAL",
            Self::EMFILE => "EMFILE",
            Self::EMSGSIZE => "EMSGSIZE",
            Self::EPROTONOSUPPORT => "EPROTONOSUPPORT",
            Self::EADDRINUSE => "EADDRINUSE",
            Self::ECONNRESET => "ECONNRESET",
            Self::ENOBUFS => "ENOBUFS",
            Self::EISCONN => "EISCONN",
            Self::ETIMEDOUT => "ETIMEDOUT",
            Self::ECONNREFUSED => "ECONNREFUSED",
            Self::ETERM => "ETERM",
            _ => return None,
        })
    }

    /// True for the codes a blocked call returns when it is interrupted
    /// in-process.
    #[must_use]
    pub const fn is_interrupt(self) -> bool {
        matches!(self, Self::ETERM | Self::EINTR)
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "errno {}", self.0),
        }
    }
}

impl std::error::Error for Errno {}
