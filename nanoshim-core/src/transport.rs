//! Messaging transport contract.
//!
//! [`Transport`] is everything the core needs from a messaging library:
//! blocking send/receive of whole messages, a soft "zombify" that unblocks
//! pending calls, and hard close. Handles are generation-tagged so a stale
//! handle can never address a socket that later reused the same slot.

use std::fmt;
use std::ops::BitOr;

use crate::buffer::MessageBuffer;
use crate::errno::Errno;

/// Generation-tagged socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId {
    index: u32,
    generation: u32,
}

impl SocketId {
    /// "Not bound" sentinel.
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: 0,
    };

    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index in the transport's socket table.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at the time the socket was opened.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.index != u32::MAX
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}#{}", self.index, self.generation)
        } else {
            f.write_str("unbound")
        }
    }
}

/// Per-call send/receive flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flags(u32);

impl Flags {
    pub const NONE: Self = Self(0);
    /// Fail with `EAGAIN` instead of blocking.
    pub const DONTWAIT: Self = Self(1);

    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The messaging library as seen by the core.
///
/// Implementations must be safe to call concurrently from any thread,
/// including `zombify`/`close` against a socket another thread is blocked on.
pub trait Transport: Send + Sync + 'static {
    /// Send one message. The transport owns `msg` from this point on,
    /// whatever the outcome.
    fn send(&self, id: SocketId, msg: MessageBuffer, flags: Flags) -> Result<(), Errno>;

    /// Receive one message, blocking unless `flags` says otherwise.
    fn recv(&self, id: SocketId, flags: Flags) -> Result<MessageBuffer, Errno>;

    /// Soft close: every pending and future call on `id` fails with `ETERM`
    /// until the socket is closed. Idempotent.
    fn zombify(&self, id: SocketId) -> Result<(), Errno>;

    /// Hard close: releases the slot. `EBADF` if `id` is not open.
    fn close(&self, id: SocketId) -> Result<(), Errno>;

    /// Hard close whatever socket currently occupies slot `index`.
    fn close_slot(&self, index: u32) -> Result<(), Errno>;

    /// True if `id` names an open (possibly zombified) socket.
    fn is_live(&self, id: SocketId) -> bool;

    /// Size of the socket table.
    fn max_sockets(&self) -> u32;
}
