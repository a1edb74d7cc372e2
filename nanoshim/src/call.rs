//! Call-site registration and cancellation.
//!
//! Every blocking send or receive made on behalf of a call-site is wrapped
//! in a [`CallGuard`]: the registration is published immediately before the
//! transport call and withdrawn when the guard drops, on every exit path
//! including errors, cancellation and unwinding. [`CallRegistry::cancel`]
//! looks the registration up and zombifies its socket, which makes the
//! blocked transport call itself return `Canceled`.
//!
//! The registry entry stays read-locked while the canceler zombifies, so a
//! call that is returning concurrently cannot withdraw its registration
//! half-way through a cancellation. A cancel that finds nothing is a no-op:
//! the call simply finished first.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nanoshim_core::error::{NanoshimError, Result};
use nanoshim_core::socket::{Socket, SocketState};
use nanoshim_core::transport::SocketId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::Instant;
use tracing::{debug, trace};

static NEXT_CALL_SITE: AtomicU64 = AtomicU64::new(1);

/// Identity of one logical caller (one host instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSiteId(u64);

impl CallSiteId {
    /// Allocate a process-unique id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CALL_SITE.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CallSiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-site#{}", self.0)
    }
}

/// A call currently blocked in the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRegistration {
    pub call_site: CallSiteId,
    pub socket: SocketId,
    pub thread: ThreadId,
    pub since: Instant,
}

struct Registered {
    registration: CallRegistration,
    socket: Socket,
}

/// Process-wide table of in-flight calls.
#[derive(Default)]
pub struct CallRegistry {
    entries: DashMap<CallSiteId, Registered>,
}

impl CallRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish that `call_site` is about to block on `socket`.
    ///
    /// # Errors
    ///
    /// - [`NanoshimError::Canceled`] if `socket` was zombified
    /// - [`NanoshimError::InvalidHandle`] if `socket` is closed
    /// - [`NanoshimError::InvalidArgument`] if `call_site` already has a
    ///   call in flight
    pub fn register(&self, call_site: CallSiteId, socket: &Socket) -> Result<CallGuard<'_>> {
        match socket.state() {
            SocketState::Bound => {}
            SocketState::Zombie => return Err(NanoshimError::Canceled),
            SocketState::Closing | SocketState::Closed => return Err(NanoshimError::InvalidHandle),
        }
        match self.entries.entry(call_site) {
            Entry::Occupied(_) => Err(NanoshimError::invalid_argument(format!(
                "{call_site} already has a call in flight"
            ))),
            Entry::Vacant(vacant) => {
                let registration = CallRegistration {
                    call_site,
                    socket: socket.id(),
                    thread: thread::current().id(),
                    since: Instant::now(),
                };
                vacant.insert(Registered {
                    registration,
                    socket: socket.clone(),
                });
                trace!(%call_site, socket = %socket.id(), "call registered");
                Ok(CallGuard {
                    registry: self,
                    call_site,
                })
            }
        }
    }

    /// Run `op` against `socket` with `call_site` registered for its whole
    /// duration.
    ///
    /// # Errors
    ///
    /// Registration errors, then whatever `op` returns.
    pub fn guarded<T>(
        &self,
        call_site: CallSiteId,
        socket: &Socket,
        op: impl FnOnce(&Socket) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.register(call_site, socket)?;
        op(socket)
    }

    /// Interrupt whatever `call_site` is blocked on.
    ///
    /// Never fails for an unknown or already-finished call-site.
    ///
    /// # Errors
    ///
    /// Only unexpected transport failures while zombifying are reported.
    pub fn cancel(&self, call_site: CallSiteId) -> Result<()> {
        let Some(entry) = self.entries.get(&call_site) else {
            trace!(%call_site, "nothing to cancel");
            return Ok(());
        };
        debug!(
            %call_site,
            socket = %entry.registration.socket,
            blocked_for = ?entry.registration.since.elapsed(),
            "canceling call"
        );
        entry.socket.zombify()
    }

    #[must_use]
    pub fn is_registered(&self, call_site: CallSiteId) -> bool {
        self.entries.contains_key(&call_site)
    }

    #[must_use]
    pub fn registration(&self, call_site: CallSiteId) -> Option<CallRegistration> {
        self.entries
            .get(&call_site)
            .map(|entry| entry.registration.clone())
    }

    /// All current registrations, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CallRegistration> {
        self.entries
            .iter()
            .map(|entry| entry.registration.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn deregister(&self, call_site: CallSiteId) {
        if self.entries.remove(&call_site).is_some() {
            trace!(%call_site, "call deregistered");
        }
    }
}

impl fmt::Debug for CallRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallRegistry")
            .field("in_flight", &self.entries.len())
            .finish()
    }
}

/// Scoped registration; withdrawn on drop.
#[must_use = "the registration is withdrawn as soon as the guard is dropped"]
pub struct CallGuard<'a> {
    registry: &'a CallRegistry,
    call_site: CallSiteId,
}

impl CallGuard<'_> {
    #[must_use]
    pub fn call_site(&self) -> CallSiteId {
        self.call_site
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.registry.deregister(self.call_site);
    }
}
