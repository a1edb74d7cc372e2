//! Live call-site accounting with a last-release socket sweep.
//!
//! Every host instance acquires on creation and releases on disposal. When
//! the count returns to zero the ledger closes every slot in the transport's
//! socket table, ignoring individual failures. This is a best-effort safety
//! net for sockets nobody closed, not a replacement for closing them.

use nanoshim_core::transport::Transport;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct ResourceLedger {
    live: Mutex<i64>,
    transport: Arc<dyn Transport>,
}

impl ResourceLedger {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            live: Mutex::new(0),
            transport,
        }
    }

    /// Count one more live call-site; returns the new count.
    pub fn acquire(&self) -> i64 {
        let mut live = self.live.lock();
        *live += 1;
        trace!(live = *live, "ledger acquire");
        *live
    }

    /// Count one fewer live call-site; returns the new count.
    ///
    /// The count never drops below zero. Reaching zero sweeps the socket
    /// table before returning; acquires made meanwhile wait for the sweep.
    pub fn release(&self) -> i64 {
        self.release_with(|| {})
    }

    /// As [`ResourceLedger::release`], running `on_last` just before the
    /// sweep. Both run under the ledger lock, so no acquire can interleave
    /// with them.
    pub fn release_with(&self, on_last: impl FnOnce()) -> i64 {
        let mut live = self.live.lock();
        *live = (*live - 1).max(0);
        trace!(live = *live, "ledger release");
        if *live == 0 {
            on_last();
            self.sweep();
        }
        *live
    }

    /// Current count.
    #[must_use]
    pub fn live(&self) -> i64 {
        *self.live.lock()
    }

    /// Close every occupied slot. Returns how many were closed.
    ///
    /// Idempotent, and harmless with no sockets open.
    pub fn sweep(&self) -> usize {
        let closed = (0..self.transport.max_sockets())
            .filter(|&index| self.transport.close_slot(index).is_ok())
            .count();
        debug!(closed, "ledger swept socket table");
        closed
    }
}

impl fmt::Debug for ResourceLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceLedger")
            .field("live", &self.live())
            .finish_non_exhaustive()
    }
}
