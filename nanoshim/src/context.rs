//! Process-wide shim state.
//!
//! A [`Context`] ties together the transport, the table of attached sockets,
//! the call registry and the resource ledger. Hosts normally use
//! [`Context::global`], which is created on first use over the global
//! in-process fabric. Tests build isolated contexts with [`Context::new`].

use dashmap::DashMap;
use nanoshim_core::buffer::MessageBuffer;
use nanoshim_core::error::Result;
use nanoshim_core::inproc::InprocFabric;
use nanoshim_core::socket::{Socket, SocketState};
use nanoshim_core::transport::{Flags, SocketId, Transport};
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::call::{CallRegistry, CallSiteId};
use crate::ledger::ResourceLedger;

static GLOBAL_CONTEXT: Lazy<Context> = Lazy::new(|| Context::new(InprocFabric::global()));

pub struct Context {
    transport: Arc<dyn Transport>,
    sockets: DashMap<SocketId, Socket>,
    registry: CallRegistry,
    ledger: ResourceLedger,
}

impl Context {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            ledger: ResourceLedger::new(Arc::clone(&transport)),
            transport,
            sockets: DashMap::new(),
            registry: CallRegistry::new(),
        }
    }

    /// The shared context over [`InprocFabric::global`].
    #[must_use]
    pub fn global() -> &'static Context {
        &GLOBAL_CONTEXT
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    #[must_use]
    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    #[must_use]
    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// The [`Socket`] for a raw transport handle, wrapping it on first use.
    ///
    /// All callers attaching the same handle share one wrapper and so one
    /// lifecycle. A zombified socket keeps its wrapper, and calls on it fail
    /// with `Canceled` until it is detached. A wrapper whose socket was
    /// closed or swept is replaced after re-checking the transport.
    ///
    /// # Errors
    ///
    /// [`InvalidHandle`](nanoshim_core::error::NanoshimError::InvalidHandle)
    /// if `id` is not a live socket.
    pub fn attach(&self, id: SocketId) -> Result<Socket> {
        let stale = match self.sockets.get(&id) {
            Some(socket) if socket.state() != SocketState::Closed && self.transport.is_live(id) => {
                return Ok(socket.clone());
            }
            Some(socket) => Some(socket.clone()),
            None => None,
        };
        if let Some(stale) = stale {
            // Only drop the wrapper we judged stale, never a fresh one
            // another thread installed meanwhile.
            self.sockets
                .remove_if(&id, |_, current| current.same_socket(&stale));
        }
        let socket = Socket::bind(Arc::clone(&self.transport), id)?;
        Ok(self.sockets.entry(id).or_insert(socket).clone())
    }

    /// Forget and close the socket for `id`. Idempotent.
    ///
    /// # Errors
    ///
    /// Unexpected transport failures while closing.
    pub fn detach(&self, id: SocketId) -> Result<()> {
        match self.sockets.remove(&id) {
            Some((_, socket)) => {
                debug!(socket = %id, "socket detached");
                socket.close()
            }
            None => Ok(()),
        }
    }

    /// Number of sockets currently attached.
    #[must_use]
    pub fn attached(&self) -> usize {
        self.sockets.len()
    }

    /// Send on behalf of `call_site`, cancelable through [`Context::cancel`].
    ///
    /// # Errors
    ///
    /// As for [`Socket::send`], plus registration errors.
    pub fn send(
        &self,
        call_site: CallSiteId,
        id: SocketId,
        msg: MessageBuffer,
        flags: Flags,
    ) -> Result<()> {
        let socket = self.attach(id)?;
        self.registry
            .guarded(call_site, &socket, |socket| socket.send(msg, flags))
    }

    /// Receive on behalf of `call_site`, cancelable through
    /// [`Context::cancel`].
    ///
    /// # Errors
    ///
    /// As for [`Socket::receive`], plus registration errors.
    pub fn receive(&self, call_site: CallSiteId, id: SocketId, flags: Flags) -> Result<MessageBuffer> {
        let socket = self.attach(id)?;
        self.registry
            .guarded(call_site, &socket, |socket| socket.receive(flags))
    }

    /// Cancel whatever `call_site` is blocked on. A no-op when it is not
    /// blocked.
    ///
    /// # Errors
    ///
    /// Only unexpected transport failures.
    pub fn cancel(&self, call_site: CallSiteId) -> Result<()> {
        self.registry.cancel(call_site)
    }

    /// Close every socket in the transport and forget all attachments.
    /// Returns how many transport slots were closed.
    pub fn teardown(&self) -> usize {
        self.forget_attached();
        self.ledger.sweep()
    }

    pub(crate) fn forget_attached(&self) {
        self.sockets.clear();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("attached", &self.sockets.len())
            .field("registry", &self.registry)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}
