//! In-process transport for messaging between sockets in the same process.
//!
//! [`InprocFabric`] implements the [`Transport`] contract over a fixed-size
//! socket table. Sockets are paired through `inproc://name` endpoints: one
//! side binds the name, the other connects to it, after which each side's
//! sends land in the other's receive queue.
//!
//! # Features
//!
//! - **Zero-copy**: payloads move through channels as `Bytes`
//! - **Cancelable**: every blocking wait also watches a per-socket
//!   termination channel, so `zombify`/`close` from any thread wakes it
//! - **Generation-tagged**: a reused slot rejects handles from earlier
//!   occupants with `EBADF`
//!
//! # Usage
//!
//! ```rust
//! use nanoshim_core::inproc::InprocFabric;
//! use nanoshim_core::options::SocketOptions;
//! use nanoshim_core::transport::{Flags, Transport};
//! use nanoshim_core::buffer::MessageBuffer;
//!
//! let fabric = InprocFabric::default();
//! let server = fabric.socket(SocketOptions::default()).unwrap();
//! let client = fabric.socket(SocketOptions::default()).unwrap();
//! fabric.bind(server, "inproc://doc-example").unwrap();
//! fabric.connect(client, "inproc://doc-example").unwrap();
//!
//! fabric.send(client, MessageBuffer::from_static(b"ping"), Flags::NONE).unwrap();
//! let msg = fabric.recv(server, Flags::NONE).unwrap();
//! assert_eq!(msg.as_slice(), b"ping");
//! ```

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flume::{Receiver, Selector, Sender, TryRecvError, TrySendError};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::buffer::MessageBuffer;
use crate::config::FabricConfig;
use crate::endpoint::Endpoint;
use crate::errno::Errno;
use crate::options::SocketOptions;
use crate::transport::{Flags, SocketId, Transport};

/// Process-wide fabric, created on first use.
static GLOBAL_FABRIC: Lazy<Arc<InprocFabric>> =
    Lazy::new(|| Arc::new(InprocFabric::new(FabricConfig::default())));

/// In-process socket table.
pub struct InprocFabric {
    slots: Box<[Mutex<Slot>]>,
    endpoints: DashMap<String, SocketId>,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    core: Option<Arc<SocketCore>>,
}

struct SocketCore {
    id: SocketId,
    options: SocketOptions,
    inbound_tx: Sender<Bytes>,
    inbound_rx: Receiver<Bytes>,
    /// Sender into the peer's receive queue.
    peer: Mutex<Option<Sender<Bytes>>>,
    /// Ticks whenever a peer attaches.
    linked_tx: Sender<()>,
    linked_rx: Receiver<()>,
    /// Dropped on zombify; its receiver then reports disconnection forever.
    term_tx: Mutex<Option<Sender<()>>>,
    term_rx: Receiver<()>,
    zombie: AtomicBool,
    bound: Mutex<Vec<String>>,
}

impl SocketCore {
    fn new(id: SocketId, options: SocketOptions) -> Self {
        let (inbound_tx, inbound_rx) = if options.recv_hwm == 0 {
            flume::unbounded()
        } else {
            flume::bounded(options.recv_hwm)
        };
        let (linked_tx, linked_rx) = flume::bounded(1);
        let (term_tx, term_rx) = flume::bounded(1);
        Self {
            id,
            options,
            inbound_tx,
            inbound_rx,
            peer: Mutex::new(None),
            linked_tx,
            linked_rx,
            term_tx: Mutex::new(Some(term_tx)),
            term_rx,
            zombie: AtomicBool::new(false),
            bound: Mutex::new(Vec::new()),
        }
    }

    fn is_zombie(&self) -> bool {
        self.zombie.load(Ordering::Acquire)
    }

    fn zombify(&self) {
        self.zombie.store(true, Ordering::Release);
        if self.term_tx.lock().take().is_some() {
            debug!(socket = %self.id, "inproc socket zombified");
        }
    }

    fn live_peer(&self) -> Option<Sender<Bytes>> {
        self.peer
            .lock()
            .as_ref()
            .filter(|tx| !tx.is_disconnected())
            .cloned()
    }

    fn send(&self, payload: Bytes, flags: Flags) -> Result<(), Errno> {
        if self.is_zombie() {
            return Err(Errno::ETERM);
        }
        if let Some(max) = self.options.max_msg_size {
            if payload.len() > max {
                return Err(Errno::EMSGSIZE);
            }
        }

        let nonblocking = flags.contains(Flags::DONTWAIT) || self.options.is_send_nonblocking();
        let deadline = deadline_for(self.options.send_timeout);

        let tx = loop {
            if let Some(tx) = self.live_peer() {
                break tx;
            }
            if nonblocking {
                return Err(Errno::EAGAIN);
            }
            let sel = Selector::new()
                .recv(&self.linked_rx, |_| Ok(()))
                .recv(&self.term_rx, |_| Err(Errno::ETERM));
            wait(sel, deadline)?;
        };

        match tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(Errno::ECONNRESET),
            Err(TrySendError::Full(_)) if nonblocking => Err(Errno::EAGAIN),
            Err(TrySendError::Full(payload)) => {
                trace!(socket = %self.id, "peer queue full, blocking send");
                let sel = Selector::new()
                    .send(&tx, payload, |res| res.map_err(|_| Errno::ECONNRESET))
                    .recv(&self.term_rx, |_| Err(Errno::ETERM));
                wait(sel, deadline)
            }
        }
    }

    fn recv(&self, flags: Flags) -> Result<Bytes, Errno> {
        if self.is_zombie() {
            return Err(Errno::ETERM);
        }
        match self.inbound_rx.try_recv() {
            Ok(payload) => return Ok(payload),
            Err(TryRecvError::Disconnected) => return Err(Errno::ECONNRESET),
            Err(TryRecvError::Empty) => {}
        }
        if flags.contains(Flags::DONTWAIT) || self.options.is_recv_nonblocking() {
            return Err(Errno::EAGAIN);
        }

        let sel = Selector::new()
            .recv(&self.inbound_rx, |res| res.map_err(|_| Errno::ECONNRESET))
            .recv(&self.term_rx, |_| Err(Errno::ETERM));
        wait(sel, deadline_for(self.options.recv_timeout))
    }
}

fn deadline_for(timeout: Option<Duration>) -> Option<Instant> {
    timeout
        .filter(|t| !t.is_zero())
        .map(|t| Instant::now() + t)
}

fn wait<T>(sel: Selector<'_, Result<T, Errno>>, deadline: Option<Instant>) -> Result<T, Errno> {
    match deadline {
        None => sel.wait(),
        Some(deadline) => sel
            .wait_deadline(deadline)
            .unwrap_or(Err(Errno::ETIMEDOUT)),
    }
}

impl Default for InprocFabric {
    fn default() -> Self {
        Self::new(FabricConfig::default())
    }
}

impl InprocFabric {
    #[must_use]
    pub fn new(config: FabricConfig) -> Self {
        let slots = (0..config.max_sockets)
            .map(|_| Mutex::new(Slot::default()))
            .collect();
        Self {
            slots,
            endpoints: DashMap::new(),
        }
    }

    /// The process-wide fabric.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL_FABRIC)
    }

    /// Open a socket in the first free slot.
    ///
    /// # Errors
    ///
    /// `EMFILE` if every slot is taken.
    pub fn socket(&self, options: SocketOptions) -> Result<SocketId, Errno> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut slot = slot.lock();
            if slot.core.is_some() {
                continue;
            }
            slot.generation = slot.generation.wrapping_add(1);
            let id = SocketId::new(index as u32, slot.generation);
            slot.core = Some(Arc::new(SocketCore::new(id, options)));
            debug!(socket = %id, "inproc socket opened");
            return Ok(id);
        }
        Err(Errno::EMFILE)
    }

    /// Bind `id` to an `inproc://` endpoint.
    ///
    /// # Errors
    ///
    /// - `EINVAL` for a malformed endpoint
    /// - `EPROTONOSUPPORT` for `tcp://` and `ipc://`
    /// - `EADDRINUSE` if the name is taken
    pub fn bind(&self, id: SocketId, endpoint: &str) -> Result<(), Errno> {
        let core = self.core(id)?;
        if core.is_zombie() {
            return Err(Errno::ETERM);
        }
        let name = inproc_name(endpoint)?;
        match self.endpoints.entry(name.clone()) {
            Entry::Occupied(_) => Err(Errno::EADDRINUSE),
            Entry::Vacant(vacant) => {
                vacant.insert(id);
                core.bound.lock().push(name);
                debug!(socket = %id, endpoint, "inproc endpoint bound");
                Ok(())
            }
        }
    }

    /// Pair `id` with the socket bound at `endpoint`.
    ///
    /// # Errors
    ///
    /// - `ECONNREFUSED` if nothing is bound there
    /// - `EISCONN` if either side already has a live peer
    pub fn connect(&self, id: SocketId, endpoint: &str) -> Result<(), Errno> {
        let core = self.core(id)?;
        if core.is_zombie() {
            return Err(Errno::ETERM);
        }
        let name = inproc_name(endpoint)?;
        let target = self
            .endpoints
            .get(&name)
            .map(|entry| *entry.value())
            .ok_or(Errno::ECONNREFUSED)?;
        if target == id {
            return Err(Errno::EINVAL);
        }
        let target = self.core(target).map_err(|_| Errno::ECONNREFUSED)?;
        link(&core, &target)?;
        debug!(socket = %id, peer = %target.id, endpoint, "inproc sockets paired");
        Ok(())
    }

    /// Names of all bound endpoints (without the `inproc://` prefix).
    pub fn endpoints(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of occupied slots.
    pub fn live_sockets(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.lock().core.is_some())
            .count()
    }

    fn core(&self, id: SocketId) -> Result<Arc<SocketCore>, Errno> {
        let slot = self.slots.get(id.index() as usize).ok_or(Errno::EBADF)?;
        let slot = slot.lock();
        match &slot.core {
            Some(core) if slot.generation == id.generation() => Ok(Arc::clone(core)),
            _ => Err(Errno::EBADF),
        }
    }

    fn dispose(&self, core: Arc<SocketCore>) {
        core.zombify();
        core.peer.lock().take();
        for name in core.bound.lock().drain(..) {
            self.endpoints.remove_if(&name, |_, bound| *bound == core.id);
        }
        debug!(socket = %core.id, "inproc socket closed");
    }
}

fn inproc_name(endpoint: &str) -> Result<String, Errno> {
    match Endpoint::parse(endpoint)? {
        Endpoint::Inproc(name) => Ok(name),
        _ => Err(Errno::EPROTONOSUPPORT),
    }
}

fn link(a: &SocketCore, b: &SocketCore) -> Result<(), Errno> {
    // Lock in index order so concurrent connects cannot deadlock.
    let (first, second) = if a.id < b.id { (a, b) } else { (b, a) };
    {
        let mut first_peer = first.peer.lock();
        let mut second_peer = second.peer.lock();
        let busy = |peer: &Option<Sender<Bytes>>| {
            peer.as_ref().is_some_and(|tx| !tx.is_disconnected())
        };
        if busy(&first_peer) || busy(&second_peer) {
            return Err(Errno::EISCONN);
        }
        *first_peer = Some(second.inbound_tx.clone());
        *second_peer = Some(first.inbound_tx.clone());
    }
    let _ = first.linked_tx.try_send(());
    let _ = second.linked_tx.try_send(());
    Ok(())
}

impl Transport for InprocFabric {
    fn send(&self, id: SocketId, msg: MessageBuffer, flags: Flags) -> Result<(), Errno> {
        let core = self.core(id)?;
        let len = msg.len();
        core.send(msg.into_bytes(), flags)?;
        trace!(socket = %id, len, "inproc send");
        Ok(())
    }

    fn recv(&self, id: SocketId, flags: Flags) -> Result<MessageBuffer, Errno> {
        let core = self.core(id)?;
        let payload = core.recv(flags)?;
        trace!(socket = %id, len = payload.len(), "inproc recv");
        Ok(MessageBuffer::from_bytes(payload))
    }

    fn zombify(&self, id: SocketId) -> Result<(), Errno> {
        self.core(id)?.zombify();
        Ok(())
    }

    fn close(&self, id: SocketId) -> Result<(), Errno> {
        let slot = self.slots.get(id.index() as usize).ok_or(Errno::EBADF)?;
        let core = {
            let mut slot = slot.lock();
            if slot.generation != id.generation() {
                return Err(Errno::EBADF);
            }
            slot.core.take().ok_or(Errno::EBADF)?
        };
        self.dispose(core);
        Ok(())
    }

    fn close_slot(&self, index: u32) -> Result<(), Errno> {
        let slot = self.slots.get(index as usize).ok_or(Errno::EBADF)?;
        let core = slot.lock().core.take().ok_or(Errno::EBADF)?;
        self.dispose(core);
        Ok(())
    }

    fn is_live(&self, id: SocketId) -> bool {
        self.core(id).is_ok()
    }

    fn max_sockets(&self) -> u32 {
        self.slots.len() as u32
    }
}
