//! Owned view of one transport socket.
//!
//! A [`Socket`] pairs a [`Transport`] with a generation-tagged [`SocketId`]
//! and tracks the socket's lifecycle on this side of the transport. Clones
//! share that state: any clone may send, receive, zombify or close, and
//! those operations may race from different threads.
//!
//! Closing follows two phases. [`Socket::zombify`] is the soft close: every
//! call blocked on the socket returns [`NanoshimError::Canceled`] and the
//! transport slot stays allocated. [`Socket::close`] is the hard close; when
//! calls are still in flight it zombifies instead and the last call to leave
//! releases the slot.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::buffer::MessageBuffer;
use crate::errno::Errno;
use crate::error::{NanoshimError, Result};
use crate::transport::{Flags, SocketId, Transport};

/// Socket lifecycle as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// Open and usable.
    Bound,
    /// Soft-closed: calls fail with `Canceled`, slot still allocated.
    Zombie,
    /// Close requested while calls were in flight; slot released when the
    /// last one returns.
    Closing,
    /// Slot released.
    Closed,
}

struct Lifecycle {
    state: SocketState,
    in_flight: usize,
}

struct SocketInner {
    transport: Arc<dyn Transport>,
    id: SocketId,
    lifecycle: Mutex<Lifecycle>,
}

/// A message socket bound to a transport handle.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketInner>,
}

impl Socket {
    /// Wrap an already-open transport handle.
    ///
    /// # Errors
    ///
    /// [`NanoshimError::InvalidHandle`] if `id` is the unbound sentinel or
    /// does not name a live socket in `transport`.
    pub fn bind(transport: Arc<dyn Transport>, id: SocketId) -> Result<Self> {
        if !id.is_valid() || !transport.is_live(id) {
            return Err(NanoshimError::InvalidHandle);
        }
        debug!(socket = %id, "socket bound");
        Ok(Self {
            inner: Arc::new(SocketInner {
                transport,
                id,
                lifecycle: Mutex::new(Lifecycle {
                    state: SocketState::Bound,
                    in_flight: 0,
                }),
            }),
        })
    }

    #[must_use]
    pub fn id(&self) -> SocketId {
        self.inner.id
    }

    #[must_use]
    pub fn state(&self) -> SocketState {
        self.inner.lifecycle.lock().state
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.state() == SocketState::Bound
    }

    /// Number of send/receive calls currently inside the transport.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.lifecycle.lock().in_flight
    }

    /// True if both handles refer to the same underlying socket.
    #[must_use]
    pub fn same_socket(&self, other: &Socket) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Hand `msg` to the transport.
    ///
    /// The transport owns `msg` once this is called, whatever the outcome;
    /// a failed send drops it.
    ///
    /// # Errors
    ///
    /// - [`NanoshimError::InvalidArgument`] for an empty message; the
    ///   transport is not touched
    /// - [`NanoshimError::InvalidHandle`] once the socket is closed
    /// - [`NanoshimError::Canceled`] if the socket was zombified
    pub fn send(&self, msg: MessageBuffer, flags: Flags) -> Result<()> {
        if msg.is_empty() {
            return Err(NanoshimError::invalid_argument("cannot send an empty message"));
        }
        let _call = self.enter()?;
        let len = msg.len();
        self.inner
            .transport
            .send(self.inner.id, msg, flags)
            .map_err(|code| self.transport_error("send", code))?;
        trace!(socket = %self.inner.id, len, "message sent");
        Ok(())
    }

    /// Take the next message from the transport, blocking unless `flags`
    /// says otherwise.
    ///
    /// # Errors
    ///
    /// [`NanoshimError::Canceled`] when the socket is zombified or closed
    /// under the call; other failures as for [`Socket::send`].
    pub fn receive(&self, flags: Flags) -> Result<MessageBuffer> {
        let _call = self.enter()?;
        let msg = self
            .inner
            .transport
            .recv(self.inner.id, flags)
            .map_err(|code| self.transport_error("receive", code))?;
        trace!(socket = %self.inner.id, len = msg.len(), "message received");
        Ok(msg)
    }

    /// Soft close. Unblocks every call parked on this socket without
    /// releasing the transport slot. Idempotent, and a no-op once closed.
    ///
    /// # Errors
    ///
    /// Only unexpected transport failures are reported; a slot that was
    /// already released elsewhere is not an error.
    pub fn zombify(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state != SocketState::Bound {
            return Ok(());
        }
        match self.inner.transport.zombify(self.inner.id) {
            Ok(()) => {
                lifecycle.state = SocketState::Zombie;
                debug!(socket = %self.inner.id, "socket zombified");
                Ok(())
            }
            Err(Errno::EBADF) => {
                lifecycle.state = SocketState::Closed;
                debug!(socket = %self.inner.id, "socket already released by transport");
                Ok(())
            }
            Err(code) => Err(NanoshimError::from(code)),
        }
    }

    /// Hard close. Idempotent: closing a closed socket succeeds.
    ///
    /// With calls in flight the socket is zombified and the slot is
    /// released when the last call returns.
    ///
    /// # Errors
    ///
    /// Only unexpected transport failures are reported.
    pub fn close(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state {
            SocketState::Closed | SocketState::Closing => Ok(()),
            _ if lifecycle.in_flight > 0 => {
                if let Err(code) = self.inner.transport.zombify(self.inner.id) {
                    if code != Errno::EBADF {
                        return Err(NanoshimError::from(code));
                    }
                }
                lifecycle.state = SocketState::Closing;
                debug!(
                    socket = %self.inner.id,
                    in_flight = lifecycle.in_flight,
                    "socket close deferred until calls return"
                );
                Ok(())
            }
            _ => {
                lifecycle.state = SocketState::Closed;
                self.inner.release()
            }
        }
    }

    fn enter(&self) -> Result<InFlight<'_>> {
        let mut lifecycle = self.inner.lifecycle.lock();
        match lifecycle.state {
            SocketState::Closed | SocketState::Closing => Err(NanoshimError::InvalidHandle),
            SocketState::Bound | SocketState::Zombie => {
                lifecycle.in_flight += 1;
                Ok(InFlight { inner: &self.inner })
            }
        }
    }

    fn transport_error(&self, op: &'static str, code: Errno) -> NanoshimError {
        let err = NanoshimError::from(code);
        if err.is_canceled() {
            debug!(socket = %self.inner.id, op, "call canceled");
        } else {
            trace!(socket = %self.inner.id, op, %code, "transport call failed");
        }
        err
    }
}

impl SocketInner {
    fn release(&self) -> Result<()> {
        match self.transport.close(self.id) {
            Ok(()) => {
                debug!(socket = %self.id, "socket closed");
                Ok(())
            }
            // Already released, e.g. by a ledger sweep.
            Err(Errno::EBADF) => Ok(()),
            Err(code) => Err(NanoshimError::from(code)),
        }
    }
}

/// Marks one call as inside the transport.
struct InFlight<'a> {
    inner: &'a SocketInner,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        lifecycle.in_flight -= 1;
        if lifecycle.in_flight == 0 && lifecycle.state == SocketState::Closing {
            lifecycle.state = SocketState::Closed;
            if let Err(err) = self.inner.release() {
                warn!(socket = %self.inner.id, error = %err, "deferred close failed");
            }
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.inner.lifecycle.lock();
        f.debug_struct("Socket")
            .field("id", &self.inner.id)
            .field("state", &lifecycle.state)
            .field("in_flight", &lifecycle.in_flight)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inproc::InprocFabric;
    use crate::options::SocketOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    /// Transport that counts calls and refuses everything.
    #[derive(Default)]
    struct Refusing {
        sends: AtomicUsize,
    }

    impl Transport for Refusing {
        fn send(&self, _: SocketId, _msg: MessageBuffer, _: Flags) -> std::result::Result<(), Errno> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Err(Errno::ECONNRESET)
        }
        fn recv(&self, _: SocketId, _: Flags) -> std::result::Result<MessageBuffer, Errno> {
            Err(Errno::EINTR)
        }
        fn zombify(&self, _: SocketId) -> std::result::Result<(), Errno> {
            Ok(())
        }
        fn close(&self, _: SocketId) -> std::result::Result<(), Errno> {
            Ok(())
        }
        fn close_slot(&self, _: u32) -> std::result::Result<(), Errno> {
            Ok(())
        }
        fn is_live(&self, id: SocketId) -> bool {
            id.is_valid()
        }
        fn max_sockets(&self) -> u32 {
            1
        }
    }

    fn open(fabric: &Arc<InprocFabric>) -> Socket {
        let id = fabric.socket(SocketOptions::default()).unwrap();
        Socket::bind(Arc::clone(fabric) as Arc<dyn Transport>, id).unwrap()
    }

    #[test]
    fn test_bind_rejects_invalid_handles() {
        let fabric: Arc<dyn Transport> = Arc::new(InprocFabric::default());
        assert_eq!(
            Socket::bind(Arc::clone(&fabric), SocketId::INVALID).unwrap_err(),
            NanoshimError::InvalidHandle
        );
        assert_eq!(
            Socket::bind(fabric, SocketId::new(0, 99)).unwrap_err(),
            NanoshimError::InvalidHandle
        );
    }

    #[test]
    fn test_empty_send_never_reaches_transport() {
        let transport = Arc::new(Refusing::default());
        let socket = Socket::bind(Arc::clone(&transport) as Arc<dyn Transport>, SocketId::new(0, 1)).unwrap();
        let err = socket.send(MessageBuffer::from_static(b""), Flags::NONE).unwrap_err();
        assert!(matches!(err, NanoshimError::InvalidArgument(_)));
        assert_eq!(transport.sends.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_send_consumes_buffer() {
        let transport = Arc::new(Refusing::default());
        let socket = Socket::bind(Arc::clone(&transport) as Arc<dyn Transport>, SocketId::new(0, 1)).unwrap();
        let err = socket.send(MessageBuffer::from_static(b"lost"), Flags::NONE).unwrap_err();
        assert_eq!(err, NanoshimError::Transport(Errno::ECONNRESET));
        assert_eq!(transport.sends.load(Ordering::SeqCst), 1);
        assert_eq!(socket.in_flight(), 0);
    }

    #[test]
    fn test_interrupt_maps_to_canceled() {
        let transport: Arc<dyn Transport> = Arc::new(Refusing::default());
        let socket = Socket::bind(transport, SocketId::new(0, 1)).unwrap();
        assert!(socket.receive(Flags::NONE).unwrap_err().is_canceled());
    }

    #[test]
    fn test_close_is_idempotent() {
        let fabric = Arc::new(InprocFabric::default());
        let socket = open(&fabric);
        socket.close().unwrap();
        socket.close().unwrap();
        assert_eq!(socket.state(), SocketState::Closed);
        assert_eq!(
            socket.receive(Flags::DONTWAIT).unwrap_err(),
            NanoshimError::InvalidHandle
        );
        assert_eq!(fabric.live_sockets(), 0);
    }

    #[test]
    fn test_zombify_then_close() {
        let fabric = Arc::new(InprocFabric::default());
        let socket = open(&fabric);
        socket.zombify().unwrap();
        socket.zombify().unwrap();
        assert_eq!(socket.state(), SocketState::Zombie);
        assert!(socket.receive(Flags::DONTWAIT).unwrap_err().is_canceled());
        assert_eq!(fabric.live_sockets(), 1);

        socket.close().unwrap();
        assert_eq!(fabric.live_sockets(), 0);
    }

    #[test]
    fn test_close_with_call_in_flight_is_deferred() {
        let fabric = Arc::new(InprocFabric::default());
        let socket = open(&fabric);

        let worker = {
            let socket = socket.clone();
            thread::spawn(move || socket.receive(Flags::NONE))
        };
        while socket.in_flight() == 0 {
            thread::sleep(Duration::from_millis(1));
        }

        socket.close().unwrap();
        assert!(worker.join().unwrap().unwrap_err().is_canceled());
        assert_eq!(socket.state(), SocketState::Closed);
        assert_eq!(fabric.live_sockets(), 0);
    }

    /// Transport whose receives park until woken and whose close fails.
    struct StuckClose {
        wake_rx: flume::Receiver<()>,
        closes: AtomicUsize,
    }

    impl Transport for StuckClose {
        fn send(&self, _: SocketId, _msg: MessageBuffer, _: Flags) -> std::result::Result<(), Errno> {
            Ok(())
        }
        fn recv(&self, _: SocketId, _: Flags) -> std::result::Result<MessageBuffer, Errno> {
            let _ = self.wake_rx.recv();
            Err(Errno::ETERM)
        }
        fn zombify(&self, _: SocketId) -> std::result::Result<(), Errno> {
            Ok(())
        }
        fn close(&self, _: SocketId) -> std::result::Result<(), Errno> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(Errno::ECONNRESET)
        }
        fn close_slot(&self, _: u32) -> std::result::Result<(), Errno> {
            Ok(())
        }
        fn is_live(&self, id: SocketId) -> bool {
            id.is_valid()
        }
        fn max_sockets(&self) -> u32 {
            1
        }
    }

    #[test]
    fn test_deferred_close_failure_still_closes() {
        let (wake_tx, wake_rx) = flume::unbounded();
        let transport = Arc::new(StuckClose {
            wake_rx,
            closes: AtomicUsize::new(0),
        });
        let socket = Socket::bind(Arc::clone(&transport) as Arc<dyn Transport>, SocketId::new(0, 1)).unwrap();

        let worker = {
            let socket = socket.clone();
            thread::spawn(move || socket.receive(Flags::NONE))
        };
        while socket.in_flight() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        socket.close().unwrap();
        assert_eq!(socket.state(), SocketState::Closing);

        wake_tx.send(()).unwrap();
        assert!(worker.join().unwrap().unwrap_err().is_canceled());
        assert_eq!(socket.state(), SocketState::Closed);
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
        socket.close().unwrap();
    }

    #[test]
    fn test_externally_released_slot() {
        let fabric = Arc::new(InprocFabric::default());
        let socket = open(&fabric);
        fabric.close(socket.id()).unwrap();

        assert_eq!(
            socket.receive(Flags::DONTWAIT).unwrap_err(),
            NanoshimError::InvalidHandle
        );
        socket.zombify().unwrap();
        socket.close().unwrap();
    }
}
