//! Background receive loops.
//!
//! A [`ReceiveLoop`] owns one worker thread that receives from a socket and
//! forwards each message into an [`EventSink`] until it is stopped.
//!
//! ```text
//! Created ──start──▶ Running ──stop()──▶ StopRequested ──join──▶ Stopped
//! ```
//!
//! Worker exit policy:
//! - `Canceled` from the socket (the loop was stopped, or someone zombified
//!   the socket): exit quietly, no event.
//! - Any other receive error: push [`ReceiveEvent::Failed`] as the last
//!   event and exit. The loop never retries.
//! - Sink reports its consumer gone: exit.
//!
//! Backpressure: [`ReceiveLoop::unbounded`] pairs the loop with an unbounded
//! queue, so an idle consumer lets memory grow without limit. A bounded
//! `flume::Sender` may be supplied instead; a full queue then stalls the
//! worker, which re-checks its stop flag every `sink_poll_interval`.

use flume::{Receiver, SendTimeoutError, Sender};
use nanoshim_core::buffer::MessageBuffer;
use nanoshim_core::config::DEFAULT_SINK_POLL_INTERVAL;
use nanoshim_core::errno::Errno;
use nanoshim_core::error::{NanoshimError, Result};
use nanoshim_core::socket::Socket;
use nanoshim_core::transport::Flags;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// What a receive loop delivers.
#[derive(Debug)]
pub enum ReceiveEvent {
    Message(MessageBuffer),
    /// Terminal: the loop exits right after delivering this.
    Failed(NanoshimError),
}

/// Receive loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Created,
    Running,
    StopRequested,
    Stopped,
}

/// Single-consumer destination for received messages.
pub trait EventSink: Send + 'static {
    /// Deliver one event. Returns `false` once the consumer is gone or the
    /// loop is stopping and the event could not be delivered.
    fn deliver(&mut self, event: ReceiveEvent, ctl: &LoopControl) -> bool;
}

impl EventSink for Sender<ReceiveEvent> {
    fn deliver(&mut self, event: ReceiveEvent, ctl: &LoopControl) -> bool {
        let mut event = event;
        loop {
            match self.send_timeout(event, ctl.poll_interval()) {
                Ok(()) => return true,
                Err(SendTimeoutError::Disconnected(_)) => return false,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if ctl.is_stopping() {
                        return false;
                    }
                    event = pending;
                }
            }
        }
    }
}

/// Callback sink; see [`callback`].
pub struct CallbackSink<F>(F);

/// Sink that hands every event to `f`. Returning `false` stops the loop.
pub fn callback<F>(f: F) -> CallbackSink<F>
where
    F: FnMut(ReceiveEvent) -> bool + Send + 'static,
{
    CallbackSink(f)
}

impl<F> EventSink for CallbackSink<F>
where
    F: FnMut(ReceiveEvent) -> bool + Send + 'static,
{
    fn deliver(&mut self, event: ReceiveEvent, _ctl: &LoopControl) -> bool {
        (self.0)(event)
    }
}

/// State shared between a loop handle and its worker.
#[derive(Debug)]
pub struct LoopControl {
    stopping: AtomicBool,
    state: Mutex<LoopState>,
    poll_interval: Duration,
}

impl LoopControl {
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn set_state(&self, state: LoopState) {
        *self.state.lock() = state;
    }
}

/// Receive loop configuration
#[derive(Debug, Clone)]
pub struct ReceiveLoopConfig {
    /// Worker thread name prefix; the socket index is appended.
    pub thread_name: String,
    /// How long a full sink may stall the worker between stop-flag checks.
    pub sink_poll_interval: Duration,
}

impl Default for ReceiveLoopConfig {
    fn default() -> Self {
        Self {
            thread_name: "nanoshim-rx".to_string(),
            sink_poll_interval: DEFAULT_SINK_POLL_INTERVAL,
        }
    }
}

/// Entry points for starting receive loops.
pub struct ReceiveLoop;

impl ReceiveLoop {
    /// Start a loop on `socket` feeding `sink`.
    ///
    /// # Errors
    ///
    /// [`NanoshimError::InvalidHandle`] if the socket is not bound;
    /// `Transport(EAGAIN)` if the worker thread cannot be spawned.
    pub fn start<S: EventSink>(socket: Socket, sink: S) -> Result<ReceiveLoopHandle> {
        Self::start_with(socket, sink, ReceiveLoopConfig::default())
    }

    /// Start a loop feeding a fresh unbounded queue.
    ///
    /// # Errors
    ///
    /// As for [`ReceiveLoop::start`].
    pub fn unbounded(socket: Socket) -> Result<(ReceiveLoopHandle, Receiver<ReceiveEvent>)> {
        let (tx, rx) = flume::unbounded();
        let handle = Self::start(socket, tx)?;
        Ok((handle, rx))
    }

    /// Start a loop with explicit configuration.
    ///
    /// # Errors
    ///
    /// As for [`ReceiveLoop::start`].
    pub fn start_with<S: EventSink>(
        socket: Socket,
        sink: S,
        config: ReceiveLoopConfig,
    ) -> Result<ReceiveLoopHandle> {
        if !socket.is_bound() {
            return Err(NanoshimError::InvalidHandle);
        }
        let ctl = Arc::new(LoopControl {
            stopping: AtomicBool::new(false),
            state: Mutex::new(LoopState::Created),
            poll_interval: config.sink_poll_interval,
        });

        let worker = {
            let socket = socket.clone();
            let ctl = Arc::clone(&ctl);
            thread::Builder::new()
                .name(format!("{}-{}", config.thread_name, socket.id().index()))
                .spawn(move || run(&socket, sink, &ctl))
                .map_err(|err| {
                    warn!(error = %err, "failed to spawn receive loop worker");
                    NanoshimError::Transport(Errno::EAGAIN)
                })?
        };
        ctl.set_state(LoopState::Running);
        debug!(socket = %socket.id(), "receive loop started");

        Ok(ReceiveLoopHandle {
            socket,
            worker: Some(worker),
            ctl,
        })
    }
}

fn run<S: EventSink>(socket: &Socket, mut sink: S, ctl: &LoopControl) {
    let mut delivered = 0u64;
    while !ctl.is_stopping() {
        match socket.receive(Flags::NONE) {
            Ok(msg) => {
                if !sink.deliver(ReceiveEvent::Message(msg), ctl) {
                    break;
                }
                delivered += 1;
            }
            Err(err) if err.is_canceled() || ctl.is_stopping() => break,
            Err(err) => {
                warn!(socket = %socket.id(), error = %err, "receive loop failed");
                let _ = sink.deliver(ReceiveEvent::Failed(err), ctl);
                break;
            }
        }
    }
    debug!(socket = %socket.id(), delivered, "receive loop exiting");
}

/// Owner of a running receive loop.
///
/// Dropping a handle that was never stopped stops it.
pub struct ReceiveLoopHandle {
    socket: Socket,
    worker: Option<JoinHandle<()>>,
    ctl: Arc<LoopControl>,
}

impl ReceiveLoopHandle {
    #[must_use]
    pub fn state(&self) -> LoopState {
        *self.ctl.state.lock()
    }

    #[must_use]
    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// True once the worker has exited on its own or been joined.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the worker: raise the stop flag, zombify the socket to unblock
    /// the pending receive, join, then close the socket.
    ///
    /// # Errors
    ///
    /// [`NanoshimError::AlreadyStopped`] on a second call; otherwise the
    /// first error from zombifying or closing the socket. The worker is
    /// joined either way.
    pub fn stop(&mut self) -> Result<()> {
        let worker = self.worker.take().ok_or(NanoshimError::AlreadyStopped)?;
        self.ctl.set_state(LoopState::StopRequested);
        self.ctl.stopping.store(true, Ordering::Release);

        let zombified = self.socket.zombify();
        if worker.join().is_err() {
            warn!(socket = %self.socket.id(), "receive loop worker panicked");
        }
        let closed = self.socket.close();

        self.ctl.set_state(LoopState::Stopped);
        debug!(socket = %self.socket.id(), "receive loop stopped");
        zombified.and(closed)
    }
}

impl Drop for ReceiveLoopHandle {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}

impl std::fmt::Debug for ReceiveLoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiveLoopHandle")
            .field("socket", &self.socket.id())
            .field("state", &self.state())
            .finish()
    }
}
