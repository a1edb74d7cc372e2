//! Host instance adapter.
//!
//! A host embeds the shim through one [`Instance`] per call-site. The host's
//! lifecycle hooks map onto [`Context::on_acquire`], [`Context::on_release`]
//! and [`Context::on_abort`]; data moves through [`Context::send_from_host`]
//! and [`Context::receive_into_host`], copying once between the host's own
//! buffer and a transport-owned [`MessageBuffer`].
//!
//! Hosts that speak integer status codes use the `*_status` variants:
//! `0` on success, the negated errno on failure.
//!
//! ```
//! use nanoshim::prelude::*;
//! use std::sync::Arc;
//!
//! let fabric = Arc::new(InprocFabric::default());
//! let ctx = Context::new(fabric.clone());
//! let server = fabric.socket(SocketOptions::default())?;
//! let client = fabric.socket(SocketOptions::default())?;
//! fabric.bind(server, "inproc://host-doc")?;
//! fabric.connect(client, "inproc://host-doc")?;
//!
//! let sender = ctx.on_acquire();
//! let receiver = ctx.on_acquire();
//! ctx.send_from_host(&sender, client, b"hello", Flags::NONE).unwrap();
//!
//! let mut out = Vec::new();
//! assert_eq!(ctx.receive_status(&receiver, server, &mut out, Flags::NONE), 0);
//! assert_eq!(out, b"hello");
//!
//! ctx.on_release(sender);
//! ctx.on_release(receiver);
//! # Ok::<(), Errno>(())
//! ```

use nanoshim_core::buffer::MessageBuffer;
use nanoshim_core::error::{NanoshimError, Result};
use nanoshim_core::transport::{Flags, SocketId};
use tracing::{debug, warn};

pub use nanoshim_core::buffer::HostBuffer;

use crate::call::CallSiteId;
use crate::context::Context;

/// Per call-site instance data.
#[derive(Debug, PartialEq, Eq)]
pub struct Instance {
    call_site: CallSiteId,
}

impl Instance {
    #[must_use]
    pub fn call_site(&self) -> CallSiteId {
        self.call_site
    }
}

/// Host status code for a result: `0` or the negated errno.
#[must_use]
pub fn status_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(err) => -err.errno().code(),
    }
}

impl Context {
    /// Allocate instance data for a new call-site.
    #[must_use]
    pub fn on_acquire(&self) -> Instance {
        let instance = Instance {
            call_site: CallSiteId::next(),
        };
        let live = self.ledger().acquire();
        debug!(call_site = %instance.call_site, live, "instance acquired");
        instance
    }

    /// Dispose of a call-site's instance data. Returns the remaining live
    /// count; the last release closes every socket in the transport.
    pub fn on_release(&self, instance: Instance) -> i64 {
        if let Err(err) = self.cancel(instance.call_site) {
            warn!(call_site = %instance.call_site, error = %err, "cancel on release failed");
        }
        let live = self.ledger().release_with(|| self.forget_attached());
        debug!(call_site = %instance.call_site, live, "instance released");
        live
    }

    /// Abort whatever the call-site is blocked on. Never fails; a call-site
    /// that is not blocked is left alone.
    pub fn on_abort(&self, instance: &Instance) {
        if let Err(err) = self.cancel(instance.call_site) {
            warn!(call_site = %instance.call_site, error = %err, "abort failed");
        }
    }

    /// Copy `data` into a fresh message and send it on `id`.
    ///
    /// # Errors
    ///
    /// - [`NanoshimError::InvalidArgument`] for empty `data`; nothing is
    ///   allocated or sent
    /// - [`NanoshimError::ResourceExhausted`] if the message cannot be
    ///   allocated
    /// - [`NanoshimError::Canceled`] if the call-site was aborted
    /// - anything [`Context::send`] reports
    pub fn send_from_host(
        &self,
        instance: &Instance,
        id: SocketId,
        data: &[u8],
        flags: Flags,
    ) -> Result<()> {
        if data.is_empty() {
            return Err(NanoshimError::invalid_argument("host buffer is empty"));
        }
        let msg = MessageBuffer::try_copy_from_slice(data)?;
        self.send(instance.call_site, id, msg, flags)
    }

    /// Receive one message on `id` and copy it into `dst`, resizing `dst`
    /// to exactly the payload length. Returns that length.
    ///
    /// The call-site is deregistered before the copy, so an abort arriving
    /// after the message was received cannot disturb it. On failure `dst`
    /// is left untouched.
    ///
    /// # Errors
    ///
    /// Anything [`Context::receive`] reports, or
    /// [`NanoshimError::ResourceExhausted`] if `dst` cannot grow.
    pub fn receive_into_host<H: HostBuffer + ?Sized>(
        &self,
        instance: &Instance,
        id: SocketId,
        dst: &mut H,
        flags: Flags,
    ) -> Result<usize> {
        let msg = self.receive(instance.call_site, id, flags)?;
        msg.copy_into(dst)
    }

    /// [`Context::send_from_host`] as a host status code.
    pub fn send_status(&self, instance: &Instance, id: SocketId, data: &[u8], flags: Flags) -> i32 {
        status_code(&self.send_from_host(instance, id, data, flags))
    }

    /// [`Context::receive_into_host`] as a host status code.
    pub fn receive_status<H: HostBuffer + ?Sized>(
        &self,
        instance: &Instance,
        id: SocketId,
        dst: &mut H,
        flags: Flags,
    ) -> i32 {
        status_code(&self.receive_into_host(instance, id, dst, flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use nanoshim_core::errno::Errno;
    use nanoshim_core::inproc::InprocFabric;
    use nanoshim_core::options::SocketOptions;
    use nanoshim_core::transport::Transport;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn linked(fabric: &Arc<InprocFabric>, name: &str) -> (SocketId, SocketId) {
        let endpoint = format!("inproc://{name}");
        let server = fabric.socket(SocketOptions::default()).unwrap();
        let client = fabric.socket(SocketOptions::default()).unwrap();
        fabric.bind(server, &endpoint).unwrap();
        fabric.connect(client, &endpoint).unwrap();
        (server, client)
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code(&Ok::<(), NanoshimError>(())), 0);
        assert_eq!(status_code::<()>(&Err(NanoshimError::Canceled)), -Errno::ETERM.code());
        assert_eq!(status_code::<()>(&Err(NanoshimError::InvalidHandle)), -9);
        assert_eq!(
            status_code::<()>(&Err(NanoshimError::Transport(Errno::EAGAIN))),
            -11
        );
    }

    #[test]
    fn test_receive_resizes_host_buffer_exactly() {
        let fabric = Arc::new(InprocFabric::default());
        let ctx = Context::new(fabric.clone());
        let (server, client) = linked(&fabric, "host-resize");
        let instance = ctx.on_acquire();

        let mut grow: Vec<u8> = vec![0xaa; 2];
        ctx.send_from_host(&instance, client, b"longer payload", Flags::NONE).unwrap();
        assert_eq!(ctx.receive_into_host(&instance, server, &mut grow, Flags::NONE).unwrap(), 14);
        assert_eq!(grow, b"longer payload");

        let mut shrink = BytesMut::from(&[0u8; 64][..]);
        ctx.send_from_host(&instance, client, b"abc", Flags::NONE).unwrap();
        ctx.receive_into_host(&instance, server, &mut shrink, Flags::NONE).unwrap();
        assert_eq!(&shrink[..], b"abc");
    }

    #[test]
    fn test_empty_send_rejected() {
        let fabric = Arc::new(InprocFabric::default());
        let ctx = Context::new(fabric.clone());
        let (_server, client) = linked(&fabric, "host-empty");
        let instance = ctx.on_acquire();

        assert_eq!(ctx.send_status(&instance, client, b"", Flags::NONE), -Errno::EINVAL.code());
        assert!(!ctx.registry().is_registered(instance.call_site()));
    }

    #[test]
    fn test_failed_receive_leaves_buffer_alone() {
        let fabric = Arc::new(InprocFabric::default());
        let ctx = Context::new(fabric.clone());
        let (server, _client) = linked(&fabric, "host-untouched");
        let instance = ctx.on_acquire();

        let mut out = b"keep".to_vec();
        let status = ctx.receive_status(&instance, server, &mut out, Flags::DONTWAIT);
        assert_eq!(status, -Errno::EAGAIN.code());
        assert_eq!(out, b"keep");
    }

    #[test]
    fn test_unbound_handle() {
        let ctx = Context::new(Arc::new(InprocFabric::default()));
        let instance = ctx.on_acquire();
        let mut out = Vec::new();
        assert_eq!(
            ctx.receive_status(&instance, SocketId::INVALID, &mut out, Flags::NONE),
            -Errno::EBADF.code()
        );
    }

    #[test]
    fn test_abort_idle_instance_is_noop() {
        let fabric = Arc::new(InprocFabric::default());
        let ctx = Context::new(fabric.clone());
        let (server, client) = linked(&fabric, "host-idle-abort");
        let instance = ctx.on_acquire();

        ctx.on_abort(&instance);
        ctx.send_from_host(&instance, client, b"still fine", Flags::NONE).unwrap();
        let mut out = Vec::new();
        assert_eq!(ctx.receive_status(&instance, server, &mut out, Flags::NONE), 0);
    }

    #[test]
    fn test_last_release_closes_all_sockets() {
        let fabric = Arc::new(InprocFabric::default());
        let ctx = Context::new(fabric.clone());
        let first = ctx.on_acquire();
        let second = ctx.on_acquire();
        let (server, _client) = linked(&fabric, "host-teardown");
        ctx.attach(server).unwrap();

        assert_eq!(ctx.on_release(first), 1);
        assert_eq!(fabric.live_sockets(), 2);
        assert_eq!(ctx.on_release(second), 0);
        assert_eq!(fabric.live_sockets(), 0);
        assert_eq!(ctx.attached(), 0);
    }

    /// Fabric whose next sweep of slot 0 parks until released.
    struct Gated {
        fabric: Arc<InprocFabric>,
        armed: AtomicBool,
        sweeps: AtomicUsize,
        parked_tx: flume::Sender<()>,
        resume_rx: flume::Receiver<()>,
    }

    impl Transport for Gated {
        fn send(&self, id: SocketId, msg: MessageBuffer, flags: Flags) -> std::result::Result<(), Errno> {
            self.fabric.send(id, msg, flags)
        }
        fn recv(&self, id: SocketId, flags: Flags) -> std::result::Result<MessageBuffer, Errno> {
            self.fabric.recv(id, flags)
        }
        fn zombify(&self, id: SocketId) -> std::result::Result<(), Errno> {
            self.fabric.zombify(id)
        }
        fn close(&self, id: SocketId) -> std::result::Result<(), Errno> {
            self.fabric.close(id)
        }
        fn close_slot(&self, index: u32) -> std::result::Result<(), Errno> {
            if index == 0 {
                self.sweeps.fetch_add(1, Ordering::SeqCst);
                if self.armed.swap(false, Ordering::SeqCst) {
                    let _ = self.parked_tx.send(());
                    let _ = self.resume_rx.recv();
                }
            }
            self.fabric.close_slot(index)
        }
        fn is_live(&self, id: SocketId) -> bool {
            self.fabric.is_live(id)
        }
        fn max_sockets(&self) -> u32 {
            self.fabric.max_sockets()
        }
    }

    #[test]
    fn test_acquire_during_last_release_keeps_new_socket() {
        let fabric = Arc::new(InprocFabric::default());
        let (parked_tx, parked_rx) = flume::unbounded();
        let (resume_tx, resume_rx) = flume::unbounded();
        let gated = Arc::new(Gated {
            fabric: fabric.clone(),
            armed: AtomicBool::new(true),
            sweeps: AtomicUsize::new(0),
            parked_tx,
            resume_rx,
        });
        let ctx = Arc::new(Context::new(gated.clone()));
        let first = ctx.on_acquire();

        let releaser = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || ctx.on_release(first))
        };
        parked_rx.recv().unwrap();

        let acquirer = {
            let ctx = Arc::clone(&ctx);
            let fabric = fabric.clone();
            thread::spawn(move || {
                let instance = ctx.on_acquire();
                let id = fabric.socket(SocketOptions::default()).unwrap();
                ctx.attach(id).unwrap();
                (instance, id)
            })
        };
        // The acquire waits for the sweep in progress.
        thread::sleep(Duration::from_millis(20));
        assert!(!acquirer.is_finished());

        resume_tx.send(()).unwrap();
        assert_eq!(releaser.join().unwrap(), 0);
        let (_second, id) = acquirer.join().unwrap();

        assert_eq!(ctx.ledger().live(), 1);
        assert!(fabric.is_live(id));
        assert_eq!(ctx.attached(), 1);
        assert_eq!(gated.sweeps.load(Ordering::SeqCst), 1);
    }
}
