//! # Nanoshim
//!
//! A cancelable, blocking message-transport core for hosts that call into
//! messaging code from many threads and need to abort any of those calls.
//!
//! ## Architecture
//!
//! - **`nanoshim-core`**: message buffers, the transport trait, the
//!   two-phase-close [`Socket`](nanoshim_core::socket::Socket) and the
//!   in-process fabric
//! - **`nanoshim`** (this crate): call-site registration and cancellation,
//!   the resource ledger, background receive loops and the host adapter
//!
//! ## Quick Start
//!
//! ### Background receive loop
//!
//! ```rust
//! use nanoshim::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let fabric = Arc::new(InprocFabric::default());
//! let server = fabric.socket(SocketOptions::default()).unwrap();
//! let client = fabric.socket(SocketOptions::default()).unwrap();
//! fabric.bind(server, "inproc://quick-start").unwrap();
//! fabric.connect(client, "inproc://quick-start").unwrap();
//!
//! let transport: Arc<dyn Transport> = fabric.clone();
//! let server = Socket::bind(Arc::clone(&transport), server).unwrap();
//! let client = Socket::bind(transport, client).unwrap();
//!
//! let (mut handle, events) = ReceiveLoop::unbounded(server).unwrap();
//! client.send(MessageBuffer::from_static(b"ping"), Flags::NONE).unwrap();
//!
//! match events.recv_timeout(Duration::from_secs(1)).unwrap() {
//!     ReceiveEvent::Message(msg) => assert_eq!(msg.as_slice(), b"ping"),
//!     ReceiveEvent::Failed(err) => panic!("{err}"),
//! }
//! handle.stop().unwrap();
//! ```
//!
//! ### Aborting a blocked call
//!
//! ```rust
//! use nanoshim::prelude::*;
//! use std::sync::Arc;
//! use std::thread;
//! use std::time::Duration;
//!
//! let fabric = Arc::new(InprocFabric::default());
//! let ctx = Arc::new(Context::new(fabric.clone()));
//! let id = fabric.socket(SocketOptions::default()).unwrap();
//! let instance = ctx.on_acquire();
//! let site = instance.call_site();
//!
//! let blocked = {
//!     let ctx = Arc::clone(&ctx);
//!     thread::spawn(move || ctx.receive(site, id, Flags::NONE))
//! };
//! while !ctx.registry().is_registered(site) {
//!     thread::sleep(Duration::from_millis(1));
//! }
//! ctx.on_abort(&instance);
//! assert!(blocked.join().unwrap().unwrap_err().is_canceled());
//! ```
//!
//! ## Logging
//!
//! Lifecycle events are emitted through `tracing`; see [`dev_tracing`].

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod call;
pub mod context;
pub mod dev_tracing;
pub mod host;
pub mod ledger;
pub mod recv_loop;

pub use bytes::Bytes;
pub use nanoshim_core;

pub mod prelude {
    pub use crate::call::{CallGuard, CallRegistration, CallRegistry, CallSiteId};
    pub use crate::context::Context;
    pub use crate::host::{status_code, Instance};
    pub use crate::ledger::ResourceLedger;
    pub use crate::recv_loop::{
        callback, EventSink, LoopControl, LoopState, ReceiveEvent, ReceiveLoop, ReceiveLoopConfig,
        ReceiveLoopHandle,
    };
    pub use nanoshim_core::prelude::*;
}
