//! Nanoshim Core
//!
//! This crate contains the transport-facing building blocks:
//! - Owned message buffers and the host buffer contract (`buffer`)
//! - Generation-tagged socket handles and the transport trait (`transport`)
//! - Two-phase-close socket wrapper (`socket`)
//! - In-process transport fabric (`inproc`)
//! - Error taxonomy and transport error codes (`error`, `errno`)
//! - Endpoint parsing, socket options and sizing constants

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
pub mod buffer;
pub mod config;
pub mod endpoint;
pub mod errno;
pub mod error;
pub mod inproc;
pub mod options;
pub mod socket;
pub mod transport;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::buffer::{HostBuffer, MessageBuffer};
    pub use crate::config::FabricConfig;
    pub use crate::endpoint::Endpoint;
    pub use crate::errno::Errno;
    pub use crate::error::{NanoshimError, Result};
    pub use crate::inproc::InprocFabric;
    pub use crate::options::SocketOptions;
    pub use crate::socket::{Socket, SocketState};
    pub use crate::transport::{Flags, SocketId, Transport};
}
