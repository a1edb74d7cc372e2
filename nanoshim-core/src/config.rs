//! Transport sizing constants and fabric configuration.

use std::time::Duration;

/// Default number of socket slots in a fabric (mirrors nanomsg's
/// `NN_MAX_SOCKETS`).
pub const DEFAULT_MAX_SOCKETS: u32 = 512;

/// Default receive high water mark, in messages.
pub const DEFAULT_RECV_HWM: usize = 1000;

/// How long a receive-loop worker waits on a full sink before re-checking
/// its stop flag.
pub const DEFAULT_SINK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Fabric configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FabricConfig {
    /// Size of the socket table. Handles are indices into it.
    pub max_sockets: u32,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            max_sockets: DEFAULT_MAX_SOCKETS,
        }
    }
}

impl FabricConfig {
    /// Configuration with a custom socket table size.
    #[must_use]
    pub const fn with_max_sockets(max_sockets: u32) -> Self {
        Self { max_sockets }
    }
}
