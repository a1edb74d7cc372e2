//! Socket configuration options
//!
//! This module provides per-socket options for the in-process transport,
//! similar to nanomsg's `nn_setsockopt` receive/send options.

use std::time::Duration;

use crate::config::DEFAULT_RECV_HWM;

/// Socket configuration options.
///
/// # Examples
///
/// ```
/// use nanoshim_core::options::SocketOptions;
/// use std::time::Duration;
///
/// let opts = SocketOptions::default()
///     .with_recv_timeout(Duration::from_secs(5))
///     .with_send_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    /// Receive timeout (NN_RCVTIMEO)
    ///
    /// - `None`: Block indefinitely (default)
    /// - `Some(Duration::ZERO)`: Non-blocking (return immediately with EAGAIN)
    /// - `Some(duration)`: Wait up to duration before returning ETIMEDOUT
    pub recv_timeout: Option<Duration>,

    /// Send timeout (NN_SNDTIMEO)
    ///
    /// Same convention as `recv_timeout`. A send waits when the socket has
    /// no peer yet or when the peer's receive queue is at its high water mark.
    pub send_timeout: Option<Duration>,

    /// High water mark for receiving (messages)
    ///
    /// Maximum number of messages queued on the receive side before senders
    /// block. `0` means unbounded.
    /// - Default: 1000 messages
    pub recv_hwm: usize,

    /// Maximum message size
    ///
    /// Checked when this socket sends.
    /// - `None`: No limit (default)
    /// - `Some(size)`: Reject larger messages with EMSGSIZE
    pub max_msg_size: Option<usize>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            recv_timeout: None,
            send_timeout: None,
            recv_hwm: DEFAULT_RECV_HWM,
            max_msg_size: None,
        }
    }
}

impl SocketOptions {
    /// Create options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_recv_hwm(mut self, hwm: usize) -> Self {
        self.recv_hwm = hwm;
        self
    }

    #[must_use]
    pub fn with_max_msg_size(mut self, size: Option<usize>) -> Self {
        self.max_msg_size = size;
        self
    }

    /// True when receives never wait.
    #[must_use]
    pub fn is_recv_nonblocking(&self) -> bool {
        self.recv_timeout == Some(Duration::ZERO)
    }

    /// True when sends never wait.
    #[must_use]
    pub fn is_send_nonblocking(&self) -> bool {
        self.send_timeout == Some(Duration::ZERO)
    }
}
