//! Endpoint addressing.
//!
//! Endpoints are URIs of the form `scheme://address`. Every scheme the
//! messaging library understands parses, but only `inproc://` is served by
//! the in-process fabric.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::errno::Errno;

/// Transport endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP transport: `tcp://host:port`
    Tcp(SocketAddr),
    /// IPC transport: `ipc:///path/to/socket`
    Ipc(PathBuf),
    /// In-process transport: `inproc://name`
    Inproc(String),
}

impl Endpoint {
    /// Parse an endpoint from a string.
    ///
    /// # Examples
    ///
    /// ```
    /// use nanoshim_core::endpoint::Endpoint;
    ///
    /// let endpoint = Endpoint::parse("inproc://sensor-feed").unwrap();
    /// assert_eq!(endpoint.inproc_name(), Some("sensor-feed"));
    ///
    /// let endpoint = Endpoint::parse("tcp://127.0.0.1:5555").unwrap();
    /// assert!(endpoint.inproc_name().is_none());
    /// ```
    pub fn parse(s: &str) -> Result<Self, EndpointError> {
        s.parse()
    }

    /// The inproc name, if this is an inproc endpoint.
    #[must_use]
    pub fn inproc_name(&self) -> Option<&str> {
        match self {
            Endpoint::Inproc(name) => Some(name),
            _ => None,
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            addr.parse::<SocketAddr>()
                .map(Endpoint::Tcp)
                .map_err(|_| EndpointError::InvalidTcpAddress(addr.to_string()))
        } else if let Some(path) = s.strip_prefix("ipc://") {
            if path.is_empty() {
                Err(EndpointError::Empty("ipc"))
            } else {
                Ok(Endpoint::Ipc(PathBuf::from(path)))
            }
        } else if let Some(name) = s.strip_prefix("inproc://") {
            if name.is_empty() {
                Err(EndpointError::Empty("inproc"))
            } else {
                Ok(Endpoint::Inproc(name.to_string()))
            }
        } else {
            Err(EndpointError::InvalidScheme(s.to_string()))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
            Endpoint::Inproc(name) => write!(f, "inproc://{name}"),
        }
    }
}

/// Errors that can occur when parsing endpoints.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Invalid scheme in endpoint: {0} (expected tcp://, ipc://, or inproc://)")]
    InvalidScheme(String),

    #[error("Invalid TCP address: {0}")]
    InvalidTcpAddress(String),

    #[error("Empty {0} address")]
    Empty(&'static str),
}

impl From<EndpointError> for Errno {
    fn from(_: EndpointError) -> Self {
        Errno::EINVAL
    }
}
