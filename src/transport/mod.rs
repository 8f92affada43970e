//! Transport Layer
//!
//! Responsibilities:
//! - Establish the lowest-level duplex connection (TCP, Unix socket)
//! - Apply socket options (keep-alive)
//! - NO encryption, NO inspection of the bytes
//!
//! This layer ONLY deals with raw byte transport.

mod tcp;
#[cfg(unix)]
mod unix;

pub use tcp::{AddressFamily, TcpTransport};
#[cfg(unix)]
pub use unix::UnixTransport;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::{Address, Result, Stream};
use crate::error::Error;

/// Transport trait for establishing raw connections
///
/// Implementations should ONLY handle connection establishment,
/// not encryption.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to a remote address
    async fn connect(&self, addr: &Address) -> Result<Stream>;
}

/// Kind of stream transport a Channel dials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// TCP over any address family
    Tcp,
    /// TCP restricted to IPv4
    Tcp4,
    /// TCP restricted to IPv6
    Tcp6,
    /// Unix domain stream socket; the host is the socket path
    Unix,
}

impl TransportKind {
    /// Whether the kind is TCP based (and thus gets keep-alive).
    pub fn is_tcp(&self) -> bool {
        !matches!(self, TransportKind::Unix)
    }

    /// Build the address this kind dials for `host` and `port`.
    pub fn address(&self, host: &str, port: u16) -> Address {
        match self {
            TransportKind::Unix => Address::path(host),
            _ => Address::from_host_port(host, port),
        }
    }

    /// Create the transport for this kind.
    pub fn transport(&self, keep_alive: Option<Duration>) -> Result<Box<dyn Transport>> {
        let family = match self {
            TransportKind::Tcp => AddressFamily::Any,
            TransportKind::Tcp4 => AddressFamily::V4,
            TransportKind::Tcp6 => AddressFamily::V6,
            #[cfg(unix)]
            TransportKind::Unix => return Ok(Box::new(UnixTransport)),
            #[cfg(not(unix))]
            TransportKind::Unix => {
                return Err(Error::Unsupported(
                    "unix sockets are not available on this platform".into(),
                ))
            }
        };
        Ok(Box::new(TcpTransport::new(family).with_keep_alive(keep_alive)))
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "tcp4" => Ok(TransportKind::Tcp4),
            "tcp6" => Ok(TransportKind::Tcp6),
            "unix" => Ok(TransportKind::Unix),
            other => Err(Error::Unsupported(format!("transport kind {}", other))),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Tcp4 => "tcp4",
            TransportKind::Tcp6 => "tcp6",
            TransportKind::Unix => "unix",
        };
        f.write_str(name)
    }
}
