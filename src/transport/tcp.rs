//! TCP Transport implementation

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::common::{Address, IntoStream, Result, Stream};
use crate::error::Error;

use super::Transport;

/// Address family a TCP transport resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Any,
    V4,
    V6,
}

impl AddressFamily {
    fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            AddressFamily::Any => true,
            AddressFamily::V4 => addr.is_ipv4(),
            AddressFamily::V6 => addr.is_ipv6(),
        }
    }
}

/// TCP transport - raw TCP connections with optional keep-alive probing
pub struct TcpTransport {
    family: AddressFamily,
    keep_alive: Option<Duration>,
}

impl TcpTransport {
    pub fn new(family: AddressFamily) -> Self {
        Self {
            family,
            keep_alive: None,
        }
    }

    /// Enable TCP keep-alive with the given probe interval.
    pub fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = interval;
        self
    }

    async fn resolve(&self, addr: &Address) -> Result<Vec<SocketAddr>> {
        let candidates: Vec<SocketAddr> = match addr {
            Address::Socket(socket_addr) => vec![*socket_addr],
            Address::Domain(domain, port) => {
                tokio::net::lookup_host((domain.as_str(), *port)).await?.collect()
            }
            Address::Path(_) => {
                return Err(Error::InvalidAddress(format!(
                    "TCP cannot dial socket path {}",
                    addr
                )));
            }
        };

        let resolved: Vec<SocketAddr> = candidates
            .into_iter()
            .filter(|a| self.family.accepts(a))
            .collect();
        if resolved.is_empty() {
            return Err(Error::InvalidAddress(format!(
                "no {:?} address found for {}",
                self.family, addr
            )));
        }
        Ok(resolved)
    }

    fn apply_keep_alive(&self, stream: &TcpStream) -> std::io::Result<()> {
        let Some(interval) = self.keep_alive else {
            return Ok(());
        };
        let params = TcpKeepalive::new().with_time(interval).with_interval(interval);
        SockRef::from(stream).set_tcp_keepalive(&params)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(AddressFamily::Any)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, addr: &Address) -> Result<Stream> {
        let mut last_err = None;
        for candidate in self.resolve(addr).await? {
            trace!("TCP: dialing {}", candidate);
            match TcpStream::connect(candidate).await {
                Ok(stream) => {
                    self.apply_keep_alive(&stream)?;
                    debug!("TCP: connected to {} ({})", addr, candidate);
                    return Ok(stream.into_stream());
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err
            .map(Error::Io)
            .unwrap_or_else(|| Error::InvalidAddress(addr.to_string())))
    }
}
