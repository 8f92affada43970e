//! Session Layer
//!
//! Responsibilities:
//! - TLS encryption/decryption on top of a raw transport stream
//!
//! This layer transforms raw transport streams into secure streams.
//! It never looks at the application bytes.

mod plain;
mod tls;

pub use plain::PlainSession;
pub use tls::{TlsConfig, TlsSession, TlsVersion};

use async_trait::async_trait;

use crate::common::{Result, Stream};

/// Session trait for wrapping streams with encryption
///
/// Each session implementation wraps a stream and returns a new stream
/// with additional capabilities.
#[async_trait]
pub trait Session: Send + Sync {
    /// Wrap a stream (client-side: initiate handshake)
    async fn wrap_client(&self, stream: Stream) -> Result<Stream>;

    /// Wrap a stream (server-side: accept handshake)
    async fn wrap_server(&self, stream: Stream) -> Result<Stream>;
}

/// Create a session from an optional TLS configuration.
///
/// `host` is used as the expected peer name when the configuration does not
/// carry one.
pub fn create_session(tls: Option<&TlsConfig>, host: &str) -> Result<Box<dyn Session>> {
    match tls {
        None => Ok(Box::new(PlainSession)),
        Some(config) => {
            let mut config = config.clone();
            if config.server_name.is_none() {
                let host = host.trim_start_matches('[').trim_end_matches(']');
                config.server_name = Some(host.to_string());
            }
            Ok(Box::new(TlsSession::new(config)?))
        }
    }
}
