//! Unix domain socket transport

use async_trait::async_trait;
use tokio::net::UnixStream;
use tracing::debug;

use crate::common::{Address, IntoStream, Result, Stream};
use crate::error::Error;

use super::Transport;

/// Unix stream socket transport
pub struct UnixTransport;

#[async_trait]
impl Transport for UnixTransport {
    async fn connect(&self, addr: &Address) -> Result<Stream> {
        let Address::Path(path) = addr else {
            return Err(Error::InvalidAddress(format!(
                "unix transport needs a socket path, got {}",
                addr
            )));
        };

        let stream = UnixStream::connect(path).await?;
        debug!("Unix: connected to {}", path.display());
        Ok(stream.into_stream())
    }
}
