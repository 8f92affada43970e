//! Plain session - no-op passthrough for unencrypted channels

use async_trait::async_trait;

use crate::common::{Result, Stream};

use super::Session;

/// Session used when no TLS configuration is given
pub struct PlainSession;

#[async_trait]
impl Session for PlainSession {
    async fn wrap_client(&self, stream: Stream) -> Result<Stream> {
        Ok(stream)
    }

    async fn wrap_server(&self, stream: Stream) -> Result<Stream> {
        Ok(stream)
    }
}
