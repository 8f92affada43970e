//! Read loop: socket → accumulator → read chain

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, ReadHalf};
use tracing::{debug, trace, warn};

use crate::chain::Chain;
use crate::common::Stream;
use crate::error::Error;

use super::state::ChannelState;

pub(super) struct ReadLoop {
    pub(super) reader: ReadHalf<Stream>,
    pub(super) chain: Arc<RwLock<Chain>>,
    pub(super) state: Arc<ChannelState>,
    pub(super) max_read_chunk: usize,
    pub(super) read_timeout: Duration,
}

impl ReadLoop {
    /// Runs until end-of-stream, a hard I/O error, or close.
    ///
    /// The accumulator keeps every byte read since the last pass that went
    /// through the whole chain; a holding stage sees it again, extended, on
    /// the next pass.
    pub(super) async fn run(mut self) {
        let mut accumulator = BytesMut::new();
        let mut incoming = vec![0u8; self.max_read_chunk];

        loop {
            let read = tokio::select! {
                biased;
                _ = self.state.closed() => {
                    debug!("Channel: read loop stopped by close");
                    break;
                }
                read = tokio::time::timeout(self.read_timeout, self.reader.read(&mut incoming)) => read,
            };

            let error = match read {
                Err(_) => {
                    trace!("Channel: read deadline expired, re-arming");
                    continue;
                }
                Ok(Ok(0)) => {
                    debug!("Channel: peer closed the stream");
                    self.state.close();
                    break;
                }
                Ok(Ok(n)) => {
                    trace!("Channel: read {} bytes", n);
                    accumulator.extend_from_slice(&incoming[..n]);
                    None
                }
                Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => {
                    trace!("Channel: read timed out, re-arming");
                    continue;
                }
                Ok(Err(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    debug!("Channel: stream ended without close_notify");
                    self.state.close();
                    break;
                }
                Ok(Err(e)) => {
                    warn!("Channel: read failed: {}", e);
                    Some(Error::Io(e))
                }
            };

            let failed = error.is_some();
            let chain = self.chain.read().clone();
            let step = chain.run(Bytes::copy_from_slice(&accumulator), error);
            if !step.hold {
                accumulator.clear();
            }

            if failed {
                self.state.close();
                break;
            }
        }
    }
}
