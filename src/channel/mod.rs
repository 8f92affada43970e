//! Channel - duplex byte stream with read and write middleware
//!
//! A Channel owns one connection and runs two background tasks over it:
//!
//! ```text
//! socket ─► read loop ─► accumulator ─► [read chain] ─► application
//! application ─► Writer ─► accumulator ─► [write chain] ─► queue ─► write loop ─► socket
//! ```
//!
//! The write loop starts with the Channel; the read loop starts on
//! [`Channel::read`]. Both stop on [`Channel::close`], on end-of-stream, or
//! on a hard I/O error. Errors never escape the tasks: they are handed to
//! the read chain or to the completion callback of the affected write.
//!
//! ## Example
//!
//! ```ignore
//! let channel = Channel::connect(TransportKind::Tcp, "localhost", 8080, None).await?;
//!
//! let done = channel.read(Chain::new().with(UpperCase).with_fn(|data, err| {
//!     println!("{:?}", data);
//!     Step::pass(data).with_error(err)
//! }))?;
//!
//! channel.write("World", |result| println!("{:?}", result)).await?;
//! done.await?;
//! ```

mod reader;
mod state;
mod writer;

pub use writer::{Completion, WriteJob, Writer};

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::io::ReadHalf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::chain::Chain;
use crate::common::{Result, Stream};
use crate::config::ChannelConfig;
use crate::error::Error;
use crate::session::{create_session, TlsConfig};
use crate::transport::TransportKind;

use reader::ReadLoop;
use state::ChannelState;
use writer::WriteLoop;

/// Handle to a connection and its read/write middleware.
///
/// Cloning is cheap; all clones drive the same connection. When the last
/// clone is dropped the channel closes as if [`Channel::close`] was called.
/// A clone captured by one of the channel's own read stages keeps it alive;
/// such stages should hold a [`WeakChannel`] instead.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

/// Non-owning handle to a [`Channel`].
#[derive(Clone)]
pub struct WeakChannel {
    shared: Weak<Shared>,
}

impl WeakChannel {
    /// The channel, if any strong handle is still around.
    pub fn upgrade(&self) -> Option<Channel> {
        self.shared.upgrade().map(|shared| Channel { shared })
    }
}

struct Shared {
    config: ChannelConfig,
    state: Arc<ChannelState>,
    read_chain: Arc<RwLock<Chain>>,
    /// Read half, parked here until the read loop takes it
    reader: Mutex<Option<ReadHalf<Stream>>>,
    queue: mpsc::Sender<WriteJob>,
    write_task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.state.close();
    }
}

impl Channel {
    /// Dial `host:port` with default settings.
    ///
    /// With `tls` set, a TLS session is negotiated on top of the raw
    /// connection; the expected peer name defaults to `host`.
    pub async fn connect(
        kind: TransportKind,
        host: &str,
        port: u16,
        tls: Option<TlsConfig>,
    ) -> Result<Self> {
        Self::connect_with(kind, host, port, tls, ChannelConfig::default()).await
    }

    /// Dial `host:port` with explicit settings.
    pub async fn connect_with(
        kind: TransportKind,
        host: &str,
        port: u16,
        tls: Option<TlsConfig>,
        config: ChannelConfig,
    ) -> Result<Self> {
        config.validate()?;

        let addr = kind.address(host, port);
        let keep_alive = if kind.is_tcp() { config.keep_alive() } else { None };
        let transport = kind.transport(keep_alive)?;
        let session = create_session(tls.as_ref(), &addr.host())?;

        let stream = transport.connect(&addr).await?;
        let stream = session.wrap_client(stream).await?;

        info!(
            "Channel: connected to {} over {}{}",
            addr,
            kind,
            if tls.is_some() { "+tls" } else { "" }
        );
        Ok(Self::from_stream(stream, config))
    }

    /// Build a Channel over an established stream and start its write loop.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_stream(stream: Stream, config: ChannelConfig) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let state = ChannelState::new();
        let (queue, receiver) = mpsc::channel(config.queue_capacity.max(1));

        let write_task = tokio::spawn(
            WriteLoop {
                writer,
                queue: receiver,
                state: Arc::clone(&state),
                write_timeout: config.write_timeout(),
            }
            .run(),
        );
        debug!("Channel: write loop started");

        Self {
            shared: Arc::new(Shared {
                config,
                state,
                read_chain: Arc::new(RwLock::new(Chain::new())),
                reader: Mutex::new(Some(reader)),
                queue,
                write_task: Mutex::new(Some(write_task)),
            }),
        }
    }

    /// Install `chain` as the read chain and start the read loop.
    ///
    /// The returned handle resolves when the loop ends. A Channel has a
    /// single read loop; use [`Channel::set_read_stages`] to swap the chain
    /// afterwards.
    pub fn read(&self, chain: Chain) -> Result<JoinHandle<()>> {
        if self.is_closed() {
            return Err(Error::ChannelClosed);
        }
        let reader = self.shared.reader.lock().take().ok_or(Error::ReaderTaken)?;
        *self.shared.read_chain.write() = chain;

        let task = tokio::spawn(
            ReadLoop {
                reader,
                chain: Arc::clone(&self.shared.read_chain),
                state: Arc::clone(&self.shared.state),
                max_read_chunk: self.shared.config.max_read_chunk.max(1),
                read_timeout: self.shared.config.read_timeout(),
            }
            .run(),
        );
        debug!("Channel: read loop started");
        Ok(task)
    }

    /// Replace the whole read chain. Takes effect from the next pass.
    pub fn set_read_stages(&self, chain: Chain) {
        *self.shared.read_chain.write() = chain;
    }

    /// Remove the read stage at `index`.
    ///
    /// Fails with [`Error::InvalidIndex`] outside the chain and with
    /// [`Error::EmptyChain`] when it would remove the last stage.
    pub fn remove_read_stage(&self, index: usize) -> Result<()> {
        self.shared.read_chain.write().remove(index)?;
        debug!("Channel: removed read stage {}", index);
        Ok(())
    }

    pub fn read_stage_count(&self) -> usize {
        self.shared.read_chain.read().len()
    }

    /// Create a writer bound to `chain`.
    pub fn writer(&self, chain: Chain) -> Writer {
        Writer::new(
            chain,
            self.shared.queue.clone(),
            Arc::clone(&self.shared.state),
            self.shared.config.queue_policy,
        )
    }

    /// Queue `data` without any write stages.
    pub async fn write<F>(&self, data: impl AsRef<[u8]>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<usize>) + Send + 'static,
    {
        self.writer(Chain::new()).write(data, callback).await
    }

    /// Close the channel.
    ///
    /// Stops accepting writes, lets the write loop finish the queued jobs,
    /// stops the read loop and closes the connection. Returns the error of
    /// closing the connection, if any. Later calls are no-ops.
    ///
    /// On a peer that stopped reading this waits for the write in progress
    /// and for the drain of the queue, each bounded by the write timeout.
    pub async fn close(&self) -> Result<()> {
        if self.shared.state.close() {
            debug!("Channel: closing");
        }
        self.shared.reader.lock().take();

        let task = self.shared.write_task.lock().take();
        match task {
            Some(task) => task
                .await
                .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?,
            None => Ok(()),
        }
    }

    /// Handle that does not keep the channel open.
    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.is_closed()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }
}

#[cfg(test)]
mod tests;
