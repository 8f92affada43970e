//! Write path: writer → accumulator → write chain → queue → write loop → socket

use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::chain::Chain;
use crate::common::Stream;
use crate::config::QueuePolicy;
use crate::error::{is_disconnect, Error, Result};

use super::state::ChannelState;

/// Completion callback of a write: bytes written, or why nothing was.
pub type Completion = Box<dyn FnOnce(Result<usize>) + Send>;

/// One queued outbound payload plus its completion callback
pub struct WriteJob {
    data: Bytes,
    completion: Completion,
}

impl WriteJob {
    fn complete(self, result: Result<usize>) {
        (self.completion)(result)
    }
}

impl fmt::Debug for WriteJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteJob")
            .field("len", &self.data.len())
            .finish()
    }
}

/// Reusable writer bound to a write chain.
///
/// Every writer owns its accumulator. Clones share it, and invocations on a
/// writer and its clones are serialized.
#[derive(Clone)]
pub struct Writer {
    inner: Arc<WriterInner>,
}

struct WriterInner {
    chain: Chain,
    accumulator: Mutex<BytesMut>,
    queue: mpsc::Sender<WriteJob>,
    state: Arc<ChannelState>,
    policy: QueuePolicy,
}

impl Writer {
    pub(super) fn new(
        chain: Chain,
        queue: mpsc::Sender<WriteJob>,
        state: Arc<ChannelState>,
        policy: QueuePolicy,
    ) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                chain,
                accumulator: Mutex::new(BytesMut::new()),
                queue,
                state,
                policy,
            }),
        }
    }

    /// Push `data` through the write chain and queue the result.
    ///
    /// With [`QueuePolicy::Block`] this waits for room in the queue, with
    /// [`QueuePolicy::Reject`] a full queue fails with [`Error::QueueFull`].
    /// `callback` runs once the write loop has handled the payload, or right
    /// away with `Ok(0)` when the chain holds it back. A payload that cannot be
    /// queued returns an error and its callback is dropped.
    pub async fn write<F>(&self, data: impl AsRef<[u8]>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<usize>) + Send + 'static,
    {
        let mut accumulator = self.inner.accumulator.lock().await;
        let permit = match self.inner.policy {
            QueuePolicy::Block => {
                self.inner.ensure_open()?;
                self.inner
                    .queue
                    .reserve()
                    .await
                    .map_err(|_| Error::ChannelClosed)?
            }
            QueuePolicy::Reject => self.inner.try_reserve()?,
        };
        self.inner
            .dispatch(&mut accumulator, data.as_ref(), permit, Box::new(callback));
        Ok(())
    }

    /// Non-blocking [`Writer::write`], usable from inside a stage.
    ///
    /// Fails with [`Error::WouldBlock`] while another invocation of this
    /// writer is in progress and with [`Error::QueueFull`] on a full queue.
    pub fn try_write<F>(&self, data: impl AsRef<[u8]>, callback: F) -> Result<()>
    where
        F: FnOnce(Result<usize>) + Send + 'static,
    {
        let mut accumulator = self
            .inner
            .accumulator
            .try_lock()
            .map_err(|_| Error::WouldBlock)?;
        let permit = self.inner.try_reserve()?;
        self.inner
            .dispatch(&mut accumulator, data.as_ref(), permit, Box::new(callback));
        Ok(())
    }

    /// Write and wait for the write loop to report the outcome.
    pub async fn send(&self, data: impl AsRef<[u8]>) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.write(data, move |result| {
            let _ = tx.send(result);
        })
        .await?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Number of stages in this writer's chain.
    pub fn stage_count(&self) -> usize {
        self.inner.chain.len()
    }
}

impl WriterInner {
    fn ensure_open(&self) -> Result<()> {
        if self.state.is_closed() {
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    fn try_reserve(&self) -> Result<mpsc::Permit<'_, WriteJob>> {
        self.ensure_open()?;
        self.queue.try_reserve().map_err(|e| match e {
            mpsc::error::TrySendError::Full(()) => Error::QueueFull,
            mpsc::error::TrySendError::Closed(()) => Error::ChannelClosed,
        })
    }

    fn dispatch(
        &self,
        accumulator: &mut BytesMut,
        data: &[u8],
        permit: mpsc::Permit<'_, WriteJob>,
        completion: Completion,
    ) {
        accumulator.extend_from_slice(data);
        let step = self
            .chain
            .run(Bytes::copy_from_slice(accumulator), None);

        if step.hold {
            trace!("Writer: chain holding {} bytes", accumulator.len());
            completion(Ok(0));
            return;
        }
        accumulator.clear();

        if let Some(err) = step.error {
            debug!("Writer: chain rejected payload: {}", err);
            completion(Err(err));
            return;
        }

        trace!("Writer: queued {} bytes", step.data.len());
        permit.send(WriteJob {
            data: step.data,
            completion,
        });
    }
}

pub(super) struct WriteLoop {
    pub(super) writer: WriteHalf<Stream>,
    pub(super) queue: mpsc::Receiver<WriteJob>,
    pub(super) state: Arc<ChannelState>,
    pub(super) write_timeout: Duration,
}

/// How a single job ended, as far as the connection is concerned.
enum Outcome {
    Written,
    TimedOut,
    Failed,
}

impl WriteLoop {
    /// Writes queued jobs in FIFO order until close, a hard I/O error, or
    /// every sender is gone. Then drains the queue and shuts the connection
    /// down, returning the shutdown result.
    ///
    /// A write in progress is never cut short by close. Jobs still queued at
    /// close share a single deadline of `write_timeout`; once a drained write
    /// misses it, the remaining jobs fail with [`Error::ChannelClosed`].
    pub(super) async fn run(mut self) -> Result<()> {
        let mut healthy = true;

        loop {
            let job = tokio::select! {
                biased;
                _ = self.state.closed() => break,
                job = self.queue.recv() => job,
            };
            let Some(job) = job else {
                debug!("Channel: all writers gone");
                break;
            };

            let deadline = Instant::now() + self.write_timeout;
            if let Outcome::Failed = self.write_job(job, deadline).await {
                healthy = false;
                self.state.close();
                break;
            }
        }

        self.queue.close();
        let deadline = Instant::now() + self.write_timeout;
        let mut drained = 0usize;
        while let Some(job) = self.queue.recv().await {
            drained += 1;
            if healthy {
                healthy = matches!(self.write_job(job, deadline).await, Outcome::Written);
            } else {
                job.complete(Err(Error::ChannelClosed));
            }
        }
        debug!("Channel: write queue drained ({} pending jobs)", drained);

        let shutdown = tokio::time::timeout(self.write_timeout, self.writer.shutdown()).await;
        match shutdown {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if healthy => Err(Error::Io(e)),
            Err(_) if healthy => Err(Error::Timeout),
            _ => {
                debug!("Channel: shutdown of a failed connection skipped");
                Ok(())
            }
        }
    }

    /// Write one job before `deadline` and complete it.
    ///
    /// A write cut off by the deadline completes with [`Error::Timeout`]; the
    /// part of the payload accepted before that is already on the wire.
    async fn write_job(&mut self, job: WriteJob, deadline: Instant) -> Outcome {
        let len = job.data.len();
        let writer = &mut self.writer;
        let data = &job.data;
        let result = tokio::time::timeout_at(deadline, async move {
            writer.write_all(data).await?;
            writer.flush().await
        })
        .await;

        match result {
            Err(_) => {
                warn!("Channel: write deadline expired after {:?}", self.write_timeout);
                job.complete(Err(Error::Timeout));
                Outcome::TimedOut
            }
            Ok(Ok(())) => {
                trace!("Channel: wrote {} bytes", len);
                job.complete(Ok(len));
                Outcome::Written
            }
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => {
                warn!("Channel: write timed out");
                job.complete(Err(Error::Timeout));
                Outcome::TimedOut
            }
            Ok(Err(e)) => {
                if is_disconnect(&e) {
                    debug!("Channel: peer went away during write: {}", e);
                } else {
                    warn!("Channel: write failed: {}", e);
                }
                job.complete(Err(Error::Io(e)));
                Outcome::Failed
            }
        }
    }
}
