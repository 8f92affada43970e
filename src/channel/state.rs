//! Closed-state coordination between a Channel and its background tasks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// One-shot closed flag shared by the handle, the read loop and the write loop.
///
/// Both loops await [`ChannelState::closed`] next to every blocking I/O call,
/// so closing wakes them no matter what they are waiting on.
pub(crate) struct ChannelState {
    closed: AtomicBool,
    notify: Notify,
}

impl ChannelState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    /// Mark the channel closed. Returns `true` only for the call that closed it.
    pub(crate) fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the channel is closed.
    pub(crate) async fn closed(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}
