use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::error::Result;
use crate::launch::stream::Stream;

/// Completion signal recorded into a stream.
///
/// `record` enqueues a marker; the event completes when the stream reaches
/// it, i.e. when every launch submitted before the marker has finished.
/// Markers are counted, so an event recorded several times completes once
/// every successfully recorded marker has been reached.
#[derive(Debug)]
pub struct Event {
    reached: Arc<watch::Sender<u64>>,
    recorded: AtomicU64,
}

impl Event {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            reached: Arc::new(tx),
            recorded: AtomicU64::new(0),
        }
    }

    /// Record the event at the current tail of `stream`.
    ///
    /// A marker that cannot be enqueued is not counted.
    pub fn record(&self, stream: &Stream) -> Result<()> {
        let reached = Arc::clone(&self.reached);
        stream.enqueue(Box::new(move || {
            reached.send_modify(|v| *v += 1);
        }))?;
        self.recorded.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// True if every recorded marker has been reached (or nothing was recorded).
    pub fn query(&self) -> bool {
        *self.reached.borrow() >= self.recorded.load(Ordering::Acquire)
    }

    /// Wait until every marker recorded so far has been reached.
    pub async fn synchronize(&self) {
        let target = self.recorded.load(Ordering::Acquire);
        let mut rx = self.reached.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|&done| done >= target).await;
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}
