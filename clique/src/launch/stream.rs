//! In-order execution streams.
//!
//! A stream owns one OS thread per device. Jobs run in submission order;
//! a job that spins on a peer blocks only its own stream, never the async
//! runtime the host awaits on.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use crate::error::{CliqueError, Result};
use crate::launch::handle::LaunchHandle;
use crate::types::{CollectiveKind, DeviceId, Rank};

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// An in-order launch queue bound to one device.
pub struct Stream {
    id: u64,
    device: DeviceId,
    tx: mpsc::UnboundedSender<Job>,
}

impl Stream {
    /// Start a stream for `device`.
    pub fn new(device: DeviceId) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        std::thread::Builder::new()
            .name(format!("clique-stream-{device}"))
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    job();
                }
            })?;
        Ok(Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            device,
            tx,
        })
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Process-unique stream identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Enqueue `work`; the returned handle resolves with its result.
    pub(crate) fn launch(
        &self,
        operation: CollectiveKind,
        rank: Rank,
        work: impl FnOnce() -> Result<()> + Send + 'static,
    ) -> Result<LaunchHandle> {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(Box::new(move || {
            let _ = done_tx.send(work());
        }))?;
        Ok(LaunchHandle::new(operation, rank, done_rx))
    }

    /// Enqueue a job with no result.
    pub(crate) fn enqueue(&self, job: Job) -> Result<()> {
        self.tx
            .send(job)
            .map_err(|_| CliqueError::StreamClosed {
                device: self.device,
            })
    }

    /// Wait until every job enqueued so far has finished.
    pub async fn synchronize(&self) -> Result<()> {
        self.marker()?
            .await
            .map_err(|_| CliqueError::StreamClosed {
                device: self.device,
            })
    }

    /// Blocking variant of [`synchronize`](Self::synchronize).
    ///
    /// Must not be called from within an async context.
    pub fn synchronize_blocking(&self) -> Result<()> {
        self.marker()?
            .blocking_recv()
            .map_err(|_| CliqueError::StreamClosed {
                device: self.device,
            })
    }

    fn marker(&self) -> Result<oneshot::Receiver<()>> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Box::new(move || {
            let _ = tx.send(());
        }))?;
        Ok(rx)
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

// Dropping the sender closes the queue; the thread exits after draining it.
// The thread is not joined: a job stalled on a missing peer would otherwise
// hang the drop.
