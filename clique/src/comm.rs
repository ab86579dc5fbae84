use std::sync::{Arc, Mutex};

use crate::collective::{RingLaunch, ring_allgather, ring_allgather_read, ring_allreduce};
use crate::config::{CliqueConfig, TraceMask};
use crate::error::{CliqueError, Result};
use crate::launch::{Event, LaunchHandle, LaunchPlan, Stream};
use crate::memory::DeviceBuffer;
use crate::reduce::Element;
use crate::tracker::{ControlBlock, TrackerPool};
use crate::types::{CollectiveKind, DeviceId, Rank, ReduceOp};

/// One device's handle on a clique.
///
/// Created by [`TrackerPool::communicators`], [`TrackerPool::communicator`]
/// or [`TrackerPool::add_device`]. Every participant must issue the same
/// collectives, with the same `count`, in the same order: launches are
/// matched across devices by their position in that order.
///
/// A communicator launches on a single stream, the first one a launch is
/// successfully enqueued on; its launches therefore run one at a time and in
/// issue order. Each launch claims its epoch when it starts running, so a
/// launch that is rejected or never enqueued leaves the sequence untouched.
///
/// Dropping a communicator releases its rank and its completion event. The
/// pool and the control blocks live on while other communicators hold them.
pub struct Communicator {
    pool: Arc<TrackerPool>,
    block: Arc<ControlBlock>,
    event: Event,
    stream: Mutex<Option<u64>>,
    config: CliqueConfig,
}

impl Communicator {
    pub(crate) fn new(pool: Arc<TrackerPool>, block: Arc<ControlBlock>) -> Self {
        let config = pool.config().clone();
        Self {
            pool,
            block,
            event: Event::new(),
            stream: Mutex::new(None),
            config,
        }
    }

    pub fn rank(&self) -> Rank {
        self.block.rank()
    }

    pub fn device(&self) -> DeviceId {
        self.block.device()
    }

    /// Number of devices in the clique.
    pub fn world_size(&self) -> u32 {
        self.pool.group_size()
    }

    pub fn pool(&self) -> &Arc<TrackerPool> {
        &self.pool
    }

    pub fn control_block(&self) -> &ControlBlock {
        &self.block
    }

    pub fn config(&self) -> &CliqueConfig {
        &self.config
    }

    /// Completion event of this device.
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Gather `count` elements from every device's `src` into `dst`, in rank
    /// order. `dst` must hold at least `world_size * count` elements.
    pub fn all_gather<T: Element>(
        &self,
        stream: &Stream,
        src: &DeviceBuffer<T>,
        dst: &DeviceBuffer<T>,
        count: usize,
    ) -> Result<LaunchHandle> {
        let launch = self.prepare(CollectiveKind::AllGather, stream, src, dst, count)?;
        self.issue(stream, launch, |launch| ring_allgather(launch))
    }

    /// Like [`all_gather`](Self::all_gather), but every device reads its
    /// peers' sources instead of writing into their destinations.
    pub fn all_gather_read<T: Element>(
        &self,
        stream: &Stream,
        src: &DeviceBuffer<T>,
        dst: &DeviceBuffer<T>,
        count: usize,
    ) -> Result<LaunchHandle> {
        let launch = self.prepare(CollectiveKind::AllGatherRead, stream, src, dst, count)?;
        self.issue(stream, launch, |launch| ring_allgather_read(launch))
    }

    /// Reduce `count` elements across all devices with `op`.
    ///
    /// The result lands in slice `rank * count` of `dst`, which must hold at
    /// least `world_size * count` elements; the other slices hold the
    /// gathered contributions.
    pub fn all_reduce<T: Element>(
        &self,
        stream: &Stream,
        src: &DeviceBuffer<T>,
        dst: &DeviceBuffer<T>,
        count: usize,
        op: ReduceOp,
    ) -> Result<LaunchHandle> {
        let launch = self.prepare(CollectiveKind::AllReduce, stream, src, dst, count)?;
        self.issue(stream, launch, move |launch| ring_allreduce(launch, op))
    }

    /// Record this device's completion event on `stream`.
    pub fn record(&self, stream: &Stream) -> Result<()> {
        self.event.record(stream)
    }

    /// Wait for the most recently recorded completion event.
    pub async fn synchronize(&self) {
        self.event.synchronize().await
    }

    /// Validate a launch and take its buffers.
    fn prepare<T: Element>(
        &self,
        kind: CollectiveKind,
        stream: &Stream,
        src: &DeviceBuffer<T>,
        dst: &DeviceBuffer<T>,
        count: usize,
    ) -> Result<RingLaunch<T>> {
        let device = self.device();
        let rank = self.rank();
        if self.config.traces(TraceMask::API) {
            tracing::debug!(
                operation = %kind,
                device,
                rank,
                count,
                dtype = %T::DATA_TYPE,
                "collective issued"
            );
        }

        for actual in [stream.device(), src.device(), dst.device()] {
            if actual != device {
                return Err(CliqueError::WrongDevice {
                    expected: device,
                    actual,
                });
            }
        }
        if src.same_storage(dst) {
            return Err(CliqueError::AliasedBuffers { operation: kind });
        }
        if src.len() < count {
            return Err(CliqueError::BufferSizeMismatch {
                expected: count,
                actual: src.len(),
            });
        }
        let needed = (self.world_size() as usize)
            .checked_mul(count)
            .ok_or_else(|| CliqueError::geometry(format!("{count} elements per rank overflow")))?;
        if dst.len() < needed {
            return Err(CliqueError::BufferSizeMismatch {
                expected: needed,
                actual: dst.len(),
            });
        }
        self.pool.ring()?;

        let plan = LaunchPlan::for_element::<T>(count, &self.config)?;
        let src = src.begin_read()?;
        let dst = dst.begin_write()?;

        Ok(RingLaunch {
            kind,
            pool: Arc::clone(&self.pool),
            rank,
            epoch: 0,
            plan,
            src,
            dst,
            config: self.config.clone(),
        })
    }

    /// Enqueue `launch` on `stream`, binding the communicator to the stream
    /// once the enqueue succeeds.
    fn issue<T: Element>(
        &self,
        stream: &Stream,
        mut launch: RingLaunch<T>,
        run: impl FnOnce(&RingLaunch<T>) -> Result<()> + Send + 'static,
    ) -> Result<LaunchHandle> {
        let mut bound = self
            .stream
            .lock()
            .map_err(|_| CliqueError::LockPoisoned("communicator stream"))?;
        if let Some(id) = *bound
            && id != stream.id()
        {
            return Err(CliqueError::ForeignStream {
                rank: launch.rank,
                bound: id,
                actual: stream.id(),
            });
        }

        let (kind, rank) = (launch.kind, launch.rank);
        let block = Arc::clone(&self.block);
        let handle = stream.launch(kind, rank, move || {
            launch.epoch = block.next_epoch();
            run(&launch)
        })?;
        *bound = Some(stream.id());
        Ok(handle)
    }
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("device", &self.device())
            .field("rank", &self.rank())
            .field("world_size", &self.world_size())
            .field("stream", &self.stream.lock().ok().and_then(|id| *id))
            .finish()
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        self.pool.release(self.rank());
    }
}
