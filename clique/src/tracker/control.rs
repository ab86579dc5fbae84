//! Per-device control blocks: ring links plus atomically published buffer
//! handles.
//!
//! Every block has exactly one writer, the device that owns it. Peers only
//! read the published handles and bump the arrival counter after they have
//! finished touching the published buffer.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::types::{DeviceId, Rank};

/// Address of a ring neighbor: its index in the pool's ring.
///
/// Every observer resolves the same index to the same block, so the link
/// needs no per-device address translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingLink(pub(crate) usize);

impl RingLink {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Previous/next neighbors of a block. Immutable once set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLinks {
    pub prev: RingLink,
    pub next: RingLink,
}

/// A buffer handle as seen by a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Published {
    /// Base address of the buffer's storage.
    pub addr: usize,
    /// Length of the buffer in elements.
    pub len: usize,
    /// Launch sequence number the handle was published for.
    pub epoch: u64,
}

/// Single-writer/multi-reader atomic buffer handle.
///
/// `addr == 0` means empty. The owner publishes `(addr, len)` and then the
/// launch `epoch`, all sequentially consistent; readers wait for the epoch of
/// their own launch, so a handle left over from an earlier launch is never
/// taken for the current one.
#[derive(Debug, Default)]
pub struct BufferSlot {
    addr: AtomicUsize,
    len: AtomicUsize,
    epoch: AtomicU64,
    arrivals: AtomicUsize,
}

impl BufferSlot {
    /// Overwrite the handle for launch `epoch`. Owner only.
    ///
    /// Resets the arrival counter first; peers only arrive after observing
    /// the new epoch, which is stored last.
    pub(crate) fn publish(&self, addr: usize, len: usize, epoch: u64) {
        self.arrivals.store(0, Ordering::SeqCst);
        self.addr.store(addr, Ordering::SeqCst);
        self.len.store(len, Ordering::SeqCst);
        self.epoch.store(epoch, Ordering::SeqCst);
    }

    /// The handle, if it has been published for exactly `epoch`.
    pub(crate) fn published_for(&self, epoch: u64) -> Option<Published> {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return None;
        }
        let addr = self.addr.load(Ordering::SeqCst);
        if addr == 0 {
            return None;
        }
        Some(Published {
            addr,
            len: self.len.load(Ordering::SeqCst),
            epoch,
        })
    }

    /// The most recent publication, or `None` if nothing was ever published.
    pub fn load(&self) -> Option<Published> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let addr = self.addr.load(Ordering::SeqCst);
        (addr != 0).then(|| Published {
            addr,
            len: self.len.load(Ordering::SeqCst),
            epoch,
        })
    }

    /// Record that one peer group finished with the published buffer.
    pub(crate) fn arrive(&self) {
        self.arrivals.fetch_add(1, Ordering::SeqCst);
    }

    /// Peer groups that finished with the current publication.
    pub fn arrivals(&self) -> usize {
        self.arrivals.load(Ordering::SeqCst)
    }
}

/// Per-device record enabling cross-device synchronization.
#[derive(Debug)]
pub struct ControlBlock {
    device: DeviceId,
    rank: Rank,
    links: OnceLock<RingLinks>,
    /// Destination buffer of the current launch (write-based collectives).
    recv: BufferSlot,
    /// Source buffer of the current launch (read-based allgather).
    send: BufferSlot,
    /// Launch sequence counter, advanced by the owner at enqueue time.
    launches: AtomicU64,
}

impl ControlBlock {
    pub(crate) fn new(device: DeviceId, rank: Rank) -> Self {
        Self {
            device,
            rank,
            links: OnceLock::new(),
            recv: BufferSlot::default(),
            send: BufferSlot::default(),
            launches: AtomicU64::new(0),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Ring links, or `None` before the ring is finalized.
    pub fn links(&self) -> Option<RingLinks> {
        self.links.get().copied()
    }

    pub fn next(&self) -> Option<RingLink> {
        self.links().map(|l| l.next)
    }

    pub fn prev(&self) -> Option<RingLink> {
        self.links().map(|l| l.prev)
    }

    pub fn recv_slot(&self) -> &BufferSlot {
        &self.recv
    }

    pub fn send_slot(&self) -> &BufferSlot {
        &self.send
    }

    /// Number of launches issued against this block so far.
    pub fn launches(&self) -> u64 {
        self.launches.load(Ordering::Acquire)
    }

    /// Wire the block into the ring. Returns `false` if it was already wired.
    pub(crate) fn link(&self, links: RingLinks) -> bool {
        self.links.set(links).is_ok()
    }

    /// Claim the epoch of the next launch.
    pub(crate) fn next_epoch(&self) -> u64 {
        self.launches.fetch_add(1, Ordering::AcqRel) + 1
    }
}
