use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::comm::Communicator;
use crate::config::{CliqueConfig, TraceMask};
use crate::error::{CliqueError, Result};
use crate::tracker::control::{ControlBlock, Published, RingLink, RingLinks};
use crate::types::{DeviceId, Rank};

/// Blocks registered so far and the ranks currently bound to a communicator.
#[derive(Default)]
struct Registry {
    blocks: BTreeMap<Rank, Arc<ControlBlock>>,
    bound: BTreeSet<Rank>,
}

/// Point-in-time view of one control block, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSnapshot {
    pub device: DeviceId,
    pub rank: Rank,
    pub prev: Option<usize>,
    pub next: Option<usize>,
    pub recv: Option<Published>,
    pub send: Option<Published>,
    pub launches: u64,
}

impl BlockSnapshot {
    fn of(block: &ControlBlock) -> Self {
        Self {
            device: block.device(),
            rank: block.rank(),
            prev: block.prev().map(RingLink::index),
            next: block.next().map(RingLink::index),
            recv: block.recv_slot().load(),
            send: block.send_slot().load(),
            launches: block.launches(),
        }
    }
}

/// Owns the control blocks of one clique and wires them into a ring.
///
/// Two ways to build the ring:
/// - [`TrackerPool::new`] wires all N blocks at once from an ordered device list.
/// - [`TrackerPool::with_group_size`] + [`TrackerPool::add_device`] lets each
///   device register independently; the ring is wired when the N-th device
///   arrives and is unusable before that.
///
/// Links never change after wiring. Blocks live as long as the pool, which
/// lives as long as any communicator bound to it.
pub struct TrackerPool {
    group_size: u32,
    config: CliqueConfig,
    registry: Mutex<Registry>,
    ring: OnceLock<Box<[Arc<ControlBlock>]>>,
    device_ids: OnceLock<Box<[DeviceId]>>,
    active_devices: AtomicU32,
}

impl TrackerPool {
    /// Build a fully wired ring over `device_ids`, in order.
    ///
    /// Block `i` links to `(i + 1) mod N` and `(i - 1) mod N`; a single device
    /// links to itself.
    pub fn new(device_ids: &[DeviceId], config: CliqueConfig) -> Result<Arc<Self>> {
        if device_ids.is_empty() {
            return Err(CliqueError::EmptyClique);
        }
        let mut seen = HashSet::with_capacity(device_ids.len());
        for &device in device_ids {
            if !seen.insert(device) {
                return Err(CliqueError::DuplicateDevice { device });
            }
        }

        let mut blocks = Vec::new();
        blocks
            .try_reserve_exact(device_ids.len())
            .map_err(|source| CliqueError::Alloc {
                what: "control blocks",
                source,
            })?;
        for (rank, &device) in device_ids.iter().enumerate() {
            blocks.push(Arc::new(ControlBlock::new(device, rank as Rank)));
        }

        let pool = Self::empty(device_ids.len() as u32, config);
        {
            let mut reg = pool.lock_registry()?;
            reg.blocks = blocks
                .iter()
                .map(|b| (b.rank(), Arc::clone(b)))
                .collect();
        }
        pool.finalize(blocks);

        if pool.config.traces(TraceMask::API) {
            tracing::debug!(devices = ?device_ids, "tracker pool created");
        }
        Ok(Arc::new(pool))
    }

    /// Create an empty pool that will hold `group_size` devices registered
    /// through [`add_device`](Self::add_device).
    pub fn with_group_size(group_size: u32, config: CliqueConfig) -> Result<Arc<Self>> {
        if group_size == 0 {
            return Err(CliqueError::EmptyClique);
        }
        Ok(Arc::new(Self::empty(group_size, config)))
    }

    fn empty(group_size: u32, config: CliqueConfig) -> Self {
        Self {
            group_size,
            config,
            registry: Mutex::new(Registry::default()),
            ring: OnceLock::new(),
            device_ids: OnceLock::new(),
            active_devices: AtomicU32::new(0),
        }
    }

    /// Register `device` under `rank` and return its communicator.
    ///
    /// The ring is wired once exactly `ndev` devices are registered; until
    /// then, launches through any returned communicator fail with
    /// `RingIncomplete`. Registrations from different threads are serialized
    /// by the pool.
    pub fn add_device(
        self: &Arc<Self>,
        device: DeviceId,
        rank: Rank,
        ndev: u32,
    ) -> Result<Communicator> {
        if ndev != self.group_size {
            return Err(CliqueError::GroupSizeMismatch {
                expected: self.group_size,
                actual: ndev,
            });
        }
        if rank >= ndev {
            return Err(CliqueError::InvalidRank {
                rank,
                group_size: ndev,
            });
        }

        let block = {
            let mut reg = self.lock_registry()?;
            if reg.blocks.contains_key(&rank) {
                return Err(CliqueError::DuplicateRank { rank });
            }
            if reg.blocks.values().any(|b| b.device() == device) {
                return Err(CliqueError::DuplicateDevice { device });
            }

            let block = Arc::new(ControlBlock::new(device, rank));
            reg.blocks.insert(rank, Arc::clone(&block));
            reg.bound.insert(rank);
            self.active_devices.fetch_add(1, Ordering::AcqRel);

            if self.config.traces(TraceMask::INTERNAL) {
                tracing::debug!(
                    device,
                    rank,
                    registered = reg.blocks.len(),
                    expected = ndev,
                    "device registered"
                );
            }

            if reg.blocks.len() == ndev as usize {
                let ordered: Vec<Arc<ControlBlock>> = reg.blocks.values().cloned().collect();
                self.finalize(ordered);
            }
            block
        };

        Ok(Communicator::new(Arc::clone(self), block))
    }

    /// Bind a communicator to an already-registered device.
    pub fn communicator(self: &Arc<Self>, device: DeviceId) -> Result<Communicator> {
        let block = self
            .get_pool_by_device_index(device)
            .ok_or(CliqueError::UnknownDevice { device })?;
        let rank = block.rank();
        {
            let mut reg = self.lock_registry()?;
            if !reg.bound.insert(rank) {
                return Err(CliqueError::DuplicateRank { rank });
            }
        }
        self.active_devices.fetch_add(1, Ordering::AcqRel);
        Ok(Communicator::new(Arc::clone(self), block))
    }

    /// One communicator per device, in ring order.
    pub fn communicators(self: &Arc<Self>) -> Result<Vec<Communicator>> {
        let devices = self.ring()?.iter().map(|b| b.device()).collect::<Vec<_>>();
        devices.into_iter().map(|d| self.communicator(d)).collect()
    }

    /// Resolve a device identifier to its control block (linear scan).
    ///
    /// Returns `None` if the device is not registered.
    pub fn get_pool_by_device_index(&self, device: DeviceId) -> Option<Arc<ControlBlock>> {
        if let (Some(ids), Some(ring)) = (self.device_ids.get(), self.ring.get()) {
            return ids
                .iter()
                .position(|&d| d == device)
                .map(|i| Arc::clone(&ring[i]));
        }
        let reg = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        reg.blocks.values().find(|b| b.device() == device).cloned()
    }

    /// The wired ring, indexed by rank.
    pub fn ring(&self) -> Result<&[Arc<ControlBlock>]> {
        match self.ring.get() {
            Some(ring) => Ok(ring),
            None => Err(CliqueError::RingIncomplete {
                registered: self.registered(),
                expected: self.group_size,
            }),
        }
    }

    /// Device identifiers in ring order, once the ring is wired.
    pub fn device_ids(&self) -> Option<&[DeviceId]> {
        self.device_ids.get().map(|ids| &**ids)
    }

    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    /// Devices registered so far.
    pub fn registered(&self) -> u32 {
        let reg = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        reg.blocks.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.ring.get().is_some()
    }

    /// Communicators currently bound to this pool.
    pub fn active_devices(&self) -> u32 {
        self.active_devices.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &CliqueConfig {
        &self.config
    }

    /// Snapshot of every registered block, in rank order.
    pub fn describe(&self) -> Vec<BlockSnapshot> {
        let reg = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        reg.blocks.values().map(|b| BlockSnapshot::of(b)).collect()
    }

    /// Emit one `info` event per block.
    pub fn log_all(&self) {
        for snap in self.describe() {
            tracing::info!(
                device = snap.device,
                rank = snap.rank,
                prev = ?snap.prev,
                next = ?snap.next,
                recv = ?snap.recv,
                send = ?snap.send,
                launches = snap.launches,
                "control block"
            );
        }
    }

    /// Unbind a communicator's rank. Called when the communicator drops.
    pub(crate) fn release(&self, rank: Rank) {
        let mut reg = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        if reg.bound.remove(&rank) {
            self.active_devices.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Wire `blocks` (in rank order) into a ring and publish it.
    fn finalize(&self, blocks: Vec<Arc<ControlBlock>>) {
        let n = blocks.len();
        for (i, block) in blocks.iter().enumerate() {
            let links = RingLinks {
                prev: RingLink((i + n - 1) % n),
                next: RingLink((i + 1) % n),
            };
            if !block.link(links) {
                tracing::warn!(rank = block.rank(), "control block was already linked");
            }
        }
        let ids: Box<[DeviceId]> = blocks.iter().map(|b| b.device()).collect();
        if self.config.traces(TraceMask::INTERNAL) {
            tracing::debug!(devices = ?ids, "ring wired");
        }
        let _ = self.device_ids.set(ids);
        let _ = self.ring.set(blocks.into_boxed_slice());
    }

    fn lock_registry(&self) -> Result<MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| CliqueError::LockPoisoned("tracker registry"))
    }
}

impl std::fmt::Debug for TrackerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackerPool")
            .field("group_size", &self.group_size)
            .field("registered", &self.registered())
            .field("complete", &self.is_complete())
            .field("active_devices", &self.active_devices())
            .finish()
    }
}
