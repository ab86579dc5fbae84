//! The ring traversal shared by every collective.
//!
//! One launch on one device runs these phases per group:
//!
//! 1. group 0 publishes this launch's buffer handle in the device's own
//!    control block, tagged with the launch epoch
//! 2. every group copies its part of the own contribution into the own
//!    rank slice of the destination
//! 3. the group walks the ring from `next`: it waits until the neighbor has
//!    published for the same epoch, moves its part of the data, tells the
//!    neighbor it is done, and advances; the walk ends back at the device
//!    itself after N - 1 hops
//!
//! After all groups are done the device drains: it waits until every group of
//! every peer has reported in on its own slot, so no peer still touches its
//! buffers once the launch completes.

use std::sync::Arc;
use std::thread;

use crate::collective::helpers::{copy_group, group_barrier, keep_first, spin_until};
use crate::config::{CliqueConfig, TraceMask};
use crate::error::{CliqueError, Result};
use crate::launch::LaunchPlan;
use crate::memory::LaunchGuard;
use crate::reduce::Element;
use crate::tracker::{BufferSlot, ControlBlock, RingLink, TrackerPool};
use crate::types::{CollectiveKind, Rank};

/// How data moves on a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hop {
    /// Write the own contribution into the neighbor's published destination.
    Deposit,
    /// Read the neighbor's published source into the own destination.
    Fetch,
}

impl Hop {
    fn of(kind: CollectiveKind) -> Self {
        match kind {
            CollectiveKind::AllGather | CollectiveKind::AllReduce => Hop::Deposit,
            CollectiveKind::AllGatherRead => Hop::Fetch,
        }
    }
}

/// Everything one device needs to run its side of a ring collective.
pub(crate) struct RingLaunch<T: Element> {
    pub(crate) kind: CollectiveKind,
    pub(crate) pool: Arc<TrackerPool>,
    pub(crate) rank: Rank,
    pub(crate) epoch: u64,
    pub(crate) plan: LaunchPlan,
    pub(crate) src: LaunchGuard<T>,
    pub(crate) dst: LaunchGuard<T>,
    pub(crate) config: CliqueConfig,
}

impl<T: Element> RingLaunch<T> {
    /// Run every group of the launch, then drain.
    ///
    /// A launch with no groups (`count == 0`) neither publishes nor drains;
    /// its peers plan zero groups as well and never look at this device.
    pub(crate) fn execute(&self) -> Result<()> {
        if self.plan.total_groups == 0 {
            return Ok(());
        }
        let ring = self.pool.ring()?;
        let me = ring
            .get(self.rank as usize)
            .ok_or(CliqueError::InvalidRank {
                rank: self.rank,
                group_size: ring.len() as u32,
            })?;

        if self.config.traces(TraceMask::KERNEL) {
            tracing::debug!(
                operation = %self.kind,
                device = me.device(),
                rank = self.rank,
                epoch = self.epoch,
                groups = self.plan.total_groups,
                vector_groups = self.plan.vector_groups,
                scalar_remainder = self.plan.scalar_remainder,
                workers = self.plan.workers_per_group,
                "ring launch"
            );
        }

        let result = self.run_groups(ring, me);
        self.drain(me, ring.len());
        result
    }

    fn hop(&self) -> Hop {
        Hop::of(self.kind)
    }

    /// The slot this launch publishes in (and peers report to).
    fn slot<'a>(&self, block: &'a ControlBlock) -> &'a BufferSlot {
        match self.hop() {
            Hop::Deposit => block.recv_slot(),
            Hop::Fetch => block.send_slot(),
        }
    }

    fn run_groups(&self, ring: &[Arc<ControlBlock>], me: &ControlBlock) -> Result<()> {
        let total = self.plan.total_groups;
        let units = self.config.compute_units.clamp(1, total);

        thread::scope(|scope| {
            // Unit 0 owns group 0, which publishes; it always runs here.
            let mut inline = vec![0];
            let mut workers = Vec::with_capacity(units - 1);
            for unit in 1..units {
                let spawned = thread::Builder::new()
                    .name(format!("clique-{}-u{unit}", me.device()))
                    .spawn_scoped(scope, move || self.run_unit(ring, me, unit, units));
                match spawned {
                    Ok(worker) => workers.push(worker),
                    Err(e) => {
                        tracing::warn!(
                            device = me.device(),
                            unit,
                            error = %e,
                            "compute unit spawn failed, running its groups inline"
                        );
                        inline.push(unit);
                    }
                }
            }

            let mut result = Ok(());
            for unit in inline {
                keep_first(&mut result, self.run_unit(ring, me, unit, units));
            }
            for worker in workers {
                let joined = worker.join().unwrap_or_else(|_| {
                    Err(CliqueError::launch_failed(
                        self.kind,
                        self.rank,
                        "compute unit panicked",
                    ))
                });
                keep_first(&mut result, joined);
            }
            result
        })
    }

    /// Groups `unit, unit + units, ...`, in order.
    fn run_unit(
        &self,
        ring: &[Arc<ControlBlock>],
        me: &ControlBlock,
        unit: usize,
        units: usize,
    ) -> Result<()> {
        let mut result = Ok(());
        for g in (unit..self.plan.total_groups).step_by(units) {
            keep_first(&mut result, self.run_group(ring, me, g));
        }
        result
    }

    /// One group: publish (group 0), self-combine, walk.
    ///
    /// A group that finds a peer's buffer too small skips that hop's copy but
    /// still reports in and keeps walking, so the rest of the ring finishes.
    fn run_group(&self, ring: &[Arc<ControlBlock>], me: &ControlBlock, g: usize) -> Result<()> {
        let count = self.plan.count;
        let own = self.rank as usize;
        let src = self.src.buffer().as_mut_ptr().cast_const();
        let dst = self.dst.buffer().as_mut_ptr();

        if g == 0 {
            self.publish(me);
        }
        group_barrier();

        // SAFETY: the source holds at least `count` elements and the
        // destination at least `N * count` (checked when the launch was
        // issued); this device is the only writer of its own rank slice.
        unsafe { copy_group(&self.plan, g, src, 0, dst, own * count) };
        group_barrier();

        let mut result = Ok(());
        let mut at = successor(me, own);
        while at != own {
            let peer = &ring[at];
            let slot = self.slot(peer);
            let published = spin_until(self.config.spin_yield_interval, || {
                slot.published_for(self.epoch)
            });
            group_barrier();

            match self.hop() {
                Hop::Deposit => {
                    let needed = (own + 1) * count;
                    if published.len < needed {
                        keep_first(&mut result, Err(self.short_peer(peer, published.len, needed)));
                    } else {
                        // SAFETY: the peer's destination stays alive and
                        // untouched by its host until it has drained this
                        // group's arrival; slice `own` is written by this
                        // device only.
                        unsafe {
                            copy_group(
                                &self.plan,
                                g,
                                src,
                                0,
                                published.addr as *mut T,
                                own * count,
                            )
                        };
                    }
                }
                Hop::Fetch => {
                    if published.len < count {
                        keep_first(&mut result, Err(self.short_peer(peer, published.len, count)));
                    } else {
                        // SAFETY: the peer's source stays alive until it has
                        // drained this group's arrival; the peer's rank slice
                        // of the own destination is written by this device
                        // only.
                        unsafe {
                            copy_group(
                                &self.plan,
                                g,
                                published.addr as *const T,
                                0,
                                dst,
                                peer.rank() as usize * count,
                            )
                        };
                    }
                }
            }
            slot.arrive();
            group_barrier();
            at = successor(peer, own);
        }
        result
    }

    fn publish(&self, me: &ControlBlock) {
        let buffer = match self.hop() {
            Hop::Deposit => self.dst.buffer(),
            Hop::Fetch => self.src.buffer(),
        };
        self.slot(me).publish(buffer.addr(), buffer.len(), self.epoch);
    }

    /// Wait until every group of every peer has reported in.
    fn drain(&self, me: &ControlBlock, ranks: usize) {
        let expected = (ranks - 1) * self.plan.total_groups;
        let slot = self.slot(me);
        spin_until(self.config.spin_yield_interval, || {
            (slot.arrivals() >= expected).then_some(())
        });
        if self.config.traces(TraceMask::INTERNAL) {
            tracing::debug!(
                operation = %self.kind,
                rank = self.rank,
                epoch = self.epoch,
                arrivals = expected,
                "drained"
            );
        }
    }

    fn short_peer(&self, peer: &ControlBlock, published: usize, needed: usize) -> CliqueError {
        CliqueError::launch_failed(
            self.kind,
            self.rank,
            format!(
                "rank {} published {published} elements, launch needs {needed}",
                peer.rank()
            ),
        )
    }
}

/// Ring index after `block`; a block without links ends the walk.
fn successor(block: &ControlBlock, own: usize) -> usize {
    block.next().map_or(own, RingLink::index)
}
