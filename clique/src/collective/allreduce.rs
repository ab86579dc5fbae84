use std::ptr;

use crate::collective::ring::RingLaunch;
use crate::error::{CliqueError, Result};
use crate::reduce::{Element, fold_rank_slices};
use crate::types::ReduceOp;

/// Ring allreduce: afterwards slice `rank * count` of every device's
/// destination holds `op` folded over all contributions.
///
/// The ring phase is the allgather deposit: every contribution lands in its
/// own rank slice of every destination, so peers never race on a cell. Once
/// the drain confirms all deposits, each device folds the N slices in rank
/// order into its own slice. The fold order does not depend on where a
/// device sits in the ring, so floating-point results are bit-identical on
/// every device.
///
/// The other slices keep the gathered contributions.
pub(crate) fn ring_allreduce<T: Element>(launch: &RingLaunch<T>, op: ReduceOp) -> Result<()> {
    launch.execute()?;

    let count = launch.plan.count;
    if count == 0 {
        return Ok(());
    }
    let ranks = launch.pool.group_size() as usize;
    let own = launch.rank as usize;

    let mut folded = Vec::new();
    folded
        .try_reserve_exact(count)
        .map_err(|source| CliqueError::Alloc {
            what: "allreduce scratch",
            source,
        })?;
    folded.resize(count, T::default());

    let dst = launch.dst.buffer().as_mut_ptr();
    {
        // SAFETY: the launch holds the destination exclusively, it spans at
        // least `ranks * count` elements, and the drain has confirmed that
        // no peer writes into it any more.
        let gathered = unsafe { std::slice::from_raw_parts(dst.cast_const(), ranks * count) };
        fold_rank_slices(gathered, ranks, count, op, &mut folded);
    }
    // SAFETY: as above; the shared view ended with the block.
    unsafe { ptr::copy_nonoverlapping(folded.as_ptr(), dst.add(own * count), count) };
    Ok(())
}
