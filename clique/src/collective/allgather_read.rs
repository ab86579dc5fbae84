use crate::collective::ring::RingLaunch;
use crate::error::Result;
use crate::reduce::Element;

/// Read-based ring allgather. Same result as
/// [`ring_allgather`](super::ring_allgather), with the direction reversed.
///
/// Each device publishes its *source* and, on every hop, copies the
/// neighbor's source into slice `neighbor_rank * count` of its own
/// destination. A device's destination is only ever written by itself.
/// The source stays valid until every peer has reported its read.
pub(crate) fn ring_allgather_read<T: Element>(launch: &RingLaunch<T>) -> Result<()> {
    launch.execute()
}
