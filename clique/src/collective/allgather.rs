use crate::collective::ring::RingLaunch;
use crate::error::Result;
use crate::reduce::Element;

/// Ring allgather: each rank contributes `count` elements; afterwards every
/// destination holds all contributions concatenated in rank order.
///
/// Each device publishes its destination and writes its own contribution
/// straight into slice `rank * count` of every peer's destination, one peer
/// per hop. No data is forwarded: N - 1 hops, each moving `count` elements.
pub(crate) fn ring_allgather<T: Element>(launch: &RingLaunch<T>) -> Result<()> {
    launch.execute()
}
