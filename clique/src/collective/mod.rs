//! Ring collectives over the tracker pool's control blocks.

mod allgather;
mod allgather_read;
mod allreduce;
mod helpers;
mod ring;

pub(crate) use allgather::ring_allgather;
pub(crate) use allgather_read::ring_allgather_read;
pub(crate) use allreduce::ring_allreduce;
pub(crate) use ring::RingLaunch;
