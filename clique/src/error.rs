use crate::types::{CollectiveKind, DeviceId, Rank};

pub type Result<T> = std::result::Result<T, CliqueError>;

#[derive(Debug, thiserror::Error)]
pub enum CliqueError {
    #[error("coherent allocation of {what} failed: {source}")]
    Alloc {
        what: &'static str,
        #[source]
        source: std::collections::TryReserveError,
    },

    #[error("a clique needs at least one device")]
    EmptyClique,

    #[error("device {device} appears more than once in the clique")]
    DuplicateDevice { device: DeviceId },

    #[error("device {device} is not registered in this pool")]
    UnknownDevice { device: DeviceId },

    #[error("invalid rank {rank}: group size is {group_size}")]
    InvalidRank { rank: Rank, group_size: u32 },

    #[error("rank {rank} is already registered")]
    DuplicateRank { rank: Rank },

    #[error("group size mismatch: pool expects {expected} devices, caller declared {actual}")]
    GroupSizeMismatch { expected: u32, actual: u32 },

    #[error("ring is incomplete: {registered}/{expected} devices registered")]
    RingIncomplete { registered: u32, expected: u32 },

    #[error("invalid launch geometry: {reason}")]
    InvalidLaunchGeometry { reason: String },

    #[error("buffer size mismatch: expected at least {expected} elements, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("buffer lives on device {actual}, communicator is bound to device {expected}")]
    WrongDevice { expected: DeviceId, actual: DeviceId },

    #[error("buffer on device {device} is in use by {in_flight} in-flight launch(es)")]
    BufferInUse { device: DeviceId, in_flight: usize },

    #[error("{operation}: source and destination are the same buffer")]
    AliasedBuffers { operation: CollectiveKind },

    #[error("stream for device {device} is closed")]
    StreamClosed { device: DeviceId },

    #[error("communicator for rank {rank} is bound to stream {bound}, launch used stream {actual}")]
    ForeignStream { rank: Rank, bound: u64, actual: u64 },

    #[error("{operation} failed at rank {rank}: {reason}")]
    LaunchFailed {
        operation: CollectiveKind,
        rank: Rank,
        reason: String,
    },

    #[error("internal lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliqueError {
    /// Create an `InvalidLaunchGeometry` error.
    pub fn geometry(reason: impl Into<String>) -> Self {
        Self::InvalidLaunchGeometry {
            reason: reason.into(),
        }
    }

    /// Create a `LaunchFailed` error.
    pub fn launch_failed(operation: CollectiveKind, rank: Rank, reason: impl Into<String>) -> Self {
        Self::LaunchFailed {
            operation,
            rank,
            reason: reason.into(),
        }
    }
}
