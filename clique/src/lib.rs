//! Ring collectives (allgather, allreduce) over a clique of devices that
//! synchronize through shared control blocks instead of a coordinator.

mod collective;
pub mod comm;
pub mod config;
pub mod error;
pub mod launch;
pub mod memory;
pub mod reduce;
pub mod tracker;
pub mod types;

pub use comm::Communicator;
pub use config::{CliqueConfig, TraceMask};
pub use error::{CliqueError, Result};
pub use launch::{Event, LaunchGroup, LaunchHandle, LaunchPlan, Stream, WORKERS_PER_GROUP};
pub use memory::DeviceBuffer;
pub use reduce::Element;
pub use tracker::{BlockSnapshot, ControlBlock, TrackerPool};
pub use types::{CollectiveKind, DataType, DeviceId, Rank, ReduceOp};
