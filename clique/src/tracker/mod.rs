mod control;
mod pool;

pub use control::{BufferSlot, ControlBlock, Published, RingLink, RingLinks};
pub use pool::{BlockSnapshot, TrackerPool};
