mod event;
mod handle;
mod plan;
mod stream;

pub use event::Event;
pub use handle::{LaunchGroup, LaunchHandle};
pub use plan::{LaunchPlan, WORKERS_PER_GROUP};
pub use stream::Stream;
