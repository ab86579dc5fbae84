mod buffer;

pub use buffer::DeviceBuffer;
pub(crate) use buffer::LaunchGuard;
