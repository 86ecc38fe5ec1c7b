//! X server / GPU frame synchronization.

pub mod backend;
pub mod fence;
pub mod memory;
pub mod ring;

pub use backend::{AlarmId, AlarmNotify, Capabilities, DisplaySync, GpuSync, NoGpuSync, WaitStatus};
pub use fence::{FenceSlot, FenceState};
pub use memory::MemorySync;
pub use ring::{FenceRing, RingStats};

#[cfg(test)]
mod tests;
