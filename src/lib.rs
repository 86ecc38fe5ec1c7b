// xsync-compositor
//
// X11 compositor core: window redirection, damage tracking and the
// X server / GPU fence ring that keeps frames from racing X drawing.

pub mod core;
pub mod config;
pub mod util;
pub mod prelude;

pub use crate::config::{CompositorConfig, SyncConfig};
pub use crate::core::{Compositor, FramePipeline, Runtime};

#[cfg(test)]
mod tests;
