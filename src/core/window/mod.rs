pub mod window;
pub mod tree;

pub use window::{BypassHint, CompositedWindow, OPAQUE};
pub use tree::WindowTree;
