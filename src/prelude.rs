//! Common imports and types used throughout the compositor.

pub use std::collections::HashMap;
pub use std::rc::Rc;

pub use crate::config::{CompositorConfig, SyncConfig};
pub use crate::core::session::{Redirector, SessionEvent};
pub use crate::core::sync::{DisplaySync, GpuSync};
pub use crate::util::geometry::Rect;

pub type Result<T> = std::result::Result<T, crate::core::errors::CoreError>;
