pub mod errors;
pub mod sync;
pub mod x11;
pub mod window;
pub mod session;
pub mod pipeline;
pub mod compositor;
pub mod runtime;

// Re-export key types
pub use compositor::Compositor;
pub use pipeline::{FramePipeline, PipelineStats};
pub use runtime::{EventSource, FrameTiming, FrameTimingConfig, QueuedEvents, Runtime};
pub use session::{CompositorSession, EventOutcome, PropertyChange, Redirector, SessionEvent};
