//! Runtime and event loop integration.
//!
//! This module provides the loop infrastructure for the compositor.
//! It handles:
//! - Display event dispatching
//! - Frame timing
//! - Running one frame through the pre-paint / paint / post-paint hooks

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::core::compositor::Compositor;
use crate::core::errors::Result;
use crate::core::session::{CompositorSession, Redirector, SessionEvent};
use crate::core::sync::{DisplaySync, GpuSync};

// ============================================================================
// Event Sources
// ============================================================================

/// Anything that produces display events for the session.
pub trait EventSource {
    /// Every event available right now. Never blocks.
    fn poll_events(&mut self) -> Result<Vec<SessionEvent>>;
}

/// Event source fed by hand; used by the headless binary and tests.
#[derive(Debug, Default)]
pub struct QueuedEvents {
    queue: VecDeque<SessionEvent>,
}

impl QueuedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: SessionEvent) {
        self.queue.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl EventSource for QueuedEvents {
    fn poll_events(&mut self) -> Result<Vec<SessionEvent>> {
        Ok(self.queue.drain(..).collect())
    }
}

// ============================================================================
// Frame Timing
// ============================================================================

/// Frame timing configuration
#[derive(Debug, Clone)]
pub struct FrameTimingConfig {
    /// Target frame interval (default: 16.67ms for 60Hz)
    pub target_interval: Duration,
    /// Maximum frame time before forcing a frame
    pub max_frame_time: Duration,
}

impl Default for FrameTimingConfig {
    fn default() -> Self {
        Self {
            target_interval: Duration::from_nanos(16_666_667), // 60Hz
            max_frame_time: Duration::from_millis(100),
        }
    }
}

impl FrameTimingConfig {
    /// Create config for a specific refresh rate
    pub fn for_refresh_rate(hz: u32) -> Self {
        Self {
            target_interval: Duration::from_nanos(1_000_000_000 / hz.max(1) as u64),
            ..Default::default()
        }
    }
}

/// Frame timing state
pub struct FrameTiming {
    config: FrameTimingConfig,
    last_frame: Instant,
    frame_count: u64,
    total_frames: u64,
    fps_update_time: Instant,
    current_fps: f64,
}

impl FrameTiming {
    pub fn new(config: FrameTimingConfig) -> Self {
        let now = Instant::now();
        Self {
            config,
            last_frame: now,
            frame_count: 0,
            total_frames: 0,
            fps_update_time: now,
            current_fps: 0.0,
        }
    }

    /// Check if it's time for a new frame
    pub fn should_render(&self) -> bool {
        let elapsed = self.last_frame.elapsed();
        elapsed >= self.config.target_interval || elapsed >= self.config.max_frame_time
    }

    /// Mark frame as started; returns the frame number.
    pub fn begin_frame(&mut self) -> u64 {
        self.frame_count += 1;
        self.total_frames += 1;
        self.total_frames
    }

    /// Mark frame as complete
    pub fn end_frame(&mut self) {
        let now = Instant::now();
        self.last_frame = now;

        // Update FPS every second
        let fps_elapsed = now.duration_since(self.fps_update_time);
        if fps_elapsed >= Duration::from_secs(1) {
            self.current_fps = self.frame_count as f64 / fps_elapsed.as_secs_f64();
            self.frame_count = 0;
            self.fps_update_time = now;
        }
    }

    /// Get current FPS
    pub fn fps(&self) -> f64 {
        self.current_fps
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Get time until next frame
    pub fn time_until_next_frame(&self) -> Duration {
        let elapsed = self.last_frame.elapsed();
        if elapsed >= self.config.target_interval {
            Duration::ZERO
        } else {
            self.config.target_interval - elapsed
        }
    }
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self::new(FrameTimingConfig::default())
    }
}

// ============================================================================
// Main Runtime
// ============================================================================

/// The compositor runtime.
///
/// Drivers should:
/// 1. Call `dispatch()` whenever the display connection is readable
/// 2. Call `render_frame()` when `should_render()` says so
pub struct Runtime {
    frame_timing: FrameTiming,
    needs_redraw: bool,
}

impl Runtime {
    /// Create a new runtime
    pub fn new() -> Self {
        Self::with_frame_timing(FrameTimingConfig::default())
    }

    /// Create runtime with custom frame timing
    pub fn with_frame_timing(config: FrameTimingConfig) -> Self {
        Self {
            frame_timing: FrameTiming::new(config),
            needs_redraw: true,
        }
    }

    // =========================================================================
    // Event Loop Integration
    // =========================================================================

    /// Feed every pending event into the compositor. Returns how many were
    /// processed.
    pub fn dispatch<D, G, R, E>(
        &mut self,
        compositor: &mut Compositor<D, G, R>,
        source: &mut E,
    ) -> Result<usize>
    where
        D: DisplaySync,
        G: GpuSync,
        R: Redirector,
        E: EventSource,
    {
        let events = source.poll_events()?;
        for event in &events {
            if compositor.process_event(event)?.needs_repaint() {
                self.needs_redraw = true;
            }
        }
        Ok(events.len())
    }

    /// Run one frame: pre-paint, the caller's painting, post-paint.
    pub fn render_frame<D, G, R, F>(
        &mut self,
        compositor: &mut Compositor<D, G, R>,
        paint: F,
    ) -> Result<u64>
    where
        D: DisplaySync,
        G: GpuSync,
        R: Redirector,
        F: FnOnce(&CompositorSession),
    {
        self.needs_redraw = false;
        let frame = self.frame_timing.begin_frame();

        compositor.pre_paint()?;
        paint(compositor.session());
        compositor.post_paint();

        self.frame_timing.end_frame();
        Ok(frame)
    }

    // =========================================================================
    // Frame Timing
    // =========================================================================

    /// Check if it's time to render a new frame
    pub fn should_render(&self) -> bool {
        self.needs_redraw && self.frame_timing.should_render()
    }

    /// Request a redraw
    pub fn request_redraw(&mut self) {
        self.needs_redraw = true;
    }

    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    /// Get current FPS
    pub fn fps(&self) -> f64 {
        self.frame_timing.fps()
    }

    pub fn total_frames(&self) -> u64 {
        self.frame_timing.total_frames()
    }

    /// Get time until next frame
    pub fn time_until_next_frame(&self) -> Duration {
        self.frame_timing.time_until_next_frame()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompositorConfig;
    use crate::core::session::RecordingRedirector;
    use crate::core::sync::MemorySync;
    use crate::util::geometry::Rect;

    #[test]
    fn test_frame_timing_config() {
        let config = FrameTimingConfig::for_refresh_rate(120);
        assert!(config.target_interval < Duration::from_millis(10));
        assert_eq!(
            FrameTimingConfig::for_refresh_rate(0).target_interval,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_frame_counting() {
        let mut timing = FrameTiming::default();
        assert_eq!(timing.begin_frame(), 1);
        timing.end_frame();
        assert_eq!(timing.begin_frame(), 2);
        timing.end_frame();
        assert_eq!(timing.total_frames(), 2);
        assert!(timing.time_until_next_frame() <= Duration::from_nanos(16_666_667));
    }

    #[test]
    fn test_scene_changes_request_redraw() {
        let backend = MemorySync::new();
        let mut compositor = Compositor::new(
            CompositorConfig::default(),
            backend.clone(),
            backend,
            RecordingRedirector::new(),
            Rect::new(0, 0, 800, 600),
        );
        let mut runtime = Runtime::new();
        let mut events = QueuedEvents::new();

        events.push(SessionEvent::WindowCreated {
            window: 0x10,
            geometry: Rect::new(0, 0, 200, 100),
            override_redirect: true,
            argb: false,
        });
        events.push(SessionEvent::WindowMapped { window: 0x10 });
        runtime.dispatch(&mut compositor, &mut events).unwrap();
        runtime.render_frame(&mut compositor, |_| {}).unwrap();
        assert!(!runtime.needs_redraw());

        // Nothing to draw for an empty dispatch
        runtime.dispatch(&mut compositor, &mut events).unwrap();
        assert!(!runtime.needs_redraw());

        events.push(SessionEvent::WindowConfigured {
            window: 0x10,
            geometry: Rect::new(50, 50, 200, 100),
            above: None,
        });
        runtime.dispatch(&mut compositor, &mut events).unwrap();
        assert!(runtime.needs_redraw());
        assert!(!compositor.pipeline().surfaces_updated_this_frame());
        runtime.render_frame(&mut compositor, |_| {}).unwrap();

        events.push(SessionEvent::WindowUnmapped { window: 0x10 });
        runtime.dispatch(&mut compositor, &mut events).unwrap();
        assert!(runtime.needs_redraw());
    }

    #[test]
    fn test_queued_events_drain() {
        let mut queue = QueuedEvents::new();
        assert!(queue.is_empty());
        queue.push(SessionEvent::WindowMapped { window: 1 });
        queue.push(SessionEvent::WindowUnmapped { window: 1 });
        assert_eq!(queue.len(), 2);

        let events = queue.poll_events().unwrap();
        assert_eq!(events.len(), 2);
        assert!(queue.is_empty());
    }
}
