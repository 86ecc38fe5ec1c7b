//! Central compositor state machine.
//!
//! The `Compositor` struct ties the pieces of one session together:
//! - the window session (stacking, damage, unredirection)
//! - the frame pipeline and its fence ring
//! - the redirector that applies composite changes on the display
//!
//! Drivers feed it display events and call `pre_paint` / `post_paint`
//! around every frame they submit to the GPU.

use crate::config::CompositorConfig;
use crate::core::errors::Result;
use crate::core::pipeline::FramePipeline;
use crate::core::session::{CompositorSession, EventOutcome, Redirector, SessionEvent};
use crate::core::sync::{DisplaySync, GpuSync};
use crate::util::geometry::Rect;
use crate::util::logging::COMPOSITOR;

/// The main compositor object.
pub struct Compositor<D: DisplaySync, G: GpuSync, R: Redirector> {
    config: CompositorConfig,
    session: CompositorSession,
    pipeline: FramePipeline<D, G>,
    redirector: R,
}

impl<D: DisplaySync, G: GpuSync, R: Redirector> Compositor<D, G, R> {
    /// Create a compositor for a screen of the given size.
    pub fn new(config: CompositorConfig, display: D, gpu: G, redirector: R, screen: Rect) -> Self {
        let session = CompositorSession::new(
            screen,
            config.full_damage_threshold,
            config.unredirect_enabled,
        );
        let pipeline = FramePipeline::new(display, gpu, config.sync.clone());

        crate::wlog!(
            COMPOSITOR,
            "Compositor started on {}x{} screen, frame sync: {}",
            screen.width,
            screen.height,
            if pipeline.synchronization_available() { "fences" } else { "XSync" }
        );

        Self {
            config,
            session,
            pipeline,
            redirector,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn session(&self) -> &CompositorSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut CompositorSession {
        &mut self.session
    }

    pub fn pipeline(&self) -> &FramePipeline<D, G> {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut FramePipeline<D, G> {
        &mut self.pipeline
    }

    pub fn redirector(&self) -> &R {
        &self.redirector
    }

    pub fn redirector_mut(&mut self) -> &mut R {
        &mut self.redirector
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Route one display event. Alarm notifications go to the fence ring
    /// before anything else looks at them.
    pub fn process_event(&mut self, event: &SessionEvent) -> Result<EventOutcome> {
        if let SessionEvent::AlarmNotify(notify) = event {
            if !self.pipeline.handle_event(notify) {
                tracing::trace!("Ignoring alarm {:#x} not owned by the fence ring", notify.alarm.0);
            }
            return Ok(EventOutcome::Unchanged);
        }

        let outcome = self.session.process_event(event, &mut self.redirector)?;
        if outcome == EventOutcome::Damaged {
            self.pipeline.mark_surfaces_updated();
        }
        Ok(outcome)
    }

    // =========================================================================
    // Frame Hooks
    // =========================================================================

    /// Everything that must happen before this frame is submitted to the GPU.
    pub fn pre_paint(&mut self) -> Result<()> {
        if self.session.update_unredirect(&mut self.redirector)? {
            self.pipeline.mark_surfaces_updated();
        }
        self.session.pre_paint_windows(&mut self.redirector)?;
        self.pipeline.pre_paint()?;
        Ok(())
    }

    /// Everything that must happen after this frame was submitted.
    pub fn post_paint(&mut self) {
        self.pipeline.post_paint();
    }

    /// Prevent full-screen windows from bypassing compositing. Calls nest.
    pub fn disable_unredirect(&mut self) {
        self.session.disable_unredirect();
    }

    pub fn enable_unredirect(&mut self) {
        self.session.enable_unredirect();
    }
}
