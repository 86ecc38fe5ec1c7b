//! Frame pipeline driver.
//!
//! Runs the synchronization half of every frame. Before GPU submission, a
//! frame whose window contents changed either inserts a fence wait or, when
//! fences are unavailable, round-trips to the X server. After submission the
//! ring is advanced. Any ring failure permanently downgrades the session to
//! the round-trip path.

use crate::config::SyncConfig;
use crate::core::errors::SyncError;
use crate::core::sync::{AlarmNotify, DisplaySync, FenceRing, GpuSync};
use crate::util::logging::SYNC;

/// Per-session frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub fenced_frames: u64,
    pub fallback_round_trips: u64,
}

pub struct FramePipeline<D: DisplaySync, G: GpuSync> {
    ring: FenceRing<D, G>,
    surfaces_updated_this_frame: bool,
    synchronization_available: bool,
    downgrade_logged: bool,
    stats: PipelineStats,
}

impl<D: DisplaySync, G: GpuSync> FramePipeline<D, G> {
    /// Build the fence ring and bring it up when fence sync is enabled.
    pub fn new(display: D, gpu: G, config: SyncConfig) -> Self {
        let enabled = config.enabled;
        let ring = FenceRing::new(display, gpu, config);
        let mut pipeline = Self {
            ring,
            surfaces_updated_this_frame: false,
            synchronization_available: false,
            downgrade_logged: false,
            stats: PipelineStats::default(),
        };

        if !enabled {
            tracing::info!("Fence synchronization disabled by configuration, using XSync fallback");
            return pipeline;
        }

        match pipeline.ring.initialize() {
            Ok(()) => pipeline.synchronization_available = true,
            Err(e) => {
                tracing::info!("Fence synchronization unavailable ({}), using XSync fallback", e);
            }
        }
        pipeline
    }

    pub fn ring(&self) -> &FenceRing<D, G> {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut FenceRing<D, G> {
        &mut self.ring
    }

    pub fn synchronization_available(&self) -> bool {
        self.synchronization_available
    }

    pub fn surfaces_updated_this_frame(&self) -> bool {
        self.surfaces_updated_this_frame
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Record that X-drawn window contents changed during this frame.
    pub fn mark_surfaces_updated(&mut self) {
        self.surfaces_updated_this_frame = true;
    }

    /// Forward an alarm notification to the ring.
    pub fn handle_event(&mut self, event: &AlarmNotify) -> bool {
        self.ring.handle_event(event)
    }

    /// Synchronization step before GPU submission.
    ///
    /// Only the round-trip fallback can fail here, and only when the
    /// display connection itself is broken.
    pub fn pre_paint(&mut self) -> Result<(), SyncError> {
        self.stats.frames += 1;
        if !self.surfaces_updated_this_frame {
            return Ok(());
        }

        if self.synchronization_available {
            match self.ring.insert_wait() {
                Ok(()) => {
                    self.stats.fenced_frames += 1;
                    return Ok(());
                }
                Err(e) => self.disable_synchronization(&e),
            }
        }

        // This frame still has to see the X server's drawing.
        self.stats.fallback_round_trips += 1;
        self.ring.display_mut().round_trip()
    }

    /// Synchronization step after the frame was submitted.
    pub fn post_paint(&mut self) {
        if self.surfaces_updated_this_frame && self.synchronization_available {
            if let Err(e) = self.ring.advance_after_frame() {
                self.disable_synchronization(&e);
            }
        }
        self.surfaces_updated_this_frame = false;
    }

    fn disable_synchronization(&mut self, reason: &SyncError) {
        self.synchronization_available = false;
        self.ring.shutdown();

        if !self.downgrade_logged {
            self.downgrade_logged = true;
            crate::wlog!(
                SYNC,
                "Fence synchronization failed ({}); falling back to XSync for this session",
                reason
            );
            tracing::warn!(
                "Fence ring stats at downgrade: {:?}, reboots {}",
                self.ring.stats(),
                self.ring.reboot_count()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sync::MemorySync;

    fn pipeline(config: SyncConfig) -> (FramePipeline<MemorySync, MemorySync>, MemorySync) {
        let backend = MemorySync::new();
        (FramePipeline::new(backend.clone(), backend.clone(), config), backend)
    }

    fn pump(p: &mut FramePipeline<MemorySync, MemorySync>, backend: &MemorySync) {
        while let Some(event) = backend.poll_event() {
            p.handle_event(&event);
        }
    }

    #[test]
    fn test_idle_frames_do_nothing() {
        let (mut p, backend) = pipeline(SyncConfig::default());
        assert!(p.synchronization_available());
        let before = backend.calls();

        for _ in 0..20 {
            p.pre_paint().unwrap();
            p.post_paint();
        }
        assert_eq!(backend.calls(), before);
        assert_eq!(p.ring().stats().frames, 0);
        assert_eq!(p.stats().frames, 20);
    }

    #[test]
    fn test_updated_frames_use_fences() {
        let (mut p, backend) = pipeline(SyncConfig::default());
        let round_trips = backend.calls().round_trips;

        for _ in 0..30 {
            pump(&mut p, &backend);
            p.mark_surfaces_updated();
            p.pre_paint().unwrap();
            p.post_paint();
            assert!(!p.surfaces_updated_this_frame());
        }

        assert!(p.synchronization_available());
        assert_eq!(p.stats().fenced_frames, 30);
        assert_eq!(p.stats().fallback_round_trips, 0);
        assert_eq!(backend.calls().round_trips, round_trips);
        assert_eq!(backend.gpu_waits_on_untriggered(), 0);
    }

    #[test]
    fn test_disabled_config_uses_round_trips() {
        let config = SyncConfig { enabled: false, ..SyncConfig::default() };
        let (mut p, backend) = pipeline(config);
        assert!(!p.synchronization_available());
        assert_eq!(backend.live_object_count(), 0);

        p.mark_surfaces_updated();
        p.pre_paint().unwrap();
        p.post_paint();
        assert_eq!(backend.calls().round_trips, 1);
    }

    #[test]
    fn test_ring_failure_downgrades_for_session() {
        let (mut p, backend) = pipeline(SyncConfig { max_reboots: 0, ..SyncConfig::default() });
        backend.set_gpu_stalled(true);

        let mut frame = 0;
        while p.synchronization_available() {
            pump(&mut p, &backend);
            p.mark_surfaces_updated();
            p.pre_paint().unwrap();
            p.post_paint();
            frame += 1;
            assert!(frame <= 10, "ring never gave up");
        }
        assert!(p.ring().is_disabled());
        assert_eq!(backend.live_object_count(), 0);

        // Recovery of the GPU does not bring fences back
        backend.set_gpu_stalled(false);
        let round_trips = backend.calls().round_trips;
        p.mark_surfaces_updated();
        p.pre_paint().unwrap();
        p.post_paint();
        assert!(!p.synchronization_available());
        assert_eq!(backend.calls().round_trips, round_trips + 1);
    }

    #[test]
    fn test_failed_insert_still_syncs_frame() {
        let (mut p, backend) = pipeline(SyncConfig { max_reboots: 0, ..SyncConfig::default() });

        // Reset confirmations never arrive, so once the cursor wraps the
        // current slot is still waiting for its alarm.
        backend.set_drop_alarm_events(true);
        for _ in 0..10 {
            p.mark_surfaces_updated();
            p.pre_paint().unwrap();
            p.post_paint();
            assert!(p.synchronization_available());
        }

        let round_trips = backend.calls().round_trips;
        p.mark_surfaces_updated();
        p.pre_paint().unwrap();
        assert!(!p.synchronization_available());
        assert!(p.ring().is_disabled());
        assert_eq!(backend.calls().round_trips, round_trips + 1);
        assert_eq!(p.stats().fallback_round_trips, 1);
        p.post_paint();
    }
}
