//! The fence ring.
//!
//! A fixed ring of fence slots lets several frames be in flight at once.
//! Each frame that touched X-drawn content inserts into the current slot;
//! after each such frame the slot inserted `N/2` frames earlier is checked
//! for GPU completion and reset, and the cursor advances. When the ring's
//! invariants break (a slot is not ready when needed, the GPU never
//! signals) the whole ring is torn down and rebuilt, up to a fixed number of
//! times, after which it stays disabled for the session.

use std::collections::HashMap;
use std::mem;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::core::errors::SyncError;
use crate::core::sync::backend::{
    AlarmId, AlarmNotify, Capabilities, DisplaySync, GpuSync, WaitStatus,
};
use crate::core::sync::fence::{FenceSlot, FenceState, HostFence};
use crate::util::logging::SYNC;

/// Counters kept for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub frames: u64,
    pub inserts: u64,
    pub resets: u64,
    pub timeouts: u64,
    pub reboots: u32,
}

struct ActiveRing<S> {
    slots: Vec<FenceSlot<S>>,
    current_index: usize,
    warmup_count: usize,
    spacing: usize,
    alarm_index: HashMap<AlarmId, usize>,
    capabilities: Capabilities,
}

impl<S> ActiveRing<S> {
    fn len(&self) -> usize {
        self.slots.len()
    }

    fn spacing(&self) -> usize {
        self.spacing
    }
}

enum RingState<S> {
    Uninitialized,
    Active(ActiveRing<S>),
    Disabled,
}

/// What `advance_after_frame` found when it looked at the oldest slot.
enum AdvanceOutcome {
    Advanced,
    NeedsReboot,
}

/// Ring of fence slots shared by the X server and the GPU.
pub struct FenceRing<D: DisplaySync, G: GpuSync> {
    display: D,
    gpu: G,
    config: SyncConfig,
    state: RingState<G::Sync>,
    reboot_count: u32,
    generation: u32,
    stats: RingStats,
}

impl<D: DisplaySync, G: GpuSync> FenceRing<D, G> {
    /// Create an uninitialized ring. Nothing touches the backends until
    /// [`FenceRing::initialize`].
    pub fn new(display: D, gpu: G, config: SyncConfig) -> Self {
        Self {
            display,
            gpu,
            config,
            state: RingState::Uninitialized,
            reboot_count: 0,
            generation: 0,
            stats: RingStats::default(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether the ring currently has live slots.
    pub fn is_available(&self) -> bool {
        matches!(self.state, RingState::Active(_))
    }

    /// Whether the reboot ceiling was exceeded.
    pub fn is_disabled(&self) -> bool {
        matches!(self.state, RingState::Disabled)
    }

    pub fn reboot_count(&self) -> u32 {
        self.reboot_count
    }

    /// Number of times the ring has been (re)built.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn stats(&self) -> RingStats {
        self.stats
    }

    pub fn capabilities(&self) -> Option<&Capabilities> {
        match &self.state {
            RingState::Active(ring) => Some(&ring.capabilities),
            _ => None,
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        match &self.state {
            RingState::Active(ring) => Some(ring.current_index),
            _ => None,
        }
    }

    pub fn warmup_count(&self) -> Option<usize> {
        match &self.state {
            RingState::Active(ring) => Some(ring.warmup_count),
            _ => None,
        }
    }

    /// Snapshot of every slot's state, in ring order.
    pub fn slot_states(&self) -> Vec<FenceState> {
        match &self.state {
            RingState::Active(ring) => ring.slots.iter().map(FenceSlot::state).collect(),
            _ => Vec::new(),
        }
    }

    /// Alarm ids owned by the live slots, in ring order.
    pub fn alarm_ids(&self) -> Vec<AlarmId> {
        match &self.state {
            RingState::Active(ring) => ring.slots.iter().map(FenceSlot::alarm_id).collect(),
            _ => Vec::new(),
        }
    }

    fn unavailable(&self) -> SyncError {
        match self.state {
            RingState::Disabled => SyncError::Disabled {
                reboots: self.reboot_count,
            },
            _ => SyncError::NotInitialized,
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Probe capabilities and build all slots.
    ///
    /// Host objects for every slot are created first and the connection is
    /// round-tripped before any fence is imported into GL, so the import
    /// cannot race the server-side creation.
    pub fn initialize(&mut self) -> Result<(), SyncError> {
        match self.state {
            RingState::Active(_) => return Ok(()),
            RingState::Disabled => return Err(self.unavailable()),
            RingState::Uninitialized => {}
        }

        let capabilities = Capabilities::probe(&mut self.display, &self.gpu)?;
        let size = self.config.effective_ring_size();

        let mut hosts = Vec::with_capacity(size);
        for _ in 0..size {
            match HostFence::create(&mut self.display) {
                Ok(host) => hosts.push(host),
                Err(e) => {
                    for host in hosts {
                        host.destroy(&mut self.display);
                    }
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.display.round_trip() {
            for host in hosts {
                host.destroy(&mut self.display);
            }
            return Err(e);
        }

        let mut slots: Vec<FenceSlot<G::Sync>> = Vec::with_capacity(size);
        let mut pending = hosts.into_iter().enumerate();
        while let Some((index, host)) = pending.next() {
            match self.gpu.import_fence(host.fence()) {
                Ok(import) => slots.push(FenceSlot::new(index, host, import)),
                Err(e) => {
                    host.destroy(&mut self.display);
                    for (_, rest) in pending {
                        rest.destroy(&mut self.display);
                    }
                    for slot in slots {
                        slot.destroy(&mut self.display, &mut self.gpu);
                    }
                    return Err(e);
                }
            }
        }

        let mut alarm_index = HashMap::with_capacity(size);
        for slot in &slots {
            let previous = alarm_index.insert(slot.alarm_id(), slot.index());
            debug_assert!(previous.is_none(), "alarm shared by two fence slots");
        }

        self.generation += 1;
        tracing::info!(
            "Fence ring ready: {} slots, SYNC {}.{}, alarm event {} (generation {})",
            size,
            capabilities.sync.major_version,
            capabilities.sync.minor_version,
            capabilities.alarm_notify_event(),
            self.generation
        );

        self.state = RingState::Active(ActiveRing {
            slots,
            current_index: 0,
            warmup_count: 0,
            spacing: self.config.reset_spacing(),
            alarm_index,
            capabilities,
        });
        Ok(())
    }

    /// Tear down every slot. The ring returns to the uninitialized state
    /// unless it was disabled.
    pub fn shutdown(&mut self) {
        if !self.is_available() {
            return;
        }
        let RingState::Active(ring) = mem::replace(&mut self.state, RingState::Uninitialized) else {
            return;
        };

        for slot in ring.slots {
            slot.destroy(&mut self.display, &mut self.gpu);
        }
        if let Err(e) = self.display.flush() {
            tracing::warn!("Flush after fence ring teardown failed: {}", e);
        }
        tracing::debug!("Fence ring generation {} torn down: {:?}", self.generation, self.stats);
    }

    /// Destroy and rebuild the ring, or disable it once the reboot ceiling
    /// is exceeded.
    pub fn reboot(&mut self) -> Result<(), SyncError> {
        if !self.is_available() {
            return Err(self.unavailable());
        }

        self.shutdown();
        self.reboot_count += 1;
        self.stats.reboots = self.reboot_count;

        if self.reboot_count > self.config.max_reboots {
            self.state = RingState::Disabled;
            crate::wlog!(
                SYNC,
                "Too many fence ring reboots ({}), disabling X/GPU fence synchronization",
                self.reboot_count
            );
            return Err(self.unavailable());
        }

        tracing::warn!(
            "Rebooting fence ring (reboot {} of at most {})",
            self.reboot_count, self.config.max_reboots
        );
        self.initialize()
    }

    // =========================================================================
    // Per-Frame Operations
    // =========================================================================

    /// Make the GPU wait for the X server before consuming this frame's
    /// window contents.
    pub fn insert_wait(&mut self) -> Result<(), SyncError> {
        let current_state = match &self.state {
            RingState::Active(ring) => ring.slots[ring.current_index].state(),
            _ => return Err(self.unavailable()),
        };

        if current_state != FenceState::Ready {
            tracing::warn!(
                "Current fence slot is {:?}, not ready; were alarm events handled?",
                current_state
            );
            self.reboot()?;
        }

        // After a reboot the fresh ring's first slot takes this frame's wait.
        let RingState::Active(ring) = &mut self.state else {
            return Err(self.unavailable());
        };
        let current = ring.current_index;
        ring.slots[current].insert(&mut self.display, &mut self.gpu)?;
        self.stats.inserts += 1;
        Ok(())
    }

    /// Advance the ring after a frame was submitted, recycling the slot
    /// inserted half a ring ago.
    pub fn advance_after_frame(&mut self) -> Result<(), SyncError> {
        let timeout = self.config.completion_timeout;
        let RingState::Active(ring) = &mut self.state else {
            return Err(self.unavailable());
        };
        self.stats.frames += 1;

        let outcome = if ring.warmup_count < ring.spacing() {
            ring.warmup_count += 1;
            AdvanceOutcome::Advanced
        } else {
            let reset_index = (ring.current_index + ring.len() - ring.spacing()) % ring.len();
            let slot = &mut ring.slots[reset_index];

            let mut status = slot.check_completion(&mut self.gpu, Duration::ZERO);
            if status == WaitStatus::TimeoutExpired {
                tracing::warn!(
                    "Timed out waiting for fence slot {}; the ring may be too small",
                    reset_index
                );
                self.stats.timeouts += 1;
                status = slot.check_completion(&mut self.gpu, timeout);
            }

            if !status.is_complete() {
                let err = match status {
                    WaitStatus::TimeoutExpired => SyncError::Timeout {
                        slot: reset_index,
                        waited: timeout,
                    },
                    _ => SyncError::WaitFailed { slot: reset_index },
                };
                tracing::warn!("{}", err);
                AdvanceOutcome::NeedsReboot
            } else {
                match slot.reset(&mut self.display) {
                    Ok(()) => {
                        self.stats.resets += 1;
                        AdvanceOutcome::Advanced
                    }
                    Err(e) => {
                        tracing::warn!("Resetting fence slot {} failed: {}", reset_index, e);
                        AdvanceOutcome::NeedsReboot
                    }
                }
            }
        };

        match outcome {
            AdvanceOutcome::NeedsReboot => self.reboot(),
            AdvanceOutcome::Advanced => {
                ring.current_index = (ring.current_index + 1) % ring.len();
                Ok(())
            }
        }
    }

    /// Route an alarm notification to its slot. Returns whether a slot
    /// accepted it; alarms from earlier ring generations are ignored.
    pub fn handle_event(&mut self, event: &AlarmNotify) -> bool {
        let RingState::Active(ring) = &mut self.state else {
            return false;
        };
        let Some(&index) = ring.alarm_index.get(&event.alarm) else {
            return false;
        };
        ring.slots[index].handle_notification(event).is_ok()
    }
}

impl<D: DisplaySync, G: GpuSync> Drop for FenceRing<D, G> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
