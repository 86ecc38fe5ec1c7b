//! A single fence slot of the ring.
//!
//! Each slot pairs an X fence (imported once into GL) with a counter/alarm
//! used to learn when a reset has reached the server. The slot cycles
//! `Ready -> Waiting -> Done -> ResetPending -> Ready`; any other transition
//! is rejected and leaves the slot untouched.

use std::time::Duration;

use crate::core::errors::SyncError;
use crate::core::sync::backend::{
    AlarmId, AlarmNotify, DisplaySync, GpuSync, WaitStatus, XAlarm, XCounter, XFence,
};

/// Lifecycle state of a fence slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    /// Idle, available for insertion
    Ready,
    /// X fence triggered, GL waiting on it, completion sync outstanding
    Waiting,
    /// GL confirmed it consumed the fence
    Done,
    /// Fence reset, alarm armed for the reset confirmation
    ResetPending,
}

// ============================================================================
// Host Objects
// ============================================================================

/// The server-side objects of one slot.
#[derive(Debug)]
pub struct HostFence {
    fence: XFence,
    counter: XCounter,
    alarm: XAlarm,
}

impl HostFence {
    /// Create fence, counter (at 0) and an alarm waiting for the counter to reach 1.
    pub fn create<D: DisplaySync>(display: &mut D) -> Result<Self, SyncError> {
        let fence = display.create_fence()?;

        let counter = match display.create_counter(0) {
            Ok(counter) => counter,
            Err(e) => {
                display.destroy_fence(fence);
                return Err(e);
            }
        };

        let alarm = match display.create_alarm(&counter, 1) {
            Ok(alarm) => alarm,
            Err(e) => {
                display.destroy_counter(counter);
                display.destroy_fence(fence);
                return Err(e);
            }
        };

        Ok(Self { fence, counter, alarm })
    }

    pub fn fence(&self) -> &XFence {
        &self.fence
    }

    pub fn destroy<D: DisplaySync>(self, display: &mut D) {
        display.destroy_fence(self.fence);
        display.destroy_counter(self.counter);
        display.destroy_alarm(self.alarm);
    }
}

// ============================================================================
// Fence Slot
// ============================================================================

/// One slot of the fence ring. `S` is the GPU backend's sync handle type.
#[derive(Debug)]
pub struct FenceSlot<S> {
    index: usize,
    host: HostFence,
    gpu_import: S,
    gpu_completion: Option<S>,
    next_target_value: i64,
    state: FenceState,
}

impl<S> FenceSlot<S> {
    /// Wrap host objects whose fence has already been imported as `gpu_import`.
    pub fn new(index: usize, host: HostFence, gpu_import: S) -> Self {
        Self {
            index,
            host,
            gpu_import,
            gpu_completion: None,
            next_target_value: 1,
            state: FenceState::Ready,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> FenceState {
        self.state
    }

    pub fn alarm_id(&self) -> AlarmId {
        self.host.alarm.id()
    }

    pub fn next_target_value(&self) -> i64 {
        self.next_target_value
    }

    fn expect_state(&self, expected: FenceState) -> Result<(), SyncError> {
        if self.state == expected {
            Ok(())
        } else {
            tracing::warn!(
                "Fence slot {} is {:?}, expected {:?}",
                self.index, self.state, expected
            );
            Err(SyncError::InvalidState {
                slot: self.index,
                expected,
                found: self.state,
            })
        }
    }

    /// Trigger the X fence and make the GPU wait on it before any later work.
    pub fn insert<D, G>(&mut self, display: &mut D, gpu: &mut G) -> Result<(), SyncError>
    where
        D: DisplaySync,
        G: GpuSync<Sync = S>,
    {
        self.expect_state(FenceState::Ready)?;

        display.trigger_fence(&self.host.fence)?;
        display.flush()?;
        gpu.wait_sync(&self.gpu_import);

        self.gpu_completion = Some(gpu.fence_sync()?);
        self.state = FenceState::Waiting;
        Ok(())
    }

    /// Check whether the GPU finished with this slot, waiting up to `timeout`.
    pub fn check_completion<G>(&mut self, gpu: &mut G, timeout: Duration) -> WaitStatus
    where
        G: GpuSync<Sync = S>,
    {
        let status = match self.state {
            FenceState::Done => WaitStatus::AlreadySignaled,
            FenceState::Waiting => match self.gpu_completion.as_ref() {
                Some(sync) => {
                    let status = gpu.client_wait_sync(sync, timeout);
                    if status.is_complete() {
                        if let Some(sync) = self.gpu_completion.take() {
                            gpu.delete_sync(sync);
                        }
                        self.state = FenceState::Done;
                    }
                    status
                }
                None => WaitStatus::WaitFailed,
            },
            FenceState::Ready | FenceState::ResetPending => WaitStatus::WaitFailed,
        };

        if status == WaitStatus::WaitFailed {
            tracing::warn!(
                "Completion check on fence slot {} failed (state {:?})",
                self.index, self.state
            );
        }
        status
    }

    /// Untrigger the fence and arm the alarm for the next counter value.
    ///
    /// Setting the counter after the fence reset means the alarm fires only
    /// once the server has processed the reset.
    pub fn reset<D: DisplaySync>(&mut self, display: &mut D) -> Result<(), SyncError> {
        self.expect_state(FenceState::Done)?;

        let target = self.next_target_value;
        display.reset_fence(&self.host.fence)?;
        display.change_alarm(&self.host.alarm, target)?;
        display.set_counter(&self.host.counter, target)?;

        self.next_target_value = target.saturating_add(1);
        self.state = FenceState::ResetPending;
        Ok(())
    }

    /// Accept the alarm notification confirming the reset.
    pub fn handle_notification(&mut self, event: &AlarmNotify) -> Result<(), SyncError> {
        if event.alarm != self.alarm_id() {
            return Err(SyncError::connection(format!(
                "alarm {:#x} delivered to fence slot {} (alarm {:#x})",
                event.alarm.0,
                self.index,
                self.alarm_id().0
            )));
        }
        self.expect_state(FenceState::ResetPending)?;
        self.state = FenceState::Ready;
        Ok(())
    }

    /// Release every object of the slot.
    ///
    /// A waiting slot drops its completion sync without waiting. A slot with
    /// a pending reset first drains its alarm so the alarm is not destroyed
    /// while armed. Idle slots get their fence triggered so the GPU is never
    /// left blocked on a fence that is about to disappear.
    pub fn destroy<D, G>(mut self, display: &mut D, gpu: &mut G)
    where
        D: DisplaySync,
        G: GpuSync<Sync = S>,
    {
        match self.state {
            FenceState::Waiting => {
                if let Some(sync) = self.gpu_completion.take() {
                    gpu.delete_sync(sync);
                }
            }
            FenceState::Done => {}
            FenceState::ResetPending => {
                match display.wait_for_alarm(self.alarm_id()) {
                    Ok(event) => {
                        let _ = self.handle_notification(&event);
                    }
                    Err(e) => tracing::warn!(
                        "Fence slot {}: reset confirmation never arrived: {}",
                        self.index, e
                    ),
                }
                self.trigger_for_teardown(display);
            }
            FenceState::Ready => self.trigger_for_teardown(display),
        }

        gpu.delete_sync(self.gpu_import);
        self.host.destroy(display);
    }

    fn trigger_for_teardown<D: DisplaySync>(&self, display: &mut D) {
        let result = display
            .trigger_fence(&self.host.fence)
            .and_then(|_| display.flush());
        if let Err(e) = result {
            tracing::warn!("Fence slot {}: trigger before teardown failed: {}", self.index, e);
        }
    }
}
