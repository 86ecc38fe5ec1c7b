//! Owned sync handles and the two backend seams the fence ring drives.
//!
//! `DisplaySync` is the X server side (SYNC fences, counters, alarms) and
//! `GpuSync` is the GL side (`GL_ARB_sync` + `GL_EXT_x11_sync_object`).
//! Handles are plain owned values with no `Clone`: they are created by a
//! backend call and consumed by the matching destroy call.

use std::fmt;
use std::time::Duration;

use crate::core::errors::{CapabilityError, SyncError};

/// GL extensions the ring cannot work without.
pub const REQUIRED_GL_EXTENSIONS: [&str; 2] = ["GL_ARB_sync", "GL_EXT_x11_sync_object"];

/// `XSyncAlarmNotify` offset from the SYNC extension's first event.
pub const ALARM_NOTIFY_OFFSET: u8 = 1;

// ============================================================================
// Handles
// ============================================================================

/// Key identifying an alarm in event dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId(pub u32);

/// An X SYNC fence.
#[derive(Debug, PartialEq, Eq)]
pub struct XFence(u32);

/// An X SYNC counter.
#[derive(Debug, PartialEq, Eq)]
pub struct XCounter(u32);

/// An X SYNC alarm.
#[derive(Debug, PartialEq, Eq)]
pub struct XAlarm(u32);

impl XFence {
    pub fn from_raw(xid: u32) -> Self {
        Self(xid)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl XCounter {
    pub fn from_raw(xid: u32) -> Self {
        Self(xid)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl XAlarm {
    pub fn from_raw(xid: u32) -> Self {
        Self(xid)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn id(&self) -> AlarmId {
        AlarmId(self.0)
    }
}

// ============================================================================
// Events and Results
// ============================================================================

/// An alarm notification delivered on the display event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmNotify {
    pub alarm: AlarmId,
    pub counter_value: i64,
}

/// Outcome of a bounded wait on a GPU sync object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    AlreadySignaled,
    ConditionSatisfied,
    TimeoutExpired,
    WaitFailed,
}

impl WaitStatus {
    /// Whether the GPU has finished with the sync object.
    pub fn is_complete(self) -> bool {
        matches!(self, WaitStatus::AlreadySignaled | WaitStatus::ConditionSatisfied)
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Version and event base reported by the SYNC extension handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncExtensionInfo {
    pub major_version: u8,
    pub minor_version: u8,
    pub first_event: u8,
}

/// Immutable result of probing both sides once at ring construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub sync: SyncExtensionInfo,
    pub gl_extensions: Vec<&'static str>,
}

impl Capabilities {
    /// Probe the display and the GPU. Fails on the first missing piece.
    pub fn probe<D, G>(display: &mut D, gpu: &G) -> Result<Self, CapabilityError>
    where
        D: DisplaySync,
        G: GpuSync,
    {
        let sync = display.query_capabilities()?;
        let available = gpu.extensions()?;

        for required in REQUIRED_GL_EXTENSIONS {
            if !available.iter().any(|ext| ext == required) {
                return Err(CapabilityError::MissingGlExtension(required));
            }
        }

        Ok(Self {
            sync,
            gl_extensions: REQUIRED_GL_EXTENSIONS.to_vec(),
        })
    }

    /// Event type code of alarm notifications on this display.
    pub fn alarm_notify_event(&self) -> u8 {
        self.sync.first_event.wrapping_add(ALARM_NOTIFY_OFFSET)
    }
}

// ============================================================================
// Backend Traits
// ============================================================================

/// Host (X server) side of the synchronization contract.
pub trait DisplaySync {
    /// Check for and initialize the SYNC extension.
    fn query_capabilities(&mut self) -> Result<SyncExtensionInfo, CapabilityError>;

    /// Create an untriggered fence on the root window.
    fn create_fence(&mut self) -> Result<XFence, SyncError>;
    fn trigger_fence(&mut self, fence: &XFence) -> Result<(), SyncError>;
    fn reset_fence(&mut self, fence: &XFence) -> Result<(), SyncError>;
    fn destroy_fence(&mut self, fence: XFence);

    fn create_counter(&mut self, initial: i64) -> Result<XCounter, SyncError>;
    fn set_counter(&mut self, counter: &XCounter, value: i64) -> Result<(), SyncError>;
    fn destroy_counter(&mut self, counter: XCounter);

    /// Create an alarm that reports when `counter` reaches `wait_value`.
    fn create_alarm(&mut self, counter: &XCounter, wait_value: i64) -> Result<XAlarm, SyncError>;
    fn change_alarm(&mut self, alarm: &XAlarm, wait_value: i64) -> Result<(), SyncError>;
    fn destroy_alarm(&mut self, alarm: XAlarm);

    fn flush(&mut self) -> Result<(), SyncError>;

    /// Block until the server has processed every request sent so far.
    fn round_trip(&mut self) -> Result<(), SyncError>;

    /// Block until the notification for `alarm` arrives. Other events read
    /// in the meantime stay queued for the regular event consumer.
    fn wait_for_alarm(&mut self, alarm: AlarmId) -> Result<AlarmNotify, SyncError>;
}

/// GPU side of the synchronization contract.
pub trait GpuSync {
    type Sync: fmt::Debug;

    /// Extension names advertised by the GL implementation.
    fn extensions(&self) -> Result<Vec<String>, CapabilityError>;

    /// Import an X fence into the GPU's sync domain.
    fn import_fence(&mut self, fence: &XFence) -> Result<Self::Sync, SyncError>;

    /// Make subsequent GPU commands wait for `sync`.
    fn wait_sync(&mut self, sync: &Self::Sync);

    /// Create a sync object signaled once all prior GPU commands complete.
    fn fence_sync(&mut self) -> Result<Self::Sync, SyncError>;

    fn client_wait_sync(&mut self, sync: &Self::Sync, timeout: Duration) -> WaitStatus;

    fn delete_sync(&mut self, sync: Self::Sync);
}

/// GPU side for a compositor running without a GL context.
///
/// Probing always fails, so a ring built on it never initializes and the
/// pipeline stays on the round-trip fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGpuSync;

impl GpuSync for NoGpuSync {
    type Sync = ();

    fn extensions(&self) -> Result<Vec<String>, CapabilityError> {
        Err(CapabilityError::NoExtensionList("no GL context".to_string()))
    }

    fn import_fence(&mut self, _fence: &XFence) -> Result<(), SyncError> {
        Err(SyncError::gpu("no GL context"))
    }

    fn wait_sync(&mut self, _sync: &()) {}

    fn fence_sync(&mut self) -> Result<(), SyncError> {
        Err(SyncError::gpu("no GL context"))
    }

    fn client_wait_sync(&mut self, _sync: &(), _timeout: Duration) -> WaitStatus {
        WaitStatus::WaitFailed
    }

    fn delete_sync(&mut self, _sync: ()) {}
}
