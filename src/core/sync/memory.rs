//! In-memory display + GPU sync backend.
//!
//! Models just enough of the SYNC extension and GL sync objects for the
//! ring to run without an X server: fences carry a triggered flag, counters
//! fire alarms on positive comparison, GPU completion syncs signal at once
//! unless the GPU is marked stalled. Faults can be injected to exercise the
//! recovery paths. Clones share one server, so a test can keep a handle for
//! inspection while the ring owns the others.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::core::errors::{CapabilityError, SyncError};
use crate::core::sync::backend::{
    AlarmId, AlarmNotify, DisplaySync, GpuSync, SyncExtensionInfo, WaitStatus, XAlarm, XCounter,
    XFence, REQUIRED_GL_EXTENSIONS,
};

const FIRST_EVENT: u8 = 83;

#[derive(Debug)]
struct Alarm {
    counter: u32,
    wait_value: i64,
    active: bool,
}

#[derive(Debug)]
enum GpuObject {
    Imported { fence: u32 },
    Completion,
}

/// Call counters, used to assert that a disabled ring stays silent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub host: usize,
    pub gpu: usize,
    pub round_trips: usize,
}

#[derive(Debug)]
struct Server {
    next_xid: u32,
    next_sync: u64,
    fences: HashMap<u32, bool>,
    counters: HashMap<u32, i64>,
    alarms: HashMap<u32, Alarm>,
    gpu_objects: HashMap<u64, GpuObject>,
    events: VecDeque<AlarmNotify>,
    calls: CallCounts,
    has_sync_extension: bool,
    gl_extensions: Vec<String>,
    gpu_stalled: bool,
    drop_alarm_events: bool,
    gpu_waits_on_untriggered: usize,
}

impl Server {
    fn new() -> Self {
        Self {
            next_xid: 0x0020_0001,
            next_sync: 1,
            fences: HashMap::new(),
            counters: HashMap::new(),
            alarms: HashMap::new(),
            gpu_objects: HashMap::new(),
            events: VecDeque::new(),
            calls: CallCounts::default(),
            has_sync_extension: true,
            gl_extensions: REQUIRED_GL_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            gpu_stalled: false,
            drop_alarm_events: false,
            gpu_waits_on_untriggered: 0,
        }
    }

    fn allocate_xid(&mut self) -> u32 {
        let xid = self.next_xid;
        self.next_xid += 1;
        xid
    }

    fn evaluate_alarms(&mut self, counter: u32) {
        let Some(&value) = self.counters.get(&counter) else {
            return;
        };
        let mut fired = Vec::new();
        for (&xid, alarm) in self.alarms.iter_mut() {
            if alarm.counter == counter && alarm.active && value >= alarm.wait_value {
                // delta 0: the alarm goes inactive until changed again
                alarm.active = false;
                fired.push(xid);
            }
        }
        fired.sort_unstable();
        if self.drop_alarm_events {
            return;
        }
        for xid in fired {
            self.events.push_back(AlarmNotify {
                alarm: AlarmId(xid),
                counter_value: value,
            });
        }
    }
}

/// GPU sync handle of the in-memory backend.
#[derive(Debug, PartialEq, Eq)]
pub struct MemoryGpuSync(u64);

/// Shared in-memory server implementing both backend traits.
#[derive(Debug, Clone)]
pub struct MemorySync {
    server: Rc<RefCell<Server>>,
}

impl Default for MemorySync {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySync {
    pub fn new() -> Self {
        Self {
            server: Rc::new(RefCell::new(Server::new())),
        }
    }

    /// Backend whose X server lacks the SYNC extension.
    pub fn without_sync_extension() -> Self {
        let backend = Self::new();
        backend.server.borrow_mut().has_sync_extension = false;
        backend
    }

    /// Backend whose GL implementation advertises only `extensions`.
    pub fn with_gl_extensions(extensions: &[&str]) -> Self {
        let backend = Self::new();
        backend.server.borrow_mut().gl_extensions =
            extensions.iter().map(|s| s.to_string()).collect();
        backend
    }

    /// While stalled, completion syncs never signal.
    pub fn set_gpu_stalled(&self, stalled: bool) {
        self.server.borrow_mut().gpu_stalled = stalled;
    }

    /// Swallow alarm notifications instead of queueing them.
    pub fn set_drop_alarm_events(&self, drop: bool) {
        self.server.borrow_mut().drop_alarm_events = drop;
    }

    /// Next pending alarm notification, as the display event loop would read it.
    pub fn poll_event(&self) -> Option<AlarmNotify> {
        self.server.borrow_mut().events.pop_front()
    }

    pub fn pending_events(&self) -> usize {
        self.server.borrow().events.len()
    }

    pub fn calls(&self) -> CallCounts {
        self.server.borrow().calls
    }

    /// Fences, counters, alarms and GPU syncs that have not been destroyed.
    pub fn live_object_count(&self) -> usize {
        let server = self.server.borrow();
        server.fences.len() + server.counters.len() + server.alarms.len() + server.gpu_objects.len()
    }

    pub fn triggered_fence_count(&self) -> usize {
        self.server.borrow().fences.values().filter(|&&t| t).count()
    }

    /// Times the GPU was told to wait on a fence the server had not triggered.
    pub fn gpu_waits_on_untriggered(&self) -> usize {
        self.server.borrow().gpu_waits_on_untriggered
    }
}

impl DisplaySync for MemorySync {
    fn query_capabilities(&mut self) -> Result<SyncExtensionInfo, CapabilityError> {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        if !server.has_sync_extension {
            return Err(CapabilityError::MissingExtension("SYNC"));
        }
        Ok(SyncExtensionInfo {
            major_version: 3,
            minor_version: 1,
            first_event: FIRST_EVENT,
        })
    }

    fn create_fence(&mut self) -> Result<XFence, SyncError> {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        let xid = server.allocate_xid();
        server.fences.insert(xid, false);
        Ok(XFence::from_raw(xid))
    }

    fn trigger_fence(&mut self, fence: &XFence) -> Result<(), SyncError> {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        match server.fences.get_mut(&fence.raw()) {
            Some(triggered) => {
                *triggered = true;
                Ok(())
            }
            None => Err(SyncError::connection(format!("BadFence {:#x}", fence.raw()))),
        }
    }

    fn reset_fence(&mut self, fence: &XFence) -> Result<(), SyncError> {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        match server.fences.get_mut(&fence.raw()) {
            // Resetting an untriggered fence is a BadMatch on a real server
            Some(triggered) if *triggered => {
                *triggered = false;
                Ok(())
            }
            Some(_) => Err(SyncError::connection(format!("BadMatch resetting {:#x}", fence.raw()))),
            None => Err(SyncError::connection(format!("BadFence {:#x}", fence.raw()))),
        }
    }

    fn destroy_fence(&mut self, fence: XFence) {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        server.fences.remove(&fence.raw());
    }

    fn create_counter(&mut self, initial: i64) -> Result<XCounter, SyncError> {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        let xid = server.allocate_xid();
        server.counters.insert(xid, initial);
        Ok(XCounter::from_raw(xid))
    }

    fn set_counter(&mut self, counter: &XCounter, value: i64) -> Result<(), SyncError> {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        match server.counters.get_mut(&counter.raw()) {
            Some(current) => *current = value,
            None => return Err(SyncError::connection(format!("BadCounter {:#x}", counter.raw()))),
        }
        server.evaluate_alarms(counter.raw());
        Ok(())
    }

    fn destroy_counter(&mut self, counter: XCounter) {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        server.counters.remove(&counter.raw());
    }

    fn create_alarm(&mut self, counter: &XCounter, wait_value: i64) -> Result<XAlarm, SyncError> {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        if !server.counters.contains_key(&counter.raw()) {
            return Err(SyncError::connection(format!("BadCounter {:#x}", counter.raw())));
        }
        let xid = server.allocate_xid();
        server.alarms.insert(
            xid,
            Alarm {
                counter: counter.raw(),
                wait_value,
                active: true,
            },
        );
        server.evaluate_alarms(counter.raw());
        Ok(XAlarm::from_raw(xid))
    }

    fn change_alarm(&mut self, alarm: &XAlarm, wait_value: i64) -> Result<(), SyncError> {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        let counter = match server.alarms.get_mut(&alarm.raw()) {
            Some(state) => {
                state.wait_value = wait_value;
                state.active = true;
                state.counter
            }
            None => return Err(SyncError::connection(format!("BadAlarm {:#x}", alarm.raw()))),
        };
        server.evaluate_alarms(counter);
        Ok(())
    }

    fn destroy_alarm(&mut self, alarm: XAlarm) {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        server.alarms.remove(&alarm.raw());
    }

    fn flush(&mut self) -> Result<(), SyncError> {
        self.server.borrow_mut().calls.host += 1;
        Ok(())
    }

    fn round_trip(&mut self) -> Result<(), SyncError> {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        server.calls.round_trips += 1;
        Ok(())
    }

    fn wait_for_alarm(&mut self, alarm: AlarmId) -> Result<AlarmNotify, SyncError> {
        let mut server = self.server.borrow_mut();
        server.calls.host += 1;
        match server.events.iter().position(|event| event.alarm == alarm) {
            Some(pos) => server
                .events
                .remove(pos)
                .ok_or_else(|| SyncError::connection("event queue changed while draining")),
            None => Err(SyncError::connection(format!(
                "alarm {:#x} will never be delivered",
                alarm.0
            ))),
        }
    }
}

impl GpuSync for MemorySync {
    type Sync = MemoryGpuSync;

    fn extensions(&self) -> Result<Vec<String>, CapabilityError> {
        let mut server = self.server.borrow_mut();
        server.calls.gpu += 1;
        Ok(server.gl_extensions.clone())
    }

    fn import_fence(&mut self, fence: &XFence) -> Result<MemoryGpuSync, SyncError> {
        let mut server = self.server.borrow_mut();
        server.calls.gpu += 1;
        if !server.fences.contains_key(&fence.raw()) {
            return Err(SyncError::gpu(format!("cannot import unknown fence {:#x}", fence.raw())));
        }
        let id = server.next_sync;
        server.next_sync += 1;
        server
            .gpu_objects
            .insert(id, GpuObject::Imported { fence: fence.raw() });
        Ok(MemoryGpuSync(id))
    }

    fn wait_sync(&mut self, sync: &MemoryGpuSync) {
        let mut server = self.server.borrow_mut();
        server.calls.gpu += 1;
        let untriggered = match server.gpu_objects.get(&sync.0) {
            Some(GpuObject::Imported { fence }) => !server.fences.get(fence).copied().unwrap_or(false),
            _ => false,
        };
        if untriggered {
            server.gpu_waits_on_untriggered += 1;
        }
    }

    fn fence_sync(&mut self) -> Result<MemoryGpuSync, SyncError> {
        let mut server = self.server.borrow_mut();
        server.calls.gpu += 1;
        let id = server.next_sync;
        server.next_sync += 1;
        server.gpu_objects.insert(id, GpuObject::Completion);
        Ok(MemoryGpuSync(id))
    }

    fn client_wait_sync(&mut self, sync: &MemoryGpuSync, _timeout: Duration) -> WaitStatus {
        let mut server = self.server.borrow_mut();
        server.calls.gpu += 1;
        match server.gpu_objects.get(&sync.0) {
            Some(GpuObject::Completion) if server.gpu_stalled => WaitStatus::TimeoutExpired,
            Some(GpuObject::Completion) => WaitStatus::ConditionSatisfied,
            _ => WaitStatus::WaitFailed,
        }
    }

    fn delete_sync(&mut self, sync: MemoryGpuSync) {
        let mut server = self.server.borrow_mut();
        server.calls.gpu += 1;
        server.gpu_objects.remove(&sync.0);
    }
}
