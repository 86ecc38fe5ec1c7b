//! SYNC extension implementation of [`DisplaySync`].

use std::fmt::Display;
use std::rc::Rc;

use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::sync::{self, ChangeAlarmAux, ConnectionExt as _, CreateAlarmAux, Int64};
use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::protocol::Event;

use crate::core::errors::{CapabilityError, SyncError};
use crate::core::sync::backend::{
    AlarmId, AlarmNotify, DisplaySync, SyncExtensionInfo, XAlarm, XCounter, XFence,
};
use crate::core::x11::X11Connection;

/// SYNC 3.1 is the first version with fences.
const SYNC_MAJOR: u8 = 3;
const SYNC_MINOR: u8 = 1;

fn to_int64(value: i64) -> Int64 {
    Int64 {
        hi: (value >> 32) as i32,
        lo: value as u32,
    }
}

fn from_int64(value: Int64) -> i64 {
    ((value.hi as i64) << 32) | value.lo as i64
}

fn conn_err(e: impl Display) -> SyncError {
    SyncError::connection(e.to_string())
}

fn alarm_notify(event: &Event) -> Option<AlarmNotify> {
    match event {
        Event::SyncAlarmNotify(ev) => Some(AlarmNotify {
            alarm: AlarmId(ev.alarm),
            counter_value: from_int64(ev.counter_value),
        }),
        _ => None,
    }
}

/// Translate an X event into an alarm notification, if it is one.
pub fn as_alarm_notify(event: &Event) -> Option<AlarmNotify> {
    alarm_notify(event)
}

/// Fences, counters and alarms on a live X server.
pub struct X11DisplaySync {
    x: Rc<X11Connection>,
}

impl X11DisplaySync {
    pub fn new(x: Rc<X11Connection>) -> Self {
        Self { x }
    }

    fn generate_id(&self) -> Result<u32, SyncError> {
        self.x.conn().generate_id().map_err(conn_err)
    }

    fn log_destroy_error(kind: &str, xid: u32, e: impl Display) {
        tracing::warn!("Failed to destroy {} {:#x}: {}", kind, xid, e);
    }
}

impl DisplaySync for X11DisplaySync {
    fn query_capabilities(&mut self) -> Result<SyncExtensionInfo, CapabilityError> {
        let handshake = |e: &dyn Display| CapabilityError::HandshakeFailed {
            extension: "SYNC",
            message: e.to_string(),
        };

        let info = self
            .x
            .conn()
            .extension_information(sync::X11_EXTENSION_NAME)
            .map_err(|e| handshake(&e))?
            .ok_or(CapabilityError::MissingExtension("SYNC"))?;

        let version = self
            .x
            .conn()
            .sync_initialize(SYNC_MAJOR, SYNC_MINOR)
            .map_err(|e| handshake(&e))?
            .reply()
            .map_err(|e| handshake(&e))?;

        if (version.major_version, version.minor_version) < (SYNC_MAJOR, SYNC_MINOR) {
            return Err(CapabilityError::HandshakeFailed {
                extension: "SYNC",
                message: format!(
                    "server speaks {}.{}, fences need {}.{}",
                    version.major_version, version.minor_version, SYNC_MAJOR, SYNC_MINOR
                ),
            });
        }

        Ok(SyncExtensionInfo {
            major_version: version.major_version,
            minor_version: version.minor_version,
            first_event: info.first_event,
        })
    }

    fn create_fence(&mut self) -> Result<XFence, SyncError> {
        let xid = self.generate_id()?;
        self.x
            .conn()
            .sync_create_fence(self.x.root(), xid, false)
            .map_err(conn_err)?;
        Ok(XFence::from_raw(xid))
    }

    fn trigger_fence(&mut self, fence: &XFence) -> Result<(), SyncError> {
        self.x.conn().sync_trigger_fence(fence.raw()).map_err(conn_err)?;
        Ok(())
    }

    fn reset_fence(&mut self, fence: &XFence) -> Result<(), SyncError> {
        self.x.conn().sync_reset_fence(fence.raw()).map_err(conn_err)?;
        Ok(())
    }

    fn destroy_fence(&mut self, fence: XFence) {
        if let Err(e) = self.x.conn().sync_destroy_fence(fence.raw()) {
            Self::log_destroy_error("fence", fence.raw(), e);
        }
    }

    fn create_counter(&mut self, initial: i64) -> Result<XCounter, SyncError> {
        let xid = self.generate_id()?;
        self.x
            .conn()
            .sync_create_counter(xid, to_int64(initial))
            .map_err(conn_err)?;
        Ok(XCounter::from_raw(xid))
    }

    fn set_counter(&mut self, counter: &XCounter, value: i64) -> Result<(), SyncError> {
        self.x
            .conn()
            .sync_set_counter(counter.raw(), to_int64(value))
            .map_err(conn_err)?;
        Ok(())
    }

    fn destroy_counter(&mut self, counter: XCounter) {
        if let Err(e) = self.x.conn().sync_destroy_counter(counter.raw()) {
            Self::log_destroy_error("counter", counter.raw(), e);
        }
    }

    fn create_alarm(&mut self, counter: &XCounter, wait_value: i64) -> Result<XAlarm, SyncError> {
        let xid = self.generate_id()?;
        let aux = CreateAlarmAux::new()
            .counter(counter.raw())
            .value_type(sync::VALUETYPE::ABSOLUTE)
            .value(to_int64(wait_value))
            .test_type(sync::TESTTYPE::POSITIVE_COMPARISON)
            .delta(to_int64(0))
            .events(1u32);
        self.x.conn().sync_create_alarm(xid, &aux).map_err(conn_err)?;
        Ok(XAlarm::from_raw(xid))
    }

    fn change_alarm(&mut self, alarm: &XAlarm, wait_value: i64) -> Result<(), SyncError> {
        let aux = ChangeAlarmAux::new().value(to_int64(wait_value));
        self.x
            .conn()
            .sync_change_alarm(alarm.raw(), &aux)
            .map_err(conn_err)?;
        Ok(())
    }

    fn destroy_alarm(&mut self, alarm: XAlarm) {
        if let Err(e) = self.x.conn().sync_destroy_alarm(alarm.raw()) {
            Self::log_destroy_error("alarm", alarm.raw(), e);
        }
    }

    fn flush(&mut self) -> Result<(), SyncError> {
        self.x.conn().flush().map_err(conn_err)
    }

    fn round_trip(&mut self) -> Result<(), SyncError> {
        self.x
            .conn()
            .get_input_focus()
            .map_err(conn_err)?
            .reply()
            .map_err(conn_err)?;
        Ok(())
    }

    fn wait_for_alarm(&mut self, alarm: AlarmId) -> Result<AlarmNotify, SyncError> {
        let matches = |event: &Event| alarm_notify(event).is_some_and(|n| n.alarm == alarm);

        if let Some(event) = self.x.take_stashed(matches) {
            return alarm_notify(&event).ok_or_else(|| SyncError::connection("stash changed"));
        }

        self.flush()?;
        loop {
            let event = self.x.conn().wait_for_event().map_err(conn_err)?;
            if matches(&event) {
                return alarm_notify(&event).ok_or_else(|| SyncError::connection("not an alarm event"));
            }
            self.x.stash_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int64_conversion() {
        for value in [0i64, 1, -1, 42, i64::MAX, i64::MIN, 1 << 32, (1 << 32) + 7] {
            assert_eq!(from_int64(to_int64(value)), value);
        }
        assert_eq!(to_int64(1), Int64 { hi: 0, lo: 1 });
        assert_eq!(to_int64(-1), Int64 { hi: -1, lo: u32::MAX });
    }
}
