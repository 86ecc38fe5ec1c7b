use std::collections::HashSet;
use std::time::Duration;

use crate::config::SyncConfig;
use crate::core::errors::{CapabilityError, SyncError};
use crate::core::sync::*;

type MemoryRing = FenceRing<MemorySync, MemorySync>;

fn new_ring(config: SyncConfig) -> (MemoryRing, MemorySync) {
    let backend = MemorySync::new();
    let ring = FenceRing::new(backend.clone(), backend.clone(), config);
    (ring, backend)
}

fn pump_events(ring: &mut MemoryRing, backend: &MemorySync) {
    while let Some(event) = backend.poll_event() {
        ring.handle_event(&event);
    }
}

fn run_frame(ring: &mut MemoryRing, backend: &MemorySync) -> Result<(), SyncError> {
    pump_events(ring, backend);
    ring.insert_wait()?;
    ring.advance_after_frame()
}

#[test]
fn test_initialize_builds_ready_ring() {
    let (mut ring, backend) = new_ring(SyncConfig::default());
    assert!(!ring.is_available());

    ring.initialize().unwrap();
    assert!(ring.is_available());
    assert_eq!(ring.slot_states(), vec![FenceState::Ready; 10]);
    assert_eq!(ring.current_index(), Some(0));
    assert_eq!(ring.warmup_count(), Some(0));
    assert_eq!(ring.generation(), 1);

    // fence + counter + alarm + GL import per slot, one round trip before import
    assert_eq!(backend.live_object_count(), 40);
    assert_eq!(backend.calls().round_trips, 1);

    let alarms: HashSet<_> = ring.alarm_ids().into_iter().collect();
    assert_eq!(alarms.len(), 10);
}

#[test]
fn test_initialize_requires_sync_extension() {
    let backend = MemorySync::without_sync_extension();
    let mut ring = FenceRing::new(backend.clone(), backend.clone(), SyncConfig::default());

    let err = ring.initialize().unwrap_err();
    assert_eq!(err, SyncError::Capability(CapabilityError::MissingExtension("SYNC")));
    assert!(!ring.is_available());
    assert_eq!(backend.live_object_count(), 0);
}

#[test]
fn test_initialize_requires_gl_extensions() {
    let backend = MemorySync::with_gl_extensions(&["GL_ARB_sync"]);
    let mut ring = FenceRing::new(backend.clone(), backend.clone(), SyncConfig::default());

    let err = ring.initialize().unwrap_err();
    assert_eq!(
        err,
        SyncError::Capability(CapabilityError::MissingGlExtension("GL_EXT_x11_sync_object"))
    );
    assert_eq!(backend.live_object_count(), 0);
    assert!(matches!(ring.insert_wait(), Err(SyncError::NotInitialized)));
}

#[test]
fn test_warmup_gating() {
    let (mut ring, backend) = new_ring(SyncConfig::default());
    ring.initialize().unwrap();

    for frame in 0..5 {
        run_frame(&mut ring, &backend).unwrap();
        assert_eq!(ring.warmup_count(), Some(frame + 1));
        assert_eq!(ring.stats().resets, 0);
    }
    assert_eq!(ring.current_index(), Some(5));
    assert_eq!(&ring.slot_states()[..5], &[FenceState::Waiting; 5]);
    assert_eq!(&ring.slot_states()[5..], &[FenceState::Ready; 5]);

    // Sixth frame resets slot (5 + 10 - 5) % 10 = 0
    run_frame(&mut ring, &backend).unwrap();
    assert_eq!(ring.stats().resets, 1);
    assert_eq!(ring.slot_states()[0], FenceState::ResetPending);
    assert_eq!(ring.warmup_count(), Some(5));
    assert_eq!(ring.current_index(), Some(6));

    pump_events(&mut ring, &backend);
    assert_eq!(ring.slot_states()[0], FenceState::Ready);
}

#[test]
fn test_advance_without_inserts_still_warms_up() {
    let (mut ring, _backend) = new_ring(SyncConfig::default());
    ring.initialize().unwrap();

    for _ in 0..5 {
        ring.advance_after_frame().unwrap();
    }
    assert_eq!(ring.stats().resets, 0);
    assert_eq!(ring.slot_states(), vec![FenceState::Ready; 10]);
}

#[test]
fn test_steady_state_never_reboots() {
    let (mut ring, backend) = new_ring(SyncConfig::default());
    ring.initialize().unwrap();

    for _ in 0..200 {
        run_frame(&mut ring, &backend).unwrap();

        let busy = ring
            .slot_states()
            .into_iter()
            .filter(|s| matches!(s, FenceState::Waiting | FenceState::ResetPending))
            .count();
        assert!(busy <= 10);
        let alarms: HashSet<_> = ring.alarm_ids().into_iter().collect();
        assert_eq!(alarms.len(), 10);
    }

    assert_eq!(ring.reboot_count(), 0);
    assert_eq!(ring.stats().inserts, 200);
    assert_eq!(ring.stats().resets, 195);
    assert_eq!(ring.stats().timeouts, 0);
    assert_eq!(backend.gpu_waits_on_untriggered(), 0);
}

#[test]
fn test_insert_on_busy_slot_reboots() {
    let (mut ring, backend) = new_ring(SyncConfig::default());
    ring.initialize().unwrap();

    ring.insert_wait().unwrap();
    assert_eq!(ring.slot_states()[0], FenceState::Waiting);

    // Same frame again without advancing: the current slot is still waiting
    ring.insert_wait().unwrap();
    assert_eq!(ring.reboot_count(), 1);
    assert_eq!(ring.generation(), 2);
    assert!(ring.is_available());
    assert_eq!(ring.current_index(), Some(0));
    assert_eq!(ring.slot_states()[0], FenceState::Waiting);
    assert_eq!(&ring.slot_states()[1..], &[FenceState::Ready; 9]);

    // Old generation cleaned up: only the new ring's objects remain
    // (40 + the completion sync of the fresh insert)
    assert_eq!(backend.live_object_count(), 41);
}

#[test]
fn test_gpu_timeout_reboots() {
    let (mut ring, backend) = new_ring(SyncConfig {
        completion_timeout: Duration::from_millis(10),
        ..SyncConfig::default()
    });
    ring.initialize().unwrap();

    backend.set_gpu_stalled(true);
    for _ in 0..5 {
        run_frame(&mut ring, &backend).unwrap();
    }
    assert_eq!(ring.reboot_count(), 0);

    // First reset attempt: poll times out, bounded retry times out, reboot
    run_frame(&mut ring, &backend).unwrap();
    assert_eq!(ring.stats().timeouts, 1);
    assert_eq!(ring.reboot_count(), 1);
    assert_eq!(ring.slot_states(), vec![FenceState::Ready; 10]);
    assert_eq!(ring.warmup_count(), Some(0));
}

#[test]
fn test_gpu_timeout_without_reboot_budget_fails() {
    let (mut ring, backend) = new_ring(SyncConfig {
        max_reboots: 0,
        ..SyncConfig::default()
    });
    ring.initialize().unwrap();

    backend.set_gpu_stalled(true);
    for _ in 0..5 {
        run_frame(&mut ring, &backend).unwrap();
    }
    let err = run_frame(&mut ring, &backend).unwrap_err();
    assert_eq!(err, SyncError::Disabled { reboots: 1 });
    assert!(ring.is_disabled());
    assert_eq!(backend.live_object_count(), 0);
}

#[test]
fn test_reboot_ceiling_disables_ring() {
    let (mut ring, backend) = new_ring(SyncConfig::default());
    ring.initialize().unwrap();

    ring.reboot().unwrap();
    ring.reboot().unwrap();
    assert_eq!(ring.reboot_count(), 2);
    assert!(ring.is_available());

    let err = ring.reboot().unwrap_err();
    assert_eq!(err, SyncError::Disabled { reboots: 3 });
    assert!(ring.is_disabled());

    let calls = backend.calls();
    assert_eq!(ring.insert_wait(), Err(SyncError::Disabled { reboots: 3 }));
    assert_eq!(ring.advance_after_frame(), Err(SyncError::Disabled { reboots: 3 }));
    assert_eq!(ring.reboot(), Err(SyncError::Disabled { reboots: 3 }));
    assert_eq!(ring.initialize(), Err(SyncError::Disabled { reboots: 3 }));
    assert_eq!(backend.calls(), calls);
    assert_eq!(backend.live_object_count(), 0);
}

#[test]
fn test_dropped_alarm_event_triggers_reboot() {
    let (mut ring, backend) = new_ring(SyncConfig::default());
    ring.initialize().unwrap();
    backend.set_drop_alarm_events(true);

    // Slot 0 is reset on frame 5 but its confirmation never arrives; the
    // cursor comes back to it on frame 10.
    for _ in 0..10 {
        run_frame(&mut ring, &backend).unwrap();
    }
    assert_eq!(ring.reboot_count(), 0);
    assert_eq!(ring.slot_states()[0], FenceState::ResetPending);

    backend.set_drop_alarm_events(false);
    run_frame(&mut ring, &backend).unwrap();
    assert_eq!(ring.reboot_count(), 1);
    assert!(ring.is_available());
}

#[test]
fn test_stale_generation_events_ignored() {
    let (mut ring, backend) = new_ring(SyncConfig::default());
    ring.initialize().unwrap();
    let old_alarms = ring.alarm_ids();

    ring.reboot().unwrap();
    for alarm in old_alarms {
        assert!(!ring.handle_event(&AlarmNotify { alarm, counter_value: 1 }));
    }
    assert!(!ring.handle_event(&AlarmNotify { alarm: AlarmId(0xdead), counter_value: 1 }));
    assert_eq!(ring.slot_states(), vec![FenceState::Ready; 10]);
    assert_eq!(backend.pending_events(), 0);
}

#[test]
fn test_unexpected_notification_rejected() {
    let (mut ring, _backend) = new_ring(SyncConfig::default());
    ring.initialize().unwrap();

    // Slot 0 is Ready; a notification for its alarm is out of order
    let alarm = ring.alarm_ids()[0];
    assert!(!ring.handle_event(&AlarmNotify { alarm, counter_value: 1 }));
    assert_eq!(ring.slot_states()[0], FenceState::Ready);
}

#[test]
fn test_custom_ring_size_keeps_half_spacing() {
    let (mut ring, backend) = new_ring(SyncConfig {
        ring_size: 4,
        ..SyncConfig::default()
    });
    ring.initialize().unwrap();

    run_frame(&mut ring, &backend).unwrap();
    run_frame(&mut ring, &backend).unwrap();
    assert_eq!(ring.stats().resets, 0);

    // Third frame: current 2, reset (2 + 4 - 2) % 4 = 0
    run_frame(&mut ring, &backend).unwrap();
    assert_eq!(ring.slot_states()[0], FenceState::ResetPending);
}

#[test]
fn test_oversized_ring_is_clamped() {
    let (mut ring, backend) = new_ring(SyncConfig {
        ring_size: usize::MAX,
        ..SyncConfig::default()
    });
    ring.initialize().unwrap();
    assert_eq!(ring.slot_states().len(), crate::config::MAX_RING_SIZE);

    for _ in 0..crate::config::MAX_RING_SIZE / 2 {
        run_frame(&mut ring, &backend).unwrap();
    }
    assert_eq!(ring.stats().resets, 0);
    run_frame(&mut ring, &backend).unwrap();
    assert_eq!(ring.stats().resets, 1);
}

#[test]
fn test_drop_releases_all_objects() {
    let (mut ring, backend) = new_ring(SyncConfig::default());
    ring.initialize().unwrap();
    for _ in 0..7 {
        run_frame(&mut ring, &backend).unwrap();
    }
    drop(ring);
    assert_eq!(backend.live_object_count(), 0);
    assert_eq!(backend.pending_events(), 0);
}
