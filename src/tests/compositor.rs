use crate::config::CompositorConfig;
use crate::core::session::{PropertyChange, RecordingRedirector, RedirectCall, SessionEvent};
use crate::core::sync::{AlarmId, AlarmNotify, FenceState, MemorySync};
use crate::core::window::BypassHint;
use crate::core::{Compositor, QueuedEvents, Runtime};
use crate::util::geometry::Rect;

type TestCompositor = Compositor<MemorySync, MemorySync, RecordingRedirector>;

const SCREEN: Rect = Rect { x: 0, y: 0, width: 1024, height: 768 };
const PLAYER: u32 = 0x400001;
const TOOLTIP: u32 = 0x500001;

fn compositor(config: CompositorConfig) -> (TestCompositor, MemorySync) {
    let backend = MemorySync::new();
    let compositor = Compositor::new(
        config,
        backend.clone(),
        backend.clone(),
        RecordingRedirector::new(),
        SCREEN,
    );
    (compositor, backend)
}

fn map_window(c: &mut TestCompositor, window: u32, geometry: Rect, override_redirect: bool) {
    c.process_event(&SessionEvent::WindowCreated {
        window,
        geometry,
        override_redirect,
        argb: false,
    })
    .unwrap();
    c.process_event(&SessionEvent::WindowMapped { window }).unwrap();
}

fn deliver_alarms(c: &mut TestCompositor, backend: &MemorySync) {
    while let Some(notify) = backend.poll_event() {
        c.process_event(&SessionEvent::AlarmNotify(notify)).unwrap();
    }
}

fn damaged_frame(c: &mut TestCompositor, backend: &MemorySync, window: u32, area: Rect) {
    deliver_alarms(c, backend);
    c.process_event(&SessionEvent::Damage { window, area }).unwrap();
    c.pre_paint().unwrap();
    c.post_paint();
}

#[test]
fn test_damage_drives_fence_ring() {
    let (mut c, backend) = compositor(CompositorConfig::default());
    assert!(c.pipeline().synchronization_available());
    map_window(&mut c, PLAYER, Rect::new(0, 0, 640, 480), false);

    for _ in 0..25 {
        damaged_frame(&mut c, &backend, PLAYER, Rect::new(0, 0, 10, 10));
    }

    let ring = c.pipeline().ring();
    assert_eq!(ring.stats().inserts, 25);
    assert_eq!(ring.stats().resets, 20);
    assert_eq!(ring.reboot_count(), 0);
    assert!(c.pipeline().synchronization_available());
    assert_eq!(backend.gpu_waits_on_untriggered(), 0);
}

#[test]
fn test_frames_without_damage_skip_sync() {
    let (mut c, backend) = compositor(CompositorConfig::default());
    map_window(&mut c, PLAYER, Rect::new(0, 0, 640, 480), false);
    let before = backend.calls();

    for _ in 0..5 {
        c.pre_paint().unwrap();
        c.post_paint();
    }
    assert_eq!(backend.calls(), before);
    assert_eq!(c.pipeline().ring().stats().inserts, 0);
}

#[test]
fn test_alarm_events_bypass_session() {
    let (mut c, backend) = compositor(CompositorConfig::default());
    map_window(&mut c, PLAYER, Rect::new(0, 0, 640, 480), false);
    let windows = c.session().window_count();

    // Six damaged frames reset slot 0; its confirmation is still queued.
    for _ in 0..6 {
        c.process_event(&SessionEvent::Damage { window: PLAYER, area: Rect::new(0, 0, 1, 1) })
            .unwrap();
        c.pre_paint().unwrap();
        c.post_paint();
    }
    assert_eq!(c.pipeline().ring().slot_states()[0], FenceState::ResetPending);

    deliver_alarms(&mut c, &backend);
    assert_eq!(c.pipeline().ring().slot_states()[0], FenceState::Ready);

    // Alarms from a previous ring generation are dropped quietly
    c.process_event(&SessionEvent::AlarmNotify(AlarmNotify {
        alarm: AlarmId(0xdead),
        counter_value: 1,
    }))
    .unwrap();
    assert_eq!(c.session().window_count(), windows);
    assert!(!c.pipeline().surfaces_updated_this_frame());
}

#[test]
fn test_full_damage_client_is_unredirected() {
    let config = CompositorConfig {
        full_damage_threshold: 10,
        ..CompositorConfig::default()
    };
    let (mut c, backend) = compositor(config);
    map_window(&mut c, PLAYER, SCREEN, false);

    for _ in 0..10 {
        damaged_frame(&mut c, &backend, PLAYER, SCREEN);
    }
    // The unredirect decision is taken on the next pre-paint
    c.pre_paint().unwrap();
    c.post_paint();
    assert_eq!(c.session().unredirected_window(), Some(PLAYER));
    assert!(c
        .redirector()
        .calls
        .contains(&RedirectCall::Unredirect { window: PLAYER }));

    // Drawing by a window that bypasses compositing needs no fence
    let inserts = c.pipeline().ring().stats().inserts;
    damaged_frame(&mut c, &backend, PLAYER, SCREEN);
    assert_eq!(c.pipeline().ring().stats().inserts, inserts);
}

#[test]
fn test_never_bypass_hint_and_inhibit() {
    let (mut c, _backend) = compositor(CompositorConfig::default());
    map_window(&mut c, PLAYER, SCREEN, true);

    c.process_event(&SessionEvent::PropertyChanged {
        window: PLAYER,
        change: PropertyChange::BypassCompositor(BypassHint::NeverBypass),
    })
    .unwrap();
    c.pre_paint().unwrap();
    c.post_paint();
    assert_eq!(c.session().unredirected_window(), None);

    c.process_event(&SessionEvent::PropertyChanged {
        window: PLAYER,
        change: PropertyChange::BypassCompositor(BypassHint::None),
    })
    .unwrap();
    c.disable_unredirect();
    c.pre_paint().unwrap();
    assert_eq!(c.session().unredirected_window(), None);

    c.enable_unredirect();
    c.pre_paint().unwrap();
    assert_eq!(c.session().unredirected_window(), Some(PLAYER));

    // A window mapped on top takes the player back into compositing
    map_window(&mut c, TOOLTIP, Rect::new(10, 10, 50, 20), true);
    c.pre_paint().unwrap();
    assert_eq!(c.session().unredirected_window(), None);
    assert_eq!(
        c.redirector().calls.last(),
        Some(&RedirectCall::Redirect { window: PLAYER })
    );
    // Its freshly rebuilt pixmap is sampled behind a fence
    assert!(c.pipeline().surfaces_updated_this_frame());
    assert_eq!(c.pipeline().ring().stats().inserts, 1);
}

#[test]
fn test_runtime_runs_frames() {
    let (mut c, backend) = compositor(CompositorConfig::default());
    let mut runtime = Runtime::new();
    let mut events = QueuedEvents::new();

    events.push(SessionEvent::WindowCreated {
        window: PLAYER,
        geometry: Rect::new(0, 0, 320, 200),
        override_redirect: false,
        argb: false,
    });
    events.push(SessionEvent::WindowMapped { window: PLAYER });

    let mut painted = 0;
    for _ in 0..12 {
        while let Some(notify) = backend.poll_event() {
            events.push(SessionEvent::AlarmNotify(notify));
        }
        events.push(SessionEvent::Damage { window: PLAYER, area: Rect::new(0, 0, 4, 4) });
        runtime.dispatch(&mut c, &mut events).unwrap();
        assert!(runtime.needs_redraw());

        runtime
            .render_frame(&mut c, |session| {
                assert_eq!(session.stacking_order(), &[PLAYER]);
                painted += 1;
            })
            .unwrap();
        assert!(!c.pipeline().surfaces_updated_this_frame());
    }

    assert_eq!(painted, 12);
    assert_eq!(runtime.total_frames(), 12);
    assert_eq!(c.pipeline().ring().stats().frames, 12);
}
