//! Drives the compositor against the in-memory sync backend.
//!
//! Usage: `headless [FRAMES] [--stall-gpu-at FRAME]`

use anyhow::{bail, Context, Result};

use xsync_compositor::core::session::RecordingRedirector;
use xsync_compositor::core::sync::MemorySync;
use xsync_compositor::core::{QueuedEvents, Runtime};
use xsync_compositor::prelude::*;
use xsync_compositor::util::logging::{self, MAIN};
use xsync_compositor::{wlog, Compositor};

const SCREEN: Rect = Rect { x: 0, y: 0, width: 1920, height: 1080 };

struct Args {
    frames: u64,
    stall_gpu_at: Option<u64>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        frames: 300,
        stall_gpu_at: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--stall-gpu-at" => {
                let value = iter.next().context("--stall-gpu-at needs a frame number")?;
                args.stall_gpu_at = Some(value.parse().context("invalid frame number")?);
            }
            other if other.starts_with('-') => bail!("unknown option {}", other),
            other => args.frames = other.parse().context("invalid frame count")?,
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    logging::init_tracing();
    let args = parse_args()?;

    let mut config = CompositorConfig::from_env();
    config.display = None;

    let backend = MemorySync::new();
    let mut compositor = Compositor::new(
        config.clone(),
        backend.clone(),
        backend.clone(),
        RecordingRedirector::new(),
        SCREEN,
    );
    let mut runtime = Runtime::with_frame_timing(config.frame_timing.clone());
    let mut events = QueuedEvents::new();

    // A full-screen video player under a small notification window.
    events.push(SessionEvent::WindowCreated {
        window: 0x200001,
        geometry: SCREEN,
        override_redirect: false,
        argb: false,
    });
    events.push(SessionEvent::WindowMapped { window: 0x200001 });
    events.push(SessionEvent::WindowCreated {
        window: 0x300001,
        geometry: Rect::new(1500, 40, 380, 120),
        override_redirect: true,
        argb: true,
    });
    events.push(SessionEvent::WindowMapped { window: 0x300001 });

    for frame in 1..=args.frames {
        if args.stall_gpu_at == Some(frame) {
            wlog!(MAIN, "Stalling the GPU at frame {}", frame);
            backend.set_gpu_stalled(true);
        }

        while let Some(notify) = backend.poll_event() {
            events.push(SessionEvent::AlarmNotify(notify));
        }
        events.push(SessionEvent::Damage {
            window: 0x200001,
            area: SCREEN,
        });
        if frame == args.frames / 2 {
            // The notification goes away; the player is alone on screen.
            events.push(SessionEvent::WindowUnmapped { window: 0x300001 });
        }

        runtime.dispatch(&mut compositor, &mut events)?;
        runtime.render_frame(&mut compositor, |_| {})?;
    }

    let stats = compositor.pipeline().stats();
    let ring = compositor.pipeline().ring();
    wlog!(
        MAIN,
        "{} frames: {} fenced, {} XSync fallbacks, ring {:?}, reboots {}, unredirected {:?}",
        stats.frames,
        stats.fenced_frames,
        stats.fallback_round_trips,
        ring.stats(),
        ring.reboot_count(),
        compositor.session().unredirected_window()
    );
    wlog!(MAIN, "Redirector calls: {}", compositor.redirector().calls.len());
    Ok(())
}
