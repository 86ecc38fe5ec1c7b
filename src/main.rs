use anyhow::{Context, Result};

use xsync_compositor::core::sync::NoGpuSync;
use xsync_compositor::core::x11::{X11Connection, X11DisplaySync, X11EventSource, X11Redirector};
use xsync_compositor::core::Runtime;
use xsync_compositor::prelude::*;
use xsync_compositor::util::logging::{self, MAIN};
use xsync_compositor::{wlog, Compositor};

fn main() -> Result<()> {
    logging::init_tracing();

    let config = CompositorConfig::from_env();
    let x = X11Connection::connect(config.display.as_deref())
        .context("Failed to connect to the X server")?;

    let redirector = X11Redirector::new(Rc::clone(&x)).context("Failed to redirect windows")?;
    let mut events = X11EventSource::new(Rc::clone(&x)).context("Failed to watch the root window")?;

    // No GL context is created here, so frames use the XSync fallback.
    let mut compositor = Compositor::new(
        config.clone(),
        X11DisplaySync::new(Rc::clone(&x)),
        NoGpuSync,
        redirector,
        x.screen_rect(),
    );
    let mut runtime = Runtime::with_frame_timing(config.frame_timing.clone());

    wlog!(MAIN, "Compositing {} windows", compositor.session().window_count());

    loop {
        if runtime.needs_redraw() {
            runtime.dispatch(&mut compositor, &mut events)?;
        } else {
            for event in events.wait_events()? {
                if compositor.process_event(&event)?.needs_repaint() {
                    runtime.request_redraw();
                }
            }
        }

        if runtime.should_render() {
            let frame = runtime.render_frame(&mut compositor, |session| {
                tracing::trace!("Painting {} windows", session.stacking_order().len());
            })?;
            x.flush()?;

            if frame % 600 == 0 {
                tracing::debug!(
                    "Frame {}: {:.1} fps, {:?}",
                    frame,
                    runtime.fps(),
                    compositor.pipeline().stats()
                );
            }
        } else if runtime.needs_redraw() {
            std::thread::sleep(runtime.time_until_next_frame());
        }
    }
}
