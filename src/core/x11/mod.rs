//! X11 backends built on x11rb.
//!
//! One `X11Connection` is shared (single-threaded, `Rc`) between the sync
//! backend, the redirector and the event source. Events read while the sync
//! backend drains an alarm are stashed here and handed out again by
//! [`X11Connection::poll_event`].

pub mod display;
pub mod events;
pub mod gl;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use x11rb::connection::Connection;
use x11rb::protocol::xproto::Window;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use crate::core::errors::{CoreError, Result};
use crate::util::geometry::Rect;

pub use display::X11DisplaySync;
pub use events::{X11EventSource, X11Redirector};
pub use gl::GlSyncApi;

x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        _NET_WM_WINDOW_OPACITY,
        _NET_WM_BYPASS_COMPOSITOR,
        _NET_WM_OPAQUE_REGION,
    }
}

/// Shared X connection plus the events stashed while draining alarms.
pub struct X11Connection {
    conn: RustConnection,
    screen_num: usize,
    root: Window,
    atoms: Atoms,
    stash: RefCell<VecDeque<Event>>,
}

impl X11Connection {
    /// Connect to `display` (or `$DISPLAY`) and intern the atoms we watch.
    pub fn connect(display: Option<&str>) -> Result<Rc<Self>> {
        let (conn, screen_num) = x11rb::connect(display)
            .map_err(|e| CoreError::x11_error(format!("cannot open display: {}", e)))?;
        let root = conn.setup().roots[screen_num].root;

        let atoms = Atoms::new(&conn)
            .map_err(|e| CoreError::x11_error(e.to_string()))?
            .reply()
            .map_err(|e| CoreError::x11_error(e.to_string()))?;

        crate::wlog!(crate::util::logging::X11, "Connected to X display (screen {}, root {:#x})", screen_num, root);

        Ok(Rc::new(Self {
            conn,
            screen_num,
            root,
            atoms,
            stash: RefCell::new(VecDeque::new()),
        }))
    }

    pub fn conn(&self) -> &RustConnection {
        &self.conn
    }

    pub fn root(&self) -> Window {
        self.root
    }

    pub fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    /// Root window size.
    pub fn screen_rect(&self) -> Rect {
        let screen = &self.conn.setup().roots[self.screen_num];
        Rect::new(0, 0, screen.width_in_pixels as u32, screen.height_in_pixels as u32)
    }

    /// Next event, stashed ones first. Never blocks.
    pub fn poll_event(&self) -> Result<Option<Event>> {
        if let Some(event) = self.stash.borrow_mut().pop_front() {
            return Ok(Some(event));
        }
        self.conn
            .poll_for_event()
            .map_err(|e| CoreError::x11_error(e.to_string()))
    }

    /// Next event, stashed ones first. Blocks until one arrives.
    pub fn wait_for_event(&self) -> Result<Event> {
        if let Some(event) = self.stash.borrow_mut().pop_front() {
            return Ok(event);
        }
        self.conn
            .wait_for_event()
            .map_err(|e| CoreError::x11_error(e.to_string()))
    }

    pub(crate) fn stash_event(&self, event: Event) {
        self.stash.borrow_mut().push_back(event);
    }

    /// Take the first stashed event matching `predicate`.
    pub(crate) fn take_stashed<F>(&self, predicate: F) -> Option<Event>
    where
        F: Fn(&Event) -> bool,
    {
        let mut stash = self.stash.borrow_mut();
        let pos = stash.iter().position(predicate)?;
        stash.remove(pos)
    }

    pub fn flush(&self) -> Result<()> {
        self.conn
            .flush()
            .map_err(|e| CoreError::x11_error(e.to_string()))
    }
}
