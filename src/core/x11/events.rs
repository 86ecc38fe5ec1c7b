//! Composite/Damage redirector and the X event translator.

use std::collections::{HashSet, VecDeque};
use std::fmt::Display;
use std::rc::Rc;

use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::ReplyError;
use x11rb::protocol::composite::{self, ConnectionExt as _, Redirect};
use x11rb::protocol::damage::{self, ConnectionExt as _, ReportLevel};
use x11rb::protocol::shape::{self, ConnectionExt as _, SK};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ConnectionExt as _, EventMask, MapState, Window,
    WindowClass,
};
use x11rb::protocol::Event;

use crate::core::errors::{CoreError, Result};
use crate::core::runtime::EventSource;
use crate::core::session::{PropertyChange, Redirector, SessionEvent};
use crate::core::window::window::opacity_from_property;
use crate::core::window::BypassHint;
use crate::core::x11::display::as_alarm_notify;
use crate::core::x11::X11Connection;
use crate::util::geometry::Rect;

fn x11(e: impl Display) -> CoreError {
    CoreError::x11_error(e.to_string())
}

/// Protocol errors on a reply mean the window went away; keep going.
fn gone_is_none<T>(reply: std::result::Result<T, ReplyError>) -> Result<Option<T>> {
    match reply {
        Ok(value) => Ok(Some(value)),
        Err(ReplyError::X11Error(e)) => {
            tracing::debug!("Window vanished during query: {:?}", e.error_kind);
            Ok(None)
        }
        Err(e) => Err(x11(e)),
    }
}

/// Sibling to restack above once untracked windows are skipped: the closest
/// window below `sibling` in `children` (bottom to top) that is not
/// `untracked`, `None` for the bottom. A sibling missing from `children`
/// is returned as is.
fn tracked_sibling(children: &[Window], sibling: Window, untracked: &HashSet<Window>) -> Option<Window> {
    let Some(position) = children.iter().position(|&w| w == sibling) else {
        return Some(sibling);
    };
    children[..position]
        .iter()
        .rev()
        .copied()
        .find(|w| !untracked.contains(w))
}

// ============================================================================
// Redirector
// ============================================================================

/// Composite and Damage requests on a live X server.
pub struct X11Redirector {
    x: Rc<X11Connection>,
}

impl X11Redirector {
    /// Check the Composite and Damage extensions and redirect every child of
    /// the root window into off-screen storage.
    pub fn new(x: Rc<X11Connection>) -> Result<Self> {
        let conn = x.conn();

        conn.extension_information(composite::X11_EXTENSION_NAME)
            .map_err(x11)?
            .ok_or_else(|| CoreError::x11_error("Composite extension not available"))?;
        let composite_version = conn
            .composite_query_version(0, 4)
            .map_err(x11)?
            .reply()
            .map_err(x11)?;

        conn.extension_information(damage::X11_EXTENSION_NAME)
            .map_err(x11)?
            .ok_or_else(|| CoreError::x11_error("Damage extension not available"))?;
        conn.damage_query_version(1, 1)
            .map_err(x11)?
            .reply()
            .map_err(x11)?;

        conn.composite_redirect_subwindows(x.root(), Redirect::MANUAL)
            .map_err(x11)?;
        x.flush()?;

        tracing::info!(
            "Composite {}.{}: redirected subwindows of root {:#x}",
            composite_version.major_version,
            composite_version.minor_version,
            x.root()
        );
        Ok(Self { x })
    }
}

impl Redirector for X11Redirector {
    fn watch_damage(&mut self, window: u32) -> Result<u32> {
        let conn = self.x.conn();
        let damage = conn.generate_id().map_err(x11)?;
        conn.damage_create(damage, window, ReportLevel::BOUNDING_BOX)
            .map_err(x11)?;
        Ok(damage)
    }

    fn unwatch_damage(&mut self, damage: u32) {
        if let Err(e) = self.x.conn().damage_destroy(damage) {
            tracing::warn!("Failed to destroy damage {:#x}: {}", damage, e);
        }
    }

    fn repair_damage(&mut self, damage: u32) -> Result<()> {
        self.x
            .conn()
            .damage_subtract(damage, x11rb::NONE, x11rb::NONE)
            .map_err(x11)?;
        Ok(())
    }

    fn set_unredirected(&mut self, window: u32, unredirected: bool) -> Result<()> {
        let conn = self.x.conn();
        if unredirected {
            conn.composite_unredirect_window(window, Redirect::MANUAL)
                .map_err(x11)?;
        } else {
            conn.composite_redirect_window(window, Redirect::MANUAL)
                .map_err(x11)?;
        }
        Ok(())
    }
}

impl Drop for X11Redirector {
    fn drop(&mut self) {
        let result = self
            .x
            .conn()
            .composite_unredirect_subwindows(self.x.root(), Redirect::MANUAL)
            .map_err(x11)
            .and_then(|_| self.x.flush());
        if let Err(e) = result {
            tracing::warn!("Failed to unredirect root subwindows: {}", e);
        }
    }
}

// ============================================================================
// Event Source
// ============================================================================

/// Translates X events on the shared connection into session events.
pub struct X11EventSource {
    x: Rc<X11Connection>,
    has_shape: bool,
    pending: VecDeque<SessionEvent>,
    /// InputOnly top-levels; never composited, but still part of the stack.
    input_only: HashSet<Window>,
}

impl X11EventSource {
    /// Watch the root window and queue events describing every existing
    /// top-level window, bottom to top.
    pub fn new(x: Rc<X11Connection>) -> Result<Self> {
        let has_shape = x
            .conn()
            .extension_information(shape::X11_EXTENSION_NAME)
            .map_err(x11)?
            .is_some();
        if !has_shape {
            tracing::warn!("Shape extension missing; shaped windows may be unredirected");
        }

        let mut source = Self {
            x,
            has_shape,
            pending: VecDeque::new(),
            input_only: HashSet::new(),
        };

        let conn = source.x.conn();
        conn.grab_server().map_err(x11)?;
        let scan = source.scan_existing();
        source.x.conn().ungrab_server().map_err(x11)?;
        source.x.flush()?;

        let events = scan?;
        tracing::debug!("Initial scan produced {} events", events.len());
        source.pending.extend(events);
        Ok(source)
    }

    fn scan_existing(&mut self) -> Result<Vec<SessionEvent>> {
        let conn = self.x.conn();
        let root = self.x.root();

        let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::SUBSTRUCTURE_NOTIFY);
        conn.change_window_attributes(root, &aux)
            .map_err(x11)?
            .check()
            .map_err(x11)?;

        let tree = conn
            .query_tree(root)
            .map_err(x11)?
            .reply()
            .map_err(x11)?;

        let mut events = Vec::new();
        for child in tree.children {
            events.extend(self.describe_window(child)?);
        }
        Ok(events)
    }

    /// Events bringing a window the compositor has not seen yet up to date.
    fn describe_window(&mut self, window: Window) -> Result<Vec<SessionEvent>> {
        let conn = self.x.conn();

        let cookie = conn.get_window_attributes(window).map_err(x11)?;
        let Some(attributes) = gone_is_none(cookie.reply())? else {
            return Ok(Vec::new());
        };
        if attributes.class == WindowClass::INPUT_ONLY {
            self.input_only.insert(window);
            return Ok(Vec::new());
        }

        let cookie = conn.get_geometry(window).map_err(x11)?;
        let Some(geometry) = gone_is_none(cookie.reply())? else {
            return Ok(Vec::new());
        };

        let aux = ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE);
        conn.change_window_attributes(window, &aux).map_err(x11)?;
        if self.has_shape {
            conn.shape_select_input(window, true).map_err(x11)?;
        }

        let border = geometry.border_width as u32 * 2;
        let mut events = vec![SessionEvent::WindowCreated {
            window,
            geometry: Rect::new(
                geometry.x as i32,
                geometry.y as i32,
                geometry.width as u32 + border,
                geometry.height as u32 + border,
            ),
            override_redirect: attributes.override_redirect,
            argb: geometry.depth == 32,
        }];

        let atoms = *self.x.atoms();
        for atom in [
            atoms._NET_WM_WINDOW_OPACITY,
            atoms._NET_WM_BYPASS_COMPOSITOR,
            atoms._NET_WM_OPAQUE_REGION,
        ] {
            if let Some(change) = self.read_property(window, atom)? {
                events.push(SessionEvent::PropertyChanged { window, change });
            }
        }

        if self.has_shape {
            let cookie = conn.shape_query_extents(window).map_err(x11)?;
            if let Some(extents) = gone_is_none(cookie.reply())? {
                if extents.bounding_shaped {
                    events.push(SessionEvent::PropertyChanged {
                        window,
                        change: PropertyChange::Shaped(true),
                    });
                }
            }
        }

        if attributes.map_state == MapState::VIEWABLE {
            events.push(SessionEvent::WindowMapped { window });
        }
        Ok(events)
    }

    /// Current value of a tracked property; `None` for atoms we do not track.
    fn read_property(&self, window: Window, atom: Atom) -> Result<Option<PropertyChange>> {
        let atoms = self.x.atoms();
        let conn = self.x.conn();

        if atom == atoms._NET_WM_OPAQUE_REGION {
            let cookie = conn
                .get_property(false, window, atom, AtomEnum::CARDINAL, 0, 0)
                .map_err(x11)?;
            let present = gone_is_none(cookie.reply())?.is_some_and(|r| r.bytes_after > 0);
            return Ok(Some(PropertyChange::OpaqueRegion(present)));
        }

        if atom != atoms._NET_WM_WINDOW_OPACITY && atom != atoms._NET_WM_BYPASS_COMPOSITOR {
            return Ok(None);
        }

        let cookie = conn
            .get_property(false, window, atom, AtomEnum::CARDINAL, 0, 1)
            .map_err(x11)?;
        let reply = gone_is_none(cookie.reply())?;
        let value = reply
            .as_ref()
            .and_then(|r| r.value32())
            .and_then(|mut values| values.next());

        Ok(Some(if atom == atoms._NET_WM_WINDOW_OPACITY {
            PropertyChange::Opacity(opacity_from_property(value.unwrap_or(u32::MAX)))
        } else {
            PropertyChange::BypassCompositor(BypassHint::from_property(value.unwrap_or(0)))
        }))
    }

    /// Map a ConfigureNotify sibling onto a window the session tracks.
    fn resolve_sibling(&self, sibling: Window) -> Result<Option<Window>> {
        if sibling == x11rb::NONE {
            return Ok(None);
        }
        if !self.input_only.contains(&sibling) {
            return Ok(Some(sibling));
        }
        let tree = self
            .x
            .conn()
            .query_tree(self.x.root())
            .map_err(x11)?
            .reply()
            .map_err(x11)?;
        Ok(tracked_sibling(&tree.children, sibling, &self.input_only))
    }

    /// Translate one X event.
    pub fn translate(&mut self, event: &Event) -> Result<Vec<SessionEvent>> {
        let root = self.x.root();

        let translated = match event {
            Event::CreateNotify(ev) if ev.parent == root => return self.describe_window(ev.window),
            Event::DestroyNotify(ev) if ev.event == root => {
                self.input_only.remove(&ev.window);
                SessionEvent::WindowDestroyed { window: ev.window }
            }
            Event::MapNotify(ev) if ev.event == root => SessionEvent::WindowMapped { window: ev.window },
            Event::UnmapNotify(ev) if ev.event == root => {
                SessionEvent::WindowUnmapped { window: ev.window }
            }
            Event::ReparentNotify(ev) if ev.event == root => {
                if ev.parent == root {
                    return self.describe_window(ev.window);
                }
                self.input_only.remove(&ev.window);
                SessionEvent::WindowDestroyed { window: ev.window }
            }
            Event::ConfigureNotify(ev) if ev.event == root => {
                let border = ev.border_width as u32 * 2;
                SessionEvent::WindowConfigured {
                    window: ev.window,
                    geometry: Rect::new(
                        ev.x as i32,
                        ev.y as i32,
                        ev.width as u32 + border,
                        ev.height as u32 + border,
                    ),
                    above: self.resolve_sibling(ev.above_sibling)?,
                }
            }
            Event::PropertyNotify(ev) => match self.read_property(ev.window, ev.atom)? {
                Some(change) => SessionEvent::PropertyChanged { window: ev.window, change },
                None => return Ok(Vec::new()),
            },
            Event::ShapeNotify(ev) if ev.shape_kind == SK::BOUNDING => SessionEvent::PropertyChanged {
                window: ev.affected_window,
                change: PropertyChange::Shaped(ev.shaped),
            },
            Event::DamageNotify(ev) => SessionEvent::Damage {
                window: ev.drawable,
                area: Rect::new(
                    ev.area.x as i32,
                    ev.area.y as i32,
                    ev.area.width as u32,
                    ev.area.height as u32,
                ),
            },
            Event::Error(err) => {
                tracing::debug!("X error {:?} on request {}", err.error_kind, err.major_opcode);
                return Ok(Vec::new());
            }
            other => match as_alarm_notify(other) {
                Some(notify) => SessionEvent::AlarmNotify(notify),
                None => return Ok(Vec::new()),
            },
        };
        Ok(vec![translated])
    }
}

impl X11EventSource {
    /// Block until at least one X event arrives, then drain the rest.
    pub fn wait_events(&mut self) -> Result<Vec<SessionEvent>> {
        if !self.pending.is_empty() {
            return self.poll_events();
        }
        self.x.flush()?;
        let first = self.x.wait_for_event()?;
        let mut events = self.translate(&first)?;
        events.extend(self.poll_events()?);
        Ok(events)
    }
}

impl EventSource for X11EventSource {
    fn poll_events(&mut self) -> Result<Vec<SessionEvent>> {
        let mut events: Vec<SessionEvent> = self.pending.drain(..).collect();
        while let Some(event) = self.x.poll_event()? {
            events.extend(self.translate(&event)?);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_sibling_skips_input_only_windows() {
        let untracked: HashSet<Window> = [0x30, 0x40].into_iter().collect();
        let children = [0x10, 0x20, 0x30, 0x40, 0x50];

        assert_eq!(tracked_sibling(&children, 0x40, &untracked), Some(0x20));
        assert_eq!(tracked_sibling(&children, 0x30, &untracked), Some(0x20));

        // Nothing tracked below: the window goes to the bottom
        let children = [0x30, 0x10];
        assert_eq!(tracked_sibling(&children, 0x30, &untracked), None);

        // Sibling already gone from the tree
        assert_eq!(tracked_sibling(&children, 0x99, &untracked), Some(0x99));
    }
}
