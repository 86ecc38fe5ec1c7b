//! Compositor session.
//!
//! Owns the composited windows and their stacking order, accounts damage,
//! and decides which (if any) window bypasses compositing. Everything that
//! talks to the display server goes through a [`Redirector`].

use std::collections::HashMap;

use crate::core::errors::{CoreError, Result};
use crate::core::sync::AlarmNotify;
use crate::core::window::{BypassHint, CompositedWindow, WindowTree};
use crate::util::geometry::Rect;

// ============================================================================
// Events
// ============================================================================

/// A window property the compositor tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyChange {
    Opacity(u8),
    BypassCompositor(BypassHint),
    OpaqueRegion(bool),
    Shaped(bool),
}

/// Display events the session consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    WindowCreated {
        window: u32,
        geometry: Rect,
        override_redirect: bool,
        argb: bool,
    },
    WindowDestroyed { window: u32 },
    WindowMapped { window: u32 },
    WindowUnmapped { window: u32 },
    /// `above` is the sibling the window now sits on, `None` for the bottom.
    WindowConfigured {
        window: u32,
        geometry: Rect,
        above: Option<u32>,
    },
    /// `area` is relative to the window origin.
    Damage { window: u32, area: Rect },
    PropertyChanged { window: u32, change: PropertyChange },
    AlarmNotify(AlarmNotify),
}

/// What applying one event did to the composited scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Nothing on screen changed.
    Unchanged,
    /// The scene changed (mapping, stacking, geometry or properties) but no
    /// window contents did.
    Repaint,
    /// A composited window drew new contents; the frame must wait for the
    /// X server before sampling them.
    Damaged,
}

impl EventOutcome {
    pub fn needs_repaint(self) -> bool {
        self != EventOutcome::Unchanged
    }
}

// ============================================================================
// Redirector
// ============================================================================

/// Display-side composite and damage operations.
pub trait Redirector {
    /// Start receiving damage for `window`; returns the damage handle.
    fn watch_damage(&mut self, window: u32) -> Result<u32>;
    fn unwatch_damage(&mut self, damage: u32);
    /// Clear accumulated damage so further drawing is reported again.
    fn repair_damage(&mut self, damage: u32) -> Result<()>;
    /// Route `window` directly to the screen (`true`) or back into an
    /// off-screen buffer (`false`).
    fn set_unredirected(&mut self, window: u32, unredirected: bool) -> Result<()>;
}

/// A call made on a [`RecordingRedirector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectCall {
    Watch { window: u32, damage: u32 },
    Unwatch { damage: u32 },
    Repair { damage: u32 },
    Unredirect { window: u32 },
    Redirect { window: u32 },
}

/// Redirector that only records what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingRedirector {
    next_damage: u32,
    pub calls: Vec<RedirectCall>,
}

impl RecordingRedirector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_calls(&mut self) -> Vec<RedirectCall> {
        std::mem::take(&mut self.calls)
    }
}

impl Redirector for RecordingRedirector {
    fn watch_damage(&mut self, window: u32) -> Result<u32> {
        self.next_damage += 1;
        let damage = self.next_damage;
        self.calls.push(RedirectCall::Watch { window, damage });
        Ok(damage)
    }

    fn unwatch_damage(&mut self, damage: u32) {
        self.calls.push(RedirectCall::Unwatch { damage });
    }

    fn repair_damage(&mut self, damage: u32) -> Result<()> {
        self.calls.push(RedirectCall::Repair { damage });
        Ok(())
    }

    fn set_unredirected(&mut self, window: u32, unredirected: bool) -> Result<()> {
        self.calls.push(if unredirected {
            RedirectCall::Unredirect { window }
        } else {
            RedirectCall::Redirect { window }
        });
        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

/// Windows, stacking and unredirection state of one compositor run.
pub struct CompositorSession {
    windows: HashMap<u32, CompositedWindow>,
    tree: WindowTree,
    screen: Rect,
    full_damage_threshold: u32,
    unredirect_enabled: bool,
    disable_unredirect_count: u32,
    unredirected_window: Option<u32>,
}

impl CompositorSession {
    pub fn new(screen: Rect, full_damage_threshold: u32, unredirect_enabled: bool) -> Self {
        Self {
            windows: HashMap::new(),
            tree: WindowTree::new(),
            screen,
            full_damage_threshold,
            unredirect_enabled,
            disable_unredirect_count: 0,
            unredirected_window: None,
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn window(&self, id: u32) -> Option<&CompositedWindow> {
        self.windows.get(&id)
    }

    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Window ids from bottom to top.
    pub fn stacking_order(&self) -> &[u32] {
        &self.tree.stacking_order
    }

    pub fn screen(&self) -> Rect {
        self.screen
    }

    pub fn set_screen(&mut self, screen: Rect) {
        self.screen = screen;
    }

    pub fn unredirected_window(&self) -> Option<u32> {
        self.unredirected_window
    }

    /// Topmost mapped window.
    pub fn top_window(&self) -> Option<&CompositedWindow> {
        self.tree
            .iter_top_down()
            .filter_map(|id| self.windows.get(&id))
            .find(|w| w.mapped)
    }

    fn window_mut(&mut self, id: u32) -> Result<&mut CompositedWindow> {
        self.windows
            .get_mut(&id)
            .ok_or(CoreError::InvalidWindowId(id))
    }

    // =========================================================================
    // Unredirect Inhibition
    // =========================================================================

    /// Prevent any window from bypassing compositing. Calls nest.
    pub fn disable_unredirect(&mut self) {
        self.disable_unredirect_count += 1;
    }

    /// Undo one [`CompositorSession::disable_unredirect`].
    pub fn enable_unredirect(&mut self) {
        if self.disable_unredirect_count == 0 {
            tracing::warn!("enable_unredirect called more times than disable_unredirect");
            return;
        }
        self.disable_unredirect_count -= 1;
    }

    pub fn unredirect_inhibited(&self) -> bool {
        !self.unredirect_enabled || self.disable_unredirect_count > 0
    }

    // =========================================================================
    // Event Processing
    // =========================================================================

    /// Apply one display event and report what it did to the scene.
    ///
    /// Alarm notifications are not the session's business and are ignored.
    pub fn process_event<R: Redirector>(
        &mut self,
        event: &SessionEvent,
        redirector: &mut R,
    ) -> Result<EventOutcome> {
        match *event {
            SessionEvent::WindowCreated {
                window,
                geometry,
                override_redirect,
                argb,
            } => {
                self.add_window(window, geometry, override_redirect, argb, redirector)?;
                Ok(EventOutcome::Unchanged)
            }
            SessionEvent::WindowDestroyed { window } => Ok(self.remove_window(window, redirector)),
            SessionEvent::WindowMapped { window } => Ok(self.set_mapped(window, true)),
            SessionEvent::WindowUnmapped { window } => Ok(self.set_mapped(window, false)),
            SessionEvent::WindowConfigured {
                window,
                geometry,
                above,
            } => {
                let Some(w) = self.windows.get_mut(&window) else {
                    return Ok(EventOutcome::Unchanged);
                };
                w.geometry = geometry;
                let visible = w.mapped;
                self.tree.restack_above(window, above);
                Ok(if visible { EventOutcome::Repaint } else { EventOutcome::Unchanged })
            }
            SessionEvent::Damage { window, area } => Ok(self.process_damage(window, &area)),
            SessionEvent::PropertyChanged { window, change } => {
                let Some(w) = self.windows.get_mut(&window) else {
                    return Ok(EventOutcome::Unchanged);
                };
                match change {
                    PropertyChange::Opacity(opacity) => w.opacity = opacity,
                    PropertyChange::BypassCompositor(hint) => w.bypass = hint,
                    PropertyChange::OpaqueRegion(present) => w.has_opaque_region = present,
                    PropertyChange::Shaped(shaped) => w.shaped = shaped,
                }
                Ok(if w.mapped { EventOutcome::Repaint } else { EventOutcome::Unchanged })
            }
            SessionEvent::AlarmNotify(_) => Ok(EventOutcome::Unchanged),
        }
    }

    fn add_window<R: Redirector>(
        &mut self,
        window: u32,
        geometry: Rect,
        override_redirect: bool,
        argb: bool,
        redirector: &mut R,
    ) -> Result<()> {
        if self.windows.contains_key(&window) {
            tracing::debug!("Window {:#x} already tracked", window);
            return Ok(());
        }

        let mut w = CompositedWindow::new(window, geometry, override_redirect, argb);
        w.damage = Some(redirector.watch_damage(window)?);
        tracing::debug!(
            "Tracking window {:#x} {}x{}+{}+{}{}",
            window,
            geometry.width,
            geometry.height,
            geometry.x,
            geometry.y,
            if override_redirect { " (override-redirect)" } else { "" }
        );

        self.windows.insert(window, w);
        self.tree.insert(window);
        Ok(())
    }

    fn set_mapped(&mut self, window: u32, mapped: bool) -> EventOutcome {
        match self.windows.get_mut(&window) {
            Some(w) if w.mapped != mapped => {
                w.mapped = mapped;
                EventOutcome::Repaint
            }
            _ => EventOutcome::Unchanged,
        }
    }

    fn remove_window<R: Redirector>(&mut self, window: u32, redirector: &mut R) -> EventOutcome {
        let Some(w) = self.windows.remove(&window) else {
            return EventOutcome::Unchanged;
        };
        self.tree.remove(window);

        if let Some(damage) = w.damage {
            redirector.unwatch_damage(damage);
        }
        // The X window is gone; there is nothing left to redirect.
        if self.unredirected_window == Some(window) {
            self.unredirected_window = None;
        }
        tracing::debug!("Window {:#x} removed", window);
        if w.mapped {
            EventOutcome::Repaint
        } else {
            EventOutcome::Unchanged
        }
    }

    fn process_damage(&mut self, window: u32, area: &Rect) -> EventOutcome {
        let threshold = self.full_damage_threshold;
        let Some(w) = self.windows.get_mut(&window) else {
            return EventOutcome::Unchanged;
        };

        w.record_damage(area, threshold);
        // Damage is reported once per bounding-box growth, so it has to be
        // subtracted even while nobody composites the window.
        w.needs_repair = true;
        if !w.mapped || w.unredirected {
            return EventOutcome::Unchanged;
        }
        EventOutcome::Damaged
    }

    // =========================================================================
    // Pre-Paint
    // =========================================================================

    /// Redirect or unredirect the top window as the policy demands. Returns
    /// whether a window came back into compositing, whose off-screen
    /// contents the server has just rebuilt.
    pub fn update_unredirect<R: Redirector>(&mut self, redirector: &mut R) -> Result<bool> {
        let expected = if self.unredirect_inhibited() {
            None
        } else {
            self.top_window()
                .filter(|w| w.should_unredirect(&self.screen))
                .map(|w| w.id)
        };

        if expected == self.unredirected_window {
            return Ok(false);
        }

        let mut redirected = false;
        if let Some(previous) = self.unredirected_window.take() {
            redirector.set_unredirected(previous, false)?;
            if let Some(w) = self.windows.get_mut(&previous) {
                w.unredirected = false;
                redirected = true;
            }
            tracing::debug!("Window {:#x} composited again", previous);
        }

        if let Some(next) = expected {
            redirector.set_unredirected(next, true)?;
            self.window_mut(next)?.unredirected = true;
            self.unredirected_window = Some(next);
            tracing::debug!("Window {:#x} bypasses compositing", next);
        }
        Ok(redirected)
    }

    /// Prepare every window for painting: repair damage that arrived since
    /// the last frame so the server reports new drawing again.
    pub fn pre_paint_windows<R: Redirector>(&mut self, redirector: &mut R) -> Result<()> {
        for id in &self.tree.stacking_order {
            let Some(w) = self.windows.get_mut(id) else {
                continue;
            };
            if !w.needs_repair {
                continue;
            }
            w.needs_repair = false;
            if let Some(damage) = w.damage {
                redirector.repair_damage(damage)?;
            }
        }
        Ok(())
    }
}
