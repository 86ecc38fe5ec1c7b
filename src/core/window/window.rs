use crate::util::geometry::Rect;

/// Opacity value meaning "fully opaque".
pub const OPAQUE: u8 = 0xff;

/// `_NET_WM_BYPASS_COMPOSITOR` hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BypassHint {
    #[default]
    None,
    /// Client asks to be unredirected when full-screen
    Bypass,
    /// Client asks never to be unredirected
    NeverBypass,
}

impl BypassHint {
    pub fn from_property(value: u32) -> Self {
        match value {
            1 => Self::Bypass,
            2 => Self::NeverBypass,
            _ => Self::None,
        }
    }
}

/// Convert a `_NET_WM_WINDOW_OPACITY` cardinal to an 8-bit opacity.
pub fn opacity_from_property(value: u32) -> u8 {
    (value >> 24) as u8
}

/// A top-level X window as seen by the compositor.
#[derive(Debug, Clone)]
pub struct CompositedWindow {
    pub id: u32,
    /// Position and size including the border
    pub geometry: Rect,
    pub mapped: bool,
    pub override_redirect: bool,
    /// Visual has an alpha channel
    pub argb: bool,
    /// Client set `_NET_WM_OPAQUE_REGION`
    pub has_opaque_region: bool,
    /// Bounding shape is set
    pub shaped: bool,
    pub opacity: u8,
    pub bypass: BypassHint,
    /// Damage object watching this window
    pub damage: Option<u32>,
    /// Damage arrived since the last repaint
    pub needs_repair: bool,
    pub unredirected: bool,
    full_damage_frames: u32,
    does_full_damage: bool,
}

impl CompositedWindow {
    pub fn new(id: u32, geometry: Rect, override_redirect: bool, argb: bool) -> Self {
        Self {
            id,
            geometry,
            mapped: false,
            override_redirect,
            argb,
            has_opaque_region: false,
            shaped: false,
            opacity: OPAQUE,
            bypass: BypassHint::None,
            damage: None,
            needs_repair: false,
            unredirected: false,
            full_damage_frames: 0,
            does_full_damage: false,
        }
    }

    /// Whether the window's pixels fully hide what is below.
    pub fn is_opaque(&self) -> bool {
        !self.argb || self.has_opaque_region
    }

    /// Whether the window covers the whole screen.
    pub fn is_monitor_sized(&self, screen: &Rect) -> bool {
        self.geometry.contains_rect(screen)
    }

    /// Whether the client has been repainting its whole window every frame.
    pub fn does_full_damage(&self) -> bool {
        self.does_full_damage
    }

    pub fn full_damage_frames(&self) -> u32 {
        self.full_damage_frames
    }

    /// Account one damage event. `area` is relative to the window origin.
    ///
    /// Consecutive whole-window damage bumps the counter; anything smaller
    /// resets it. Once `threshold` is reached the window stays a full-damage
    /// client.
    pub fn record_damage(&mut self, area: &Rect, threshold: u32) {
        if self.does_full_damage {
            return;
        }

        let whole = Rect::new(0, 0, self.geometry.width, self.geometry.height);
        if area.contains_rect(&whole) {
            self.full_damage_frames += 1;
        } else {
            self.full_damage_frames = 0;
        }

        if self.full_damage_frames >= threshold {
            tracing::debug!("Window {:#x} repaints fully every frame", self.id);
            self.does_full_damage = true;
        }
    }

    /// Whether this window may bypass compositing when it is on top.
    pub fn should_unredirect(&self, screen: &Rect) -> bool {
        if self.opacity != OPAQUE || self.shaped || !self.is_monitor_sized(screen) {
            return false;
        }

        match self.bypass {
            BypassHint::Bypass => return true,
            BypassHint::NeverBypass => return false,
            BypassHint::None => {}
        }

        if !self.is_opaque() {
            return false;
        }

        self.override_redirect || self.does_full_damage
    }
}
