//! Compositor configuration.
//!
//! Defaults are tuned for current Mesa/X.Org stacks. Every field can be
//! overridden from the environment through [`CompositorConfig::from_env`].

use std::time::Duration;

use crate::core::runtime::FrameTimingConfig;

/// Smallest ring that still leaves one slot of spacing between insert and reset.
pub const MIN_RING_SIZE: usize = 2;

/// Upper bound on the ring size; each slot holds four server objects.
pub const MAX_RING_SIZE: usize = 64;

// ============================================================================
// Sync Configuration
// ============================================================================

/// Configuration for the X/GPU fence ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Use fence-based synchronization when the display supports it
    pub enabled: bool,
    /// Number of fence slots in the ring
    pub ring_size: usize,
    /// Bounded wait used when a slot has not completed by reset time
    pub completion_timeout: Duration,
    /// Reboots tolerated before the ring is disabled for the session
    pub max_reboots: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ring_size: 10,
            completion_timeout: Duration::from_secs(1),
            max_reboots: 2,
        }
    }
}

impl SyncConfig {
    /// Ring size clamped to `MIN_RING_SIZE..=MAX_RING_SIZE`.
    pub fn effective_ring_size(&self) -> usize {
        self.ring_size.clamp(MIN_RING_SIZE, MAX_RING_SIZE)
    }

    /// Number of frames between inserting into a slot and resetting it.
    ///
    /// Always half the ring; this relationship is what guarantees a slot has
    /// completed on the GPU before it is reused.
    pub fn reset_spacing(&self) -> usize {
        self.effective_ring_size() / 2
    }
}

// ============================================================================
// Compositor Configuration
// ============================================================================

/// Configuration for the compositor
#[derive(Debug, Clone)]
pub struct CompositorConfig {
    /// X display name; `None` uses `$DISPLAY`
    pub display: Option<String>,
    /// Fence ring settings
    pub sync: SyncConfig,
    /// Frame pacing
    pub frame_timing: FrameTimingConfig,
    /// Consecutive full-window damage frames before a client counts as a
    /// full-damage client for unredirection
    pub full_damage_threshold: u32,
    /// Allow full-screen windows to bypass compositing
    pub unredirect_enabled: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            display: None,
            sync: SyncConfig::default(),
            frame_timing: FrameTimingConfig::default(),
            full_damage_threshold: 100,
            unredirect_enabled: true,
        }
    }
}

impl CompositorConfig {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(display) = lookup("DISPLAY").filter(|d| !d.is_empty()) {
            self.display = Some(display);
        }
        if let Some(value) = lookup("XSYNC_COMPOSITOR_SYNC") {
            match parse_bool(&value) {
                Some(enabled) => self.sync.enabled = enabled,
                None => warn_unparsed("XSYNC_COMPOSITOR_SYNC", &value),
            }
        }
        if let Some(value) = lookup("XSYNC_COMPOSITOR_RING_SIZE") {
            match value.trim().parse::<usize>() {
                Ok(size) if size > MAX_RING_SIZE => {
                    tracing::warn!(
                        "XSYNC_COMPOSITOR_RING_SIZE={} is too large, using {}",
                        size,
                        MAX_RING_SIZE
                    );
                    self.sync.ring_size = MAX_RING_SIZE;
                }
                Ok(size) if size >= MIN_RING_SIZE => self.sync.ring_size = size,
                _ => warn_unparsed("XSYNC_COMPOSITOR_RING_SIZE", &value),
            }
        }
        if let Some(value) = lookup("XSYNC_COMPOSITOR_SYNC_TIMEOUT_MS") {
            match value.trim().parse::<u64>() {
                Ok(ms) => self.sync.completion_timeout = Duration::from_millis(ms),
                Err(_) => warn_unparsed("XSYNC_COMPOSITOR_SYNC_TIMEOUT_MS", &value),
            }
        }
        if let Some(value) = lookup("XSYNC_COMPOSITOR_MAX_REBOOTS") {
            match value.trim().parse::<u32>() {
                Ok(n) => self.sync.max_reboots = n,
                Err(_) => warn_unparsed("XSYNC_COMPOSITOR_MAX_REBOOTS", &value),
            }
        }
        if let Some(value) = lookup("XSYNC_COMPOSITOR_UNREDIRECT") {
            match parse_bool(&value) {
                Some(enabled) => self.unredirect_enabled = enabled,
                None => warn_unparsed("XSYNC_COMPOSITOR_UNREDIRECT", &value),
            }
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn warn_unparsed(key: &str, value: &str) {
    tracing::warn!("Ignoring {}={:?}: not a valid value", key, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = CompositorConfig::default();
        assert!(config.sync.enabled);
        assert_eq!(config.sync.ring_size, 10);
        assert_eq!(config.sync.completion_timeout, Duration::from_secs(1));
        assert_eq!(config.sync.max_reboots, 2);
        assert_eq!(config.full_damage_threshold, 100);
    }

    #[test]
    fn test_reset_spacing_follows_ring_size() {
        let mut sync = SyncConfig::default();
        assert_eq!(sync.reset_spacing(), 5);
        sync.ring_size = 7;
        assert_eq!(sync.reset_spacing(), 3);
        sync.ring_size = 0;
        assert_eq!(sync.effective_ring_size(), MIN_RING_SIZE);
        assert_eq!(sync.reset_spacing(), 1);
        sync.ring_size = usize::MAX;
        assert_eq!(sync.effective_ring_size(), MAX_RING_SIZE);
        assert_eq!(sync.reset_spacing(), MAX_RING_SIZE / 2);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CompositorConfig::default();
        config.apply_overrides(lookup_from(&[
            ("DISPLAY", ":1"),
            ("XSYNC_COMPOSITOR_SYNC", "off"),
            ("XSYNC_COMPOSITOR_RING_SIZE", "16"),
            ("XSYNC_COMPOSITOR_SYNC_TIMEOUT_MS", "250"),
            ("XSYNC_COMPOSITOR_MAX_REBOOTS", "5"),
            ("XSYNC_COMPOSITOR_UNREDIRECT", "0"),
        ]));
        assert_eq!(config.display.as_deref(), Some(":1"));
        assert!(!config.sync.enabled);
        assert_eq!(config.sync.ring_size, 16);
        assert_eq!(config.sync.completion_timeout, Duration::from_millis(250));
        assert_eq!(config.sync.max_reboots, 5);
        assert!(!config.unredirect_enabled);
    }

    #[test]
    fn test_bad_overrides_are_ignored() {
        let mut config = CompositorConfig::default();
        config.apply_overrides(lookup_from(&[
            ("XSYNC_COMPOSITOR_SYNC", "maybe"),
            ("XSYNC_COMPOSITOR_RING_SIZE", "1"),
            ("XSYNC_COMPOSITOR_SYNC_TIMEOUT_MS", "soon"),
        ]));
        assert!(config.sync.enabled);
        assert_eq!(config.sync.ring_size, 10);
        assert_eq!(config.sync.completion_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_huge_ring_size_is_clamped() {
        let mut config = CompositorConfig::default();
        config.apply_overrides(lookup_from(&[(
            "XSYNC_COMPOSITOR_RING_SIZE",
            "1000000",
        )]));
        assert_eq!(config.sync.ring_size, MAX_RING_SIZE);
    }
}
