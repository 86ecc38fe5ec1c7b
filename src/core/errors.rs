//! Core error types

use std::time::Duration;

use thiserror::Error;

use crate::core::sync::fence::FenceState;

/// Reasons fence-based synchronization cannot be used on this display.
///
/// These are detected once, while probing, and always lead to the blocking
/// round-trip fallback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("X server does not support the {0} extension")]
    MissingExtension(&'static str),

    #[error("{extension} handshake failed: {message}")]
    HandshakeFailed { extension: &'static str, message: String },

    #[error("GL entry point {0} could not be resolved")]
    MissingSymbol(&'static str),

    #[error("GL implementation lacks {0}")]
    MissingGlExtension(&'static str),

    #[error("GL extension list unavailable: {0}")]
    NoExtensionList(String),
}

/// Errors raised by the fence ring and its slots.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("synchronization unavailable: {0}")]
    Capability(#[from] CapabilityError),

    #[error("display connection error: {0}")]
    Connection(String),

    #[error("fence ring is not initialized")]
    NotInitialized,

    #[error("fence ring disabled after {reboots} reboots")]
    Disabled { reboots: u32 },

    #[error("fence slot {slot} is {found:?}, expected {expected:?}")]
    InvalidState {
        slot: usize,
        expected: FenceState,
        found: FenceState,
    },

    #[error("fence slot {slot} did not complete within {waited:?}")]
    Timeout { slot: usize, waited: Duration },

    #[error("waiting on fence slot {slot} failed")]
    WaitFailed { slot: usize },

    #[error("GPU sync error: {0}")]
    Gpu(String),
}

impl SyncError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }
}

/// Core compositor errors
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    #[error("X11 error: {0}")]
    X11Error(String),

    #[error("Invalid window ID: {0:#x}")]
    InvalidWindowId(u32),

    #[error("Synchronization error: {0}")]
    Sync(#[from] SyncError),
}

impl CoreError {
    pub fn x11_error(msg: impl Into<String>) -> Self {
        Self::X11Error(msg.into())
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
