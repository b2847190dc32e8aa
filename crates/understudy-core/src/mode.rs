//! Operating modes.
//!
//! Exactly one mode is active at a time. The active mode lives in a
//! [`ModeState`] cell that is shared by the admin surface (writer) and every
//! request handler (readers). Handlers read the mode once when a request
//! starts and keep that snapshot until the response is written.
//!
//! ## Modes
//!
//! - **Virtualize**: forward to the real destination, persist nothing (default)
//! - **Capture**: forward and persist the resulting pair
//! - **Simulate**: answer from recorded pairs only
//! - **Modify**: transform the request, forward it, transform the response
//! - **Synthesize**: let the transform fabricate the whole response

use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Mode parsing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModeError {
    /// The supplied name is not one of the known modes.
    #[error("unknown mode '{0}', available modes: virtualize, capture, simulate, modify, synthesize")]
    Unknown(String),
}

/// Proxy operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Forward unmodified and return the real response.
    #[default]
    Virtualize,

    /// Forward and record the pair.
    Capture,

    /// Replay recorded pairs, never contact upstream.
    Simulate,

    /// Transform request and response around a real upstream call.
    Modify,

    /// Fabricate responses through the transform.
    Synthesize,
}

impl Mode {
    /// All modes, in counter order.
    pub const ALL: [Mode; 5] = [
        Mode::Virtualize,
        Mode::Capture,
        Mode::Simulate,
        Mode::Modify,
        Mode::Synthesize,
    ];

    /// Returns the mode as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Virtualize => "virtualize",
            Self::Capture => "capture",
            Self::Simulate => "simulate",
            Self::Modify => "modify",
            Self::Synthesize => "synthesize",
        }
    }

    /// Returns true if this mode cannot run without a configured transform.
    pub fn requires_transform(&self) -> bool {
        matches!(self, Self::Modify | Self::Synthesize)
    }

    /// Position of the mode in [`Mode::ALL`].
    pub(crate) fn index(&self) -> usize {
        match self {
            Self::Virtualize => 0,
            Self::Capture => 1,
            Self::Simulate => 2,
            Self::Modify => 3,
            Self::Synthesize => 4,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "virtualize" => Ok(Self::Virtualize),
            "capture" => Ok(Self::Capture),
            "simulate" => Ok(Self::Simulate),
            "modify" => Ok(Self::Modify),
            "synthesize" => Ok(Self::Synthesize),
            _ => Err(ModeError::Unknown(s.to_string())),
        }
    }
}

/// Shared cell holding the active mode.
///
/// Cloning is cheap; all clones observe the same mode.
#[derive(Debug, Clone, Default)]
pub struct ModeState {
    current: Arc<RwLock<Mode>>,
}

impl ModeState {
    /// Creates a new cell starting in the given mode.
    pub fn new(mode: Mode) -> Self {
        Self {
            current: Arc::new(RwLock::new(mode)),
        }
    }

    /// Returns a snapshot of the active mode.
    pub fn get(&self) -> Mode {
        *self.current.read()
    }

    /// Replaces the active mode, returning the previous one.
    pub fn set(&self, mode: Mode) -> Mode {
        let mut current = self.current.write();
        std::mem::replace(&mut *current, mode)
    }
}
