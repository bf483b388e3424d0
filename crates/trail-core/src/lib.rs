use serde::{Deserialize, Serialize};
use std::fmt;

pub mod marker;
pub mod protocol;
pub mod stack;
pub mod trackable;

/// Host-assigned tab identifier, stable for the lifetime of the tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-assigned window identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Upper bound on the display mode, fixed by the marker glyph table.
pub const MAX_DISPLAY_MODE: usize = marker::GLYPHS.len();

/// How many recent tabs carry a marker. Also caps the tracked stack length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMode(usize);

impl DisplayMode {
    pub const SINGLE: Self = Self(1);

    /// Clamps the requested count into the supported range.
    pub fn new(count: usize) -> Self {
        Self(count.clamp(1, MAX_DISPLAY_MODE))
    }

    pub fn tracked(self) -> usize {
        self.0
    }

    /// Whether a 1-based position is rendered under this mode.
    pub fn shows(self, position: usize) -> bool {
        position >= 1 && position <= self.0
    }
}

impl Default for DisplayMode {
    fn default() -> Self {
        Self::SINGLE
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mode_clamps_into_supported_range() {
        assert_eq!(DisplayMode::new(0).tracked(), 1);
        assert_eq!(DisplayMode::new(1).tracked(), 1);
        assert_eq!(DisplayMode::new(4).tracked(), 4);
        assert_eq!(DisplayMode::new(9).tracked(), MAX_DISPLAY_MODE);
    }

    #[test]
    fn display_mode_filters_positions() {
        let single = DisplayMode::SINGLE;
        assert!(single.shows(1));
        assert!(!single.shows(0));
        assert!(!single.shows(2));

        let four = DisplayMode::new(4);
        assert!(four.shows(1));
        assert!(four.shows(4));
        assert!(!four.shows(5));
    }

    #[test]
    fn tab_id_serializes_transparently() {
        let encoded = serde_json::to_string(&TabId(42)).expect("encode tab id");
        assert_eq!(encoded, "42");
        let decoded: TabId = serde_json::from_str("42").expect("decode tab id");
        assert_eq!(decoded, TabId(42));
    }
}
