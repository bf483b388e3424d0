//! Marker prefixes rendered onto tab titles.
//!
//! A marked title is exactly `glyph + separator + original title`. Stripping
//! removes at most one such prefix so user titles that merely contain a glyph
//! elsewhere are left alone.

/// Glyphs by stack position, most recent first.
pub const GLYPHS: [&str; 4] = ["\u{1F534}", "\u{1F7E1}", "\u{1F7E2}", "\u{1F535}"];

pub const SEPARATOR: &str = " ";

pub fn glyph(position: usize) -> Option<&'static str> {
    if position == 0 || position > GLYPHS.len() {
        return None;
    }
    Some(GLYPHS[position - 1])
}

/// Full prefix (glyph plus separator) for a 1-based position.
pub fn prefix(position: usize) -> Option<String> {
    glyph(position).map(|g| format!("{g}{SEPARATOR}"))
}

/// Prepends the marker for `position`, or `None` when out of range.
pub fn apply(title: &str, position: usize) -> Option<String> {
    prefix(position).map(|p| format!("{p}{title}"))
}

/// Strips one leading marker prefix, if present.
pub fn strip(title: &str) -> &str {
    for g in GLYPHS {
        if let Some(rest) = title.strip_prefix(g).and_then(|r| r.strip_prefix(SEPARATOR)) {
            return rest;
        }
    }
    title
}
