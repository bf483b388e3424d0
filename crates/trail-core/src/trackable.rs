//! Which locations participate in tracking and which tabs may be reloaded.

use url::Url;

/// Schemes whose pages never run an agent and must not be force-reloaded.
const PRIVILEGED_SCHEMES: [&str; 11] = [
    "about",
    "brave",
    "chrome",
    "chrome-extension",
    "chrome-untrusted",
    "devtools",
    "edge",
    "moz-extension",
    "opera",
    "view-source",
    "vivaldi",
];

/// Only network-fetched pages are tracked in the stack.
pub fn is_trackable(location: &str) -> bool {
    match Url::parse(location) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Reload eligibility is broader than trackability: anything outside the
/// privileged schemes may be reloaded, including pages that are never
/// tracked (for example file views).
pub fn is_reload_eligible(location: &str) -> bool {
    match Url::parse(location) {
        Ok(url) => !PRIVILEGED_SCHEMES.contains(&url.scheme()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_pages_are_trackable() {
        assert!(is_trackable("https://example.com/inbox"));
        assert!(is_trackable("http://localhost:8080/"));
    }

    #[test]
    fn internal_pages_are_not_trackable() {
        assert!(!is_trackable("chrome://settings"));
        assert!(!is_trackable("about:blank"));
        assert!(!is_trackable("devtools://devtools/bundled/inspector.html"));
        assert!(!is_trackable("chrome-extension://abcdef/options.html"));
    }

    #[test]
    fn file_pages_are_not_trackable_but_reload_eligible() {
        assert!(!is_trackable("file:///home/user/notes.html"));
        assert!(is_reload_eligible("file:///home/user/notes.html"));
    }

    #[test]
    fn privileged_pages_are_not_reload_eligible() {
        assert!(!is_reload_eligible("chrome://extensions"));
        assert!(!is_reload_eligible("about:config"));
        assert!(!is_reload_eligible("view-source:https://example.com"));
    }

    #[test]
    fn malformed_locations_are_excluded_everywhere() {
        assert!(!is_trackable(""));
        assert!(!is_trackable("not a url"));
        assert!(!is_reload_eligible(""));
        assert!(!is_reload_eligible("still not a url"));
    }
}
