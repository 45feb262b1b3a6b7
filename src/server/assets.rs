/// The single-page viewer served at `/`.
pub const VIEWER_HTML: &str = include_str!("viewer.html");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_uses_every_api_route() {
        for route in ["/api/projects", "/api/sessions/", "/api/events"] {
            assert!(VIEWER_HTML.contains(route), "viewer does not call {route}");
        }
    }

    #[test]
    fn viewer_guards_non_object_messages() {
        assert!(VIEWER_HTML.contains("typeof message !== \"object\""));
    }

    #[test]
    fn viewer_collects_changes_across_debounce_window() {
        assert!(VIEWER_HTML.contains("state.pendingChanges.add(filename)"));
        assert!(VIEWER_HTML.contains("changed.some("));
    }
}
