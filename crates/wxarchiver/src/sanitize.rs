//! Helpers for turning upstream strings into safe path segments and log fields.
//!
//! Camera names come straight from the source API and end up as directory
//! names in the archive tree, so they are normalized before use. URLs may carry
//! signed query strings and are trimmed before they reach a log line.

/// Normalizes a camera name into a single lowercase path segment.
///
/// Spaces, hyphens and any other non-alphanumeric characters become `_`,
/// runs of underscores collapse, and leading/trailing underscores are removed.
/// Returns `fallback` when nothing usable remains.
///
/// - `"North Runway"` → `"north_runway"`
/// - `"Ramp - East"` → `"ramp_east"`
pub fn sanitize_camera_name(name: &str, fallback: &str) -> String {
    let mut safe = String::with_capacity(name.len());
    let mut last_was_underscore = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            safe.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            safe.push('_');
            last_was_underscore = true;
        }
    }

    let trimmed = safe.trim_matches('_');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Default directory name for a camera the source did not name.
pub fn camera_fallback_name(index: u32) -> String {
    format!("cam_{}", index)
}

/// Drops the query string and fragment from a URL for logging.
///
/// - `https://cdn.example/cam.jpg?sig=abc` → `https://cdn.example/cam.jpg`
pub fn redact_url(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_lowercases_and_replaces_spaces() {
        assert_eq!(sanitize_camera_name("North Runway", "x"), "north_runway");
    }

    #[test]
    fn test_sanitize_replaces_hyphens() {
        assert_eq!(sanitize_camera_name("Ramp-East", "x"), "ramp_east");
        assert_eq!(sanitize_camera_name("Ramp - East", "x"), "ramp_east");
    }

    #[test]
    fn test_sanitize_strips_unsafe_characters() {
        assert_eq!(sanitize_camera_name("../etc/passwd", "x"), "etc_passwd");
        assert_eq!(sanitize_camera_name("  Tower (West)  ", "x"), "tower_west");
    }

    #[test]
    fn test_sanitize_empty_uses_fallback() {
        assert_eq!(sanitize_camera_name("", "cam_2"), "cam_2");
        assert_eq!(sanitize_camera_name("---", "cam_0"), "cam_0");
    }

    #[test]
    fn test_camera_fallback_name() {
        assert_eq!(camera_fallback_name(3), "cam_3");
    }

    #[test]
    fn test_redact_url_drops_query() {
        assert_eq!(
            redact_url("https://cdn.example/cam.jpg?sig=abc&exp=1"),
            "https://cdn.example/cam.jpg"
        );
        assert_eq!(redact_url("https://cdn.example/a#frag"), "https://cdn.example/a");
        assert_eq!(redact_url("https://cdn.example/a"), "https://cdn.example/a");
    }
}
