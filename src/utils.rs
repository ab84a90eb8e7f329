//! Shared helpers: duration parsing for CLI flags and artifact-name slugs.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static SLUG_INVALID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_.-]+").expect("static regex"));
static SLUG_REPEATS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_{2,}").expect("static regex"));

/// Parse a duration string such as "500ms", "30s", "5m" or "2h".
///
/// A bare number is read as seconds. Fractions are accepted for s/m/h.
pub fn parse_duration_str(s: &str) -> Option<Duration> {
    let s = s.trim();
    let (number, scale) = if let Some(n) = s.strip_suffix("ms") {
        return n.trim().parse::<u64>().ok().map(Duration::from_millis);
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600.0)
    } else {
        (s, 1.0)
    };
    let value = number.trim().parse::<f64>().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(value * scale).ok()
}

/// Parse the per-run timeout flag. `0`, `none` and `off` disable the timeout.
pub fn parse_timeout(s: &str) -> Result<Option<Duration>, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "none" | "off" => return Ok(None),
        _ => {}
    }
    match parse_duration_str(s) {
        Some(d) if d.is_zero() => Ok(None),
        Some(d) => Ok(Some(d)),
        None => Err(format!(
            "invalid timeout '{}': expected e.g. 90s, 30m, 2h or 'none'",
            s
        )),
    }
}

/// Lower-case `s` and squash everything outside `[a-z0-9_.-]` into `_`.
pub fn slugify(s: &str) -> String {
    let lowered = s.trim().to_lowercase();
    let replaced = SLUG_INVALID.replace_all(&lowered, "_");
    let squashed = SLUG_REPEATS.replace_all(&replaced, "_");
    squashed.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_duration_str("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration_str("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration_str("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration_str("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration_str("1.5m"), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_parse_plain_number_is_seconds() {
        assert_eq!(parse_duration_str("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration_str(" 10s "), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse_duration_str("soon"), None);
        assert_eq!(parse_duration_str("-5s"), None);
        assert_eq!(parse_duration_str(""), None);
        assert_eq!(parse_duration_str("1e300h"), None);
        assert!(parse_timeout("1e300h").is_err());
    }

    #[test]
    fn test_parse_timeout_disable() {
        assert_eq!(parse_timeout("none"), Ok(None));
        assert_eq!(parse_timeout("OFF"), Ok(None));
        assert_eq!(parse_timeout("0"), Ok(None));
        assert_eq!(parse_timeout("90s"), Ok(Some(Duration::from_secs(90))));
        assert!(parse_timeout("later").is_err());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Get Users"), "get_users");
        assert_eq!(slugify("  Create / Order!! "), "create_order");
        assert_eq!(slugify("v1.health-check"), "v1.health-check");
        assert_eq!(slugify("Ünïcode name"), "n_code_name");
    }
}
