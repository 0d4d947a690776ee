use semver::Version;

use crate::error::DomainError;

/// Parse a version string, tolerating a leading `v`/`V` and a missing patch
/// component (`1.7` parses as `1.7.0`). Image tags are expected to be semver;
/// anything else is rejected.
pub fn parse_version(s: &str) -> Result<Version, DomainError> {
    let trimmed = s.trim();
    let bare = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if bare.is_empty() {
        return Err(DomainError::InvalidVersion(s.to_string()));
    }

    if let Ok(v) = Version::parse(bare) {
        return Ok(v);
    }
    // "1.7" → "1.7.0"
    let dots = bare.chars().filter(|c| *c == '.').count();
    if dots == 1 {
        if let Ok(v) = Version::parse(&format!("{}.0", bare)) {
            return Ok(v);
        }
    }
    Err(DomainError::InvalidVersion(s.to_string()))
}

/// Normalize to the bare `MAJOR.MINOR.PATCH` form ("v1.2.3" → "1.2.3").
/// Returns the input unchanged when it does not parse.
pub fn normalize_version(s: &str) -> String {
    match parse_version(s) {
        Ok(v) => v.to_string(),
        Err(_) => s.trim().to_string(),
    }
}

/// Compare two version strings. Unparseable inputs sort last.
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    match (parse_version(a), parse_version(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        (Ok(_), Err(_)) => std::cmp::Ordering::Greater,
        (Err(_), Ok(_)) => std::cmp::Ordering::Less,
        (Err(_), Err(_)) => std::cmp::Ordering::Equal,
    }
}

/// Make a version string safe for use inside a backup filename.
///
/// Empty input maps to `"unknown"`; characters that are unsafe in filenames
/// (`/ \ : * ? " < > |`) and whitespace are replaced with `-`. Idempotent on
/// already-sanitized inputs.
pub fn sanitize_version(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    trimmed
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_whitespace() => '-',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn parses_with_and_without_v() {
        assert_eq!(parse_version("v1.7.0").unwrap(), Version::new(1, 7, 0));
        assert_eq!(parse_version("1.7.0").unwrap(), Version::new(1, 7, 0));
        assert_eq!(parse_version("1.7").unwrap(), Version::new(1, 7, 0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_version("latest").is_err());
        assert!(parse_version("").is_err());
        assert!(parse_version("v").is_err());
        assert!(parse_version("one.two.three").is_err());
    }

    #[test]
    fn normalize_strips_prefix() {
        assert_eq!(normalize_version("v1.2.3"), "1.2.3");
        assert_eq!(normalize_version("1.2.3"), "1.2.3");
    }

    #[test]
    fn compare_orders_semver_not_lexicographic() {
        assert_eq!(compare_versions("v1.10.0", "v1.9.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.2.3", "v1.2.3"), Ordering::Equal);
    }

    #[test]
    fn sanitize_empty_is_unknown() {
        assert_eq!(sanitize_version(""), "unknown");
        assert_eq!(sanitize_version("  "), "unknown");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_version("1.7:0/beta");
        assert_eq!(once, "1.7-0-beta");
        assert_eq!(sanitize_version(&once), once);
        assert_eq!(sanitize_version("unknown"), "unknown");
    }
}
