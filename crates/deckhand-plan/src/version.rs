//! Dotted version strings and the patterns that select them.
//!
//! Versions are compared segment by segment as numbers, never lexically,
//! so `2.10.0` sorts above `2.9.0`. Patterns use `*` for a single segment,
//! or for everything that follows when it is the last segment.

use std::cmp::Ordering;

/// Segments a pattern is padded to before lookup.
const PATTERN_SEGMENTS: usize = 4;

/// Turn a requested version into a lookup pattern.
///
/// Empty becomes `*`; anything with fewer than four segments gets `.*`
/// appended so `2.3` selects every `2.3.x` release.
pub fn normalize_pattern(requested: &str) -> String {
    let requested = requested.trim();
    if requested.is_empty() {
        return "*".to_string();
    }
    if requested.split('.').count() < PATTERN_SEGMENTS {
        format!("{requested}.*")
    } else {
        requested.to_string()
    }
}

/// Whether `version` is selected by `pattern`.
///
/// A trailing `*` matches zero or more remaining segments.
pub fn matches_pattern(version: &str, pattern: &str) -> bool {
    let version: Vec<&str> = version.trim().split('.').collect();
    let pattern: Vec<&str> = pattern.trim().split('.').collect();

    for (i, segment) in pattern.iter().enumerate() {
        let last = i + 1 == pattern.len();
        if *segment == "*" && last {
            return version.len() >= i;
        }
        match version.get(i) {
            Some(v) if *segment == "*" || segment == v => {}
            _ => return false,
        }
    }
    version.len() == pattern.len()
}

/// Segment-wise numeric comparison, truncated to the shorter operand.
///
/// Non-numeric segments fall back to string comparison.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    for (x, y) in a.trim().split('.').zip(b.trim().split('.')) {
        let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Highest version in `versions` selected by `pattern`.
pub fn highest_matching<'a, I>(versions: I, pattern: &str) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .filter(|v| matches_pattern(v, pattern))
        .fold(None, |best, v| match best {
            Some(b) if compare_versions(v, b) != Ordering::Greater => Some(b),
            _ => Some(v),
        })
}
