//! Path-version suffix parsing.
//!
//! A trailing `@v<N>` or `@<relative-time>` addresses a historical version
//! of the file in front of it. Anything else after an `@` is part of the
//! file name, so `user@host` stays a plain path.

/// How a historical version is being addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionQuery<'a> {
    /// `@v<N>`: a specific version id.
    Id(u32),
    /// `@2h`, `@30m`, `@1d`, `@yesterday`: the version live at that moment.
    Time(&'a str),
}

/// Split `path` at its last `@`. Returns the real path and the query, or
/// the untouched path and `None` when the trailer is not a recognised
/// version suffix.
pub fn parse_version_path(path: &str) -> (&str, Option<VersionQuery<'_>>) {
    let at = match path.rfind('@') {
        Some(0) | None => return (path, None),
        Some(at) => at,
    };
    let (real, suffix) = (&path[..at], &path[at + 1..]);

    if let Some(digits) = suffix.strip_prefix('v') {
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = digits.parse::<u32>() {
                return (real, Some(VersionQuery::Id(id)));
            }
        }
    }

    if is_time_suffix(suffix) {
        return (real, Some(VersionQuery::Time(suffix)));
    }

    (path, None)
}

/// `yesterday`, or one or more digits followed by `h`, `m` or `d`.
fn is_time_suffix(suffix: &str) -> bool {
    if suffix == "yesterday" {
        return true;
    }
    match suffix.as_bytes() {
        [digits @ .., unit] if !digits.is_empty() => {
            matches!(unit, b'h' | b'm' | b'd') && digits.iter().all(|b| b.is_ascii_digit())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_id_suffix() {
        assert_eq!(
            parse_version_path("/docs/report.txt@v3"),
            ("/docs/report.txt", Some(VersionQuery::Id(3)))
        );
        assert_eq!(
            parse_version_path("image.png@v1024"),
            ("image.png", Some(VersionQuery::Id(1024)))
        );
    }

    #[test]
    fn time_suffix() {
        assert_eq!(
            parse_version_path("/x@2h"),
            ("/x", Some(VersionQuery::Time("2h")))
        );
        assert_eq!(
            parse_version_path("/a/b@30m"),
            ("/a/b", Some(VersionQuery::Time("30m")))
        );
        assert_eq!(
            parse_version_path("/a@yesterday"),
            ("/a", Some(VersionQuery::Time("yesterday")))
        );
    }

    #[test]
    fn plain_paths_survive() {
        assert_eq!(parse_version_path("/usr/bin/bash"), ("/usr/bin/bash", None));
        assert_eq!(parse_version_path("user@host"), ("user@host", None));
        assert_eq!(
            parse_version_path("my_email@google.com"),
            ("my_email@google.com", None)
        );
    }

    #[test]
    fn malformed_suffixes_decline_interpretation() {
        assert_eq!(parse_version_path("weird_file@v"), ("weird_file@v", None));
        assert_eq!(parse_version_path("file@v12x"), ("file@v12x", None));
        assert_eq!(parse_version_path("file@h"), ("file@h", None));
        assert_eq!(parse_version_path("file@12y"), ("file@12y", None));
        // an @ at position 0 is a file name, not a suffix
        assert_eq!(parse_version_path("@v3"), ("@v3", None));
    }

    #[test]
    fn last_at_sign_wins() {
        assert_eq!(
            parse_version_path("a@b@v2"),
            ("a@b", Some(VersionQuery::Id(2)))
        );
    }
}
