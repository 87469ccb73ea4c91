//! Bisync state addressing.
//!
//! rclone names the listings of a bisync pair after both paths with `/` and
//! `:` flattened to `_`. Whether those listings exist on the endpoint is the
//! only record of a completed resync, so this mapping must match rclone's
//! exactly and must be computed with one fixed path order (local = path1).

/// Flatten a path into a single file-name component.
///
/// Every `/` and `:` becomes `_`, runs of `_` collapse to one, and leading
/// `_` are stripped. All other characters, `-` and `.` included, are kept.
pub fn sanitize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for ch in path.chars() {
        let ch = if ch == '/' || ch == ':' { '_' } else { ch };
        if ch == '_' && out.ends_with('_') {
            continue;
        }
        out.push(ch);
    }
    out.trim_start_matches('_').to_string()
}

/// State identifier for the pair (`path1`, `path2`).
pub fn state_identifier(path1: &str, path2: &str) -> String {
    format!("{}..{}", sanitize(path1), sanitize(path2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/content/abc-123", "content_abc-123")]
    #[case("drive1:/per/testing/t1", "drive1_per_testing_t1")]
    #[case("///a/b", "a_b")]
    #[case("gdrive:", "gdrive_")]
    #[case("a__b//c", "a_b_c")]
    #[case("", "")]
    #[case("with.dot-and_dash", "with.dot-and_dash")]
    fn sanitize_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize(input), expected);
    }

    #[test]
    fn state_identifier_is_stable_across_calls() {
        let first = state_identifier("/content/abc-123", "drive1:/per/testing/t1");
        for _ in 0..10 {
            assert_eq!(
                state_identifier("/content/abc-123", "drive1:/per/testing/t1"),
                first
            );
        }
        assert_eq!(first, "content_abc-123..drive1_per_testing_t1");
    }

    #[test]
    fn state_identifier_depends_on_path_order() {
        let forward = state_identifier("/content/x", "gdrive:/y");
        let reversed = state_identifier("gdrive:/y", "/content/x");
        assert_ne!(forward, reversed);
    }
}
