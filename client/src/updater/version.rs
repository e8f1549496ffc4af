/// Returns `true` when version `x` is strictly greater than version `y`.
///
/// Both strings are split on `.` and compared segment by segment as integers;
/// segments that are not numbers count as `0`. When every shared segment is
/// equal, `x` only wins if it has more segments than `y`: `1.2.0` is newer
/// than `1.2`, but never the other way round.
pub fn is_greater(x: &str, y: &str) -> bool {
    let x: Vec<i64> = x.split('.').map(segment_value).collect();
    let y: Vec<i64> = y.split('.').map(segment_value).collect();

    for (a, b) in x.iter().zip(y.iter()) {
        if a != b {
            return a > b;
        }
    }

    x.len() > y.len()
}

fn segment_value(segment: &str) -> i64 {
    segment.trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greater_by_value() {
        assert!(is_greater("1.2.3", "1.2.2"));
        assert!(is_greater("2.0", "1.9.9"));
        assert!(is_greater("1.10", "1.9"));
        assert!(!is_greater("1.2.2", "1.2.3"));
    }

    #[test]
    fn test_greater_by_depth() {
        assert!(is_greater("1.2.3", "1.2"));
        assert!(!is_greater("1.2", "1.2.3"));
    }

    #[test]
    fn test_equal_versions_are_never_greater() {
        assert!(!is_greater("1.2", "1.2.0"));
        assert!(!is_greater("1.2.0", "1.2.0"));
        assert!(!is_greater("", ""));
    }

    #[test]
    fn test_non_numeric_segments_count_as_zero() {
        assert!(!is_greater("1.beta", "1.0"));
        assert!(is_greater("1.1", "1.rc1"));
        assert!(is_greater("1.0.1", "1.x"));
    }

    #[test]
    fn test_negative_segments_are_signed() {
        assert!(is_greater("1.0", "1.-1"));
        assert!(!is_greater("1.-1", "1.0"));
        assert!(is_greater("0", "-3.5"));
    }

    #[test]
    fn test_empty_remote_version_is_not_an_update() {
        assert!(!is_greater("", "0.1.0"));
    }
}
