//! Utility macros and functions shared across the crate.

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
/// It's useful for validation checks where you want to return early with an error
/// if some condition is not satisfied.
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Finds the first occurrence of `needle` in `haystack`, returning the offset
/// of its first byte.
pub(crate) fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Percent-decodes a byte slice, additionally mapping `+` to a space when
/// `form` is set (application/x-www-form-urlencoded semantics).
///
/// Invalid escapes are passed through verbatim rather than rejected.
pub(crate) fn percent_decode(input: &[u8], form: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut iter = input.iter().copied().enumerate();
    while let Some((i, b)) = iter.next() {
        match b {
            b'%' => match (hex_val(input.get(i + 1)), hex_val(input.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    iter.next();
                    iter.next();
                }
                _ => out.push(b'%'),
            },
            b'+' if form => out.push(b' '),
            other => out.push(other),
        }
    }
    out
}

/// Percent-decodes into a `String`, replacing invalid UTF-8 lossily.
pub(crate) fn percent_decode_str(input: &str, form: bool) -> String {
    String::from_utf8_lossy(&percent_decode(input.as_bytes(), form)).into_owned()
}

fn hex_val(byte: Option<&u8>) -> Option<u8> {
    match byte? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_in_middle() {
        assert_eq!(find_subsequence(b"abc\r\n\r\ndef", b"\r\n\r\n"), Some(3));
        assert_eq!(find_subsequence(b"abcdef", b"\r\n"), None);
        assert_eq!(find_subsequence(b"", b"\r\n"), None);
    }

    #[test]
    fn decode_basic() {
        assert_eq!(percent_decode_str("a%20b", false), "a b");
        assert_eq!(percent_decode_str("a+b", true), "a b");
        assert_eq!(percent_decode_str("a+b", false), "a+b");
        assert_eq!(percent_decode_str("%e4%bd%a0%e5%a5%bd", false), "你好");
    }

    #[test]
    fn decode_invalid_escape_passthrough() {
        assert_eq!(percent_decode_str("100%", false), "100%");
        assert_eq!(percent_decode_str("%zz", false), "%zz");
    }
}
