//! Per-segment percent-escaping (§4.1): alphanumerics, `-`, and `.` pass
//! through; any other byte becomes `%XX` lowercase hex of its ASCII code.

pub(crate) fn escape_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        let is_passthrough = byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.';
        if is_passthrough {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02x}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::escape_segment;

    #[test]
    fn passthrough_alphanumeric_dash_dot() {
        assert_eq!(escape_segment("abc-123.def"), "abc-123.def");
    }

    #[test]
    fn escapes_other_bytes() {
        assert_eq!(escape_segment("a b"), "a%20b");
        assert_eq!(escape_segment("a/b"), "a%2fb");
        assert_eq!(escape_segment("100%"), "100%25");
    }

    #[test]
    fn empty_segment_stays_empty_before_caller_substitution() {
        assert_eq!(escape_segment(""), "");
    }
}
