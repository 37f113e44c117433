//! Subject codec.
//!
//! Maps `(plane, host, port, path, method)` to and from transport subject
//! strings: a pure, allocation-light resolver with no I/O, unit-tested
//! directly rather than through the rest of the crate.

mod escape;
mod hostname;

pub(crate) use escape::escape_segment;
pub(crate) use hostname::reverse_hostname_labels;

use crate::error::ConnectorError;

/// Transport-level wildcard tokens (single-token `*`, multi-token `>`).
pub const SINGLE_WILDCARD: &str = "*";
pub const REST_WILDCARD: &str = ">";

/// One path segment after parsing a declared subscription path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// A literal segment, stored pre-escape.
    Literal(String),
    /// A single-slot `{name}` wildcard.
    Wildcard(String),
    /// A trailing greedy `{name+}` / `{name...}` wildcard.
    Greedy(String),
}

/// Parses a declared subscription path into segments, validating brace
/// balance and wildcard placement per §4.2.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, ConnectorError> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let raw_segments: Vec<&str> = trimmed.split('/').collect();
    let n = raw_segments.len();
    let mut segments = Vec::with_capacity(n);

    for (i, raw) in raw_segments.iter().enumerate() {
        let has_open = raw.contains('{');
        let has_close = raw.contains('}');
        if has_open != has_close {
            return Err(ConnectorError::InvalidPath(format!(
                "unbalanced braces in segment {raw:?}"
            )));
        }
        if !has_open {
            segments.push(PathSegment::Literal((*raw).to_string()));
            continue;
        }
        if !raw.starts_with('{') || !raw.ends_with('}') {
            return Err(ConnectorError::InvalidPath(format!(
                "braces must span the entire segment: {raw:?}"
            )));
        }
        let inner = &raw[1..raw.len() - 1];
        let (name, greedy) = if let Some(stripped) = inner.strip_suffix("...") {
            (stripped, true)
        } else if let Some(stripped) = inner.strip_suffix('+') {
            (stripped, true)
        } else {
            (inner, false)
        };
        if !(name.is_empty() || is_lowercase_identifier(name)) {
            return Err(ConnectorError::InvalidPath(format!(
                "wildcard name must be empty or a lowercase identifier: {inner:?}"
            )));
        }
        if greedy && i != n - 1 {
            return Err(ConnectorError::InvalidPath(
                "greedy wildcard only allowed as the final segment".to_string(),
            ));
        }
        segments.push(if greedy {
            PathSegment::Greedy(name.to_string())
        } else {
            PathSegment::Wildcard(name.to_string())
        });
    }
    Ok(segments)
}

fn is_lowercase_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn encode_method(method: &str) -> String {
    if method.eq_ignore_ascii_case("any") {
        SINGLE_WILDCARD.to_string()
    } else {
        method.to_ascii_uppercase()
    }
}

fn encode_port(port: &str) -> String {
    if port == "0" {
        SINGLE_WILDCARD.to_string()
    } else {
        port.to_string()
    }
}

/// Encodes a declared subscription into a transport subject, turning
/// `{name}` into the single-token wildcard and a trailing greedy
/// placeholder into the "rest" wildcard.
pub fn encode_subscription_subject(
    plane: &str,
    method: &str,
    host: &str,
    port: &str,
    path: &str,
) -> Result<String, ConnectorError> {
    let segments = parse_path(path)?;
    let mut tokens = vec![
        plane.to_string(),
        encode_port(port),
        reverse_hostname_labels(host),
        encode_method(method),
    ];
    for segment in &segments {
        match segment {
            PathSegment::Literal(lit) => tokens.push(non_empty(escape_segment(lit))),
            PathSegment::Wildcard(_) => tokens.push(SINGLE_WILDCARD.to_string()),
            PathSegment::Greedy(_) => tokens.push(REST_WILDCARD.to_string()),
        }
    }
    Ok(tokens.join("."))
}

/// Encodes a concrete outgoing request into a transport subject. Path
/// placeholders are escaped literally since the caller supplies concrete
/// values — there is no compiled pattern on the publish side.
pub fn encode_request_subject(
    plane: &str,
    method: &str,
    host: &str,
    port: &str,
    path: &str,
) -> String {
    let trimmed = path.trim_start_matches('/');
    let mut tokens = vec![
        plane.to_string(),
        encode_port(port),
        reverse_hostname_labels(host),
        encode_method(method),
    ];
    if !trimmed.is_empty() {
        for raw in trimmed.split('/') {
            tokens.push(non_empty(escape_segment(raw)));
        }
    }
    tokens.join(".")
}

/// Encodes the response subject a requester listens on for acks/responses.
pub fn encode_response_subject(plane: &str, host: &str, instance_id: &str) -> String {
    format!("{plane}.r.{}.{instance_id}", reverse_hostname_labels(host))
}

fn non_empty(segment: String) -> String {
    if segment.is_empty() {
        "_".to_string()
    } else {
        segment
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Reversing a dotted hostname's labels twice must restore the
        /// original string, for any hostname shape the wire format allows.
        #[test]
        fn reverse_hostname_labels_is_involutive(
            host in "[a-z0-9]{1,6}(\\.[a-z0-9]{1,6}){0,4}"
        ) {
            let once = reverse_hostname_labels(&host);
            let twice = reverse_hostname_labels(&once);
            prop_assert_eq!(twice, host);
        }

        /// Every path segment must survive as exactly one dot-delimited
        /// subject token, regardless of which lowercase/digit segments a
        /// caller supplies.
        #[test]
        fn request_subject_token_count_matches_path_depth(
            host in "[a-z]{1,8}",
            seg_a in "[a-z0-9]{1,8}",
            seg_b in "[a-z0-9]{1,8}",
            seg_c in "[a-z0-9]{1,8}",
        ) {
            let path = format!("/{seg_a}/{seg_b}/{seg_c}");
            let subject = encode_request_subject("prod", "GET", &host, "443", &path);
            let tokens: Vec<&str> = subject.split('.').collect();
            // plane, port, host, method, then one token per path segment.
            prop_assert_eq!(tokens.len(), 4 + 3);
            prop_assert_eq!(tokens[4], seg_a);
            prop_assert_eq!(tokens[5], seg_b);
            prop_assert_eq!(tokens[6], seg_c);
        }
    }
}
