//! Builds the most-specific-to-bare fallback list of request subjects for
//! a destination, by inserting progressively shorter locality prefixes
//! between the reversed host and the method token.

use crate::codec::encode_request_subject;

pub fn normalize_locality(locality: &str) -> String {
    locality.to_ascii_lowercase()
}

/// Returns request subjects most-specific-first: full four-level
/// locality, three levels, two, one, then the bare destination with no
/// locality segment at all (§4.6).
pub fn candidate_subjects(
    plane: &str,
    method: &str,
    host: &str,
    port: &str,
    path: &str,
    locality: &str,
) -> Vec<String> {
    let normalized = normalize_locality(locality);
    let levels: Vec<&str> = normalized.split('.').filter(|s| !s.is_empty()).collect();

    let mut variants = Vec::with_capacity(levels.len() + 1);
    for n in (0..=levels.len()).rev() {
        let prefix = levels[..n].join(".");
        variants.push(build_subject(plane, method, host, port, path, &prefix));
    }
    variants
}

fn build_subject(plane: &str, method: &str, host: &str, port: &str, path: &str, locality_prefix: &str) -> String {
    let base = encode_request_subject(plane, method, host, port, path);
    if locality_prefix.is_empty() {
        return base;
    }
    // Splice the locality prefix in right after the reversed-host token
    // (tokens: plane, port, host, method, path...).
    let mut tokens: Vec<&str> = base.split('.').collect();
    let insert_at = 3;
    let locality_tokens: Vec<&str> = locality_prefix.split('.').collect();
    for (offset, token) in locality_tokens.iter().enumerate() {
        tokens.insert(insert_at + offset, token);
    }
    tokens.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_five_variants_for_four_level_locality() {
        let variants = candidate_subjects("prod", "GET", "beta", "443", "/x", "us.west.dc2.az1");
        assert_eq!(variants.len(), 5);
        assert!(variants[0].contains("us.west.dc2.az1"));
        assert_eq!(variants[4], encode_request_subject("prod", "GET", "beta", "443", "/x"));
    }

    #[test]
    fn empty_locality_yields_only_the_bare_subject() {
        let variants = candidate_subjects("prod", "GET", "beta", "443", "/x", "");
        assert_eq!(variants.len(), 1);
    }

    #[test]
    fn locality_is_lowercased() {
        let variants = candidate_subjects("prod", "GET", "beta", "443", "/x", "US.WEST");
        assert!(variants[0].contains("us.west"));
    }
}
