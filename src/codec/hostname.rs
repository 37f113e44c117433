//! Hostname label reversal so subject-space wildcards match
//! longest-prefix hierarchies (§4.1), e.g. `www.example.com` -> `com.example.www`.

pub(crate) fn reverse_hostname_labels(host: &str) -> String {
    host.split('.').rev().collect::<Vec<_>>().join(".")
}

#[cfg(test)]
mod tests {
    use super::reverse_hostname_labels;

    #[test]
    fn reverses_multi_label_host() {
        assert_eq!(reverse_hostname_labels("www.example.com"), "com.example.www");
    }

    #[test]
    fn single_label_is_unchanged() {
        assert_eq!(reverse_hostname_labels("beta"), "beta");
    }
}
