//! Locale-best-match string lookup (§4.11 `loadString`): parses
//! `Accept-Language`, sorts by descending q-value, and for each
//! preference tries the tag then progressively trims the rightmost
//! `-...` suffix before moving to the next preference.

use std::collections::HashMap;

/// `{locale: {key: value}}`, e.g. `strings["en-US"]["greeting"]`.
#[derive(Default)]
pub struct LocalizedStrings {
    bundles: HashMap<String, HashMap<String, String>>,
    default_locale: String,
}

impl LocalizedStrings {
    pub fn new(default_locale: impl Into<String>) -> Self {
        Self {
            bundles: HashMap::new(),
            default_locale: default_locale.into(),
        }
    }

    pub fn define(&mut self, locale: &str, key: &str, value: impl Into<String>) {
        self.bundles
            .entry(locale.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Resolves `key` for the best locale match in `accept_language`,
    /// falling back to `default`, then `en`, then `en-US` (§4.11).
    pub fn load(&self, accept_language: &str, key: &str) -> Option<&str> {
        for locale in best_match_locale(accept_language, &self.known_locales()) {
            if let Some(value) = self.bundles.get(&locale).and_then(|b| b.get(key)) {
                return Some(value.as_str());
            }
        }
        for fallback in [self.default_locale.as_str(), "en", "en-US"] {
            if let Some(value) = self.bundles.get(fallback).and_then(|b| b.get(key)) {
                return Some(value.as_str());
            }
        }
        None
    }

    fn known_locales(&self) -> Vec<String> {
        self.bundles.keys().cloned().collect()
    }
}

struct Preference {
    tag: String,
    q: f32,
}

/// Parses an `Accept-Language` header into `(tag, q)` pairs sorted by
/// descending q-value (ties keep header order), then expands each
/// preference into itself and its progressively-trimmed suffixes, so
/// the caller can test `known` locales against the full candidate list.
pub fn best_match_locale(accept_language: &str, known: &[String]) -> Vec<String> {
    let mut preferences: Vec<Preference> = accept_language
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let (tag, q) = match part.split_once(";q=") {
                Some((tag, q)) => (tag.trim(), q.trim().parse().unwrap_or(1.0)),
                None => (part, 1.0),
            };
            Some(Preference {
                tag: tag.to_string(),
                q,
            })
        })
        .collect();
    preferences.sort_by(|a, b| b.q.partial_cmp(&a.q).unwrap_or(std::cmp::Ordering::Equal));

    let mut candidates = Vec::new();
    for preference in &preferences {
        let mut tag = preference.tag.clone();
        loop {
            if known.iter().any(|k| k.eq_ignore_ascii_case(&tag)) && !candidates.contains(&tag) {
                candidates.push(tag.clone());
            }
            match tag.rfind('-') {
                Some(idx) => tag.truncate(idx),
                None => break,
            }
        }
    }
    candidates
}
