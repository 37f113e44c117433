//! Config value validation rules (§4.10): a small DSL string
//! (`"int"`, `"int [1,65535]"`, `"bool"`, `"dur"`, `"str ^regex$"`) parsed
//! once at `DefineConfig` time into a [`Validation`] the registry can
//! cheaply re-check on every incoming value.

use crate::error::ConnectorError;
use regex::Regex;

#[derive(Clone)]
pub enum Validation {
    Any,
    Bool,
    Int,
    IntRange(i64, i64),
    Duration,
    Pattern(Regex),
}

impl Validation {
    pub fn parse(spec: &str) -> Result<Self, ConnectorError> {
        let spec = spec.trim();
        if spec.is_empty() || spec == "any" {
            return Ok(Validation::Any);
        }
        if spec == "bool" {
            return Ok(Validation::Bool);
        }
        if spec == "dur" {
            return Ok(Validation::Duration);
        }
        if spec == "int" {
            return Ok(Validation::Int);
        }
        if let Some(range) = spec.strip_prefix("int ") {
            let range = range.trim().trim_start_matches('[').trim_end_matches(']');
            let (lo, hi) = range
                .split_once(',')
                .ok_or_else(|| ConnectorError::Init(format!("bad int range validation {spec:?}")))?;
            let lo: i64 = lo
                .trim()
                .parse()
                .map_err(|_| ConnectorError::Init(format!("bad int range lower bound in {spec:?}")))?;
            let hi: i64 = hi
                .trim()
                .parse()
                .map_err(|_| ConnectorError::Init(format!("bad int range upper bound in {spec:?}")))?;
            return Ok(Validation::IntRange(lo, hi));
        }
        if let Some(pattern) = spec.strip_prefix("str ") {
            let re = Regex::new(pattern.trim())
                .map_err(|e| ConnectorError::Init(format!("bad regex validation {spec:?}: {e}")))?;
            return Ok(Validation::Pattern(re));
        }
        Err(ConnectorError::Init(format!("unrecognized validation spec {spec:?}")))
    }

    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Validation::Any => true,
            Validation::Bool => matches!(value, "true" | "false"),
            Validation::Int => value.parse::<i64>().is_ok(),
            Validation::IntRange(lo, hi) => value
                .parse::<i64>()
                .map(|n| n >= *lo && n <= *hi)
                .unwrap_or(false),
            Validation::Duration => humantime_like(value),
            Validation::Pattern(re) => re.is_match(value),
        }
    }
}

/// Accepts plain integers (milliseconds) or a `<number><unit>` suffix
/// (`ms`, `s`, `m`, `h`) without pulling in a duration-parsing crate the
/// rest of the config DSL doesn't otherwise need.
fn humantime_like(value: &str) -> bool {
    let trimmed = value.trim();
    let numeric_prefix_len = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(numeric_prefix_len);
    if number.parse::<f64>().is_err() {
        return false;
    }
    matches!(unit, "" | "ms" | "s" | "m" | "h")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_int_range_and_validates() {
        let v = Validation::parse("int [1,65535]").unwrap();
        assert!(v.accepts("443"));
        assert!(!v.accepts("0"));
        assert!(!v.accepts("abc"));
    }

    #[test]
    fn parses_regex_pattern() {
        let v = Validation::parse("str ^[a-z]+$").unwrap();
        assert!(v.accepts("abc"));
        assert!(!v.accepts("ABC"));
    }

    #[test]
    fn duration_accepts_unit_suffix() {
        let v = Validation::Duration;
        assert!(v.accepts("1500"));
        assert!(v.accepts("1.5s"));
        assert!(!v.accepts("soon"));
    }
}
