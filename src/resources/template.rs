//! Minimal `{{name}}` / `{{name|fn}}` template renderer (§4.11
//! `executeTemplate`): plain substitution for text templates, with HTML
//! escaping on by default for `.html` templates and named escape-bypass
//! functions (`attr`, `url`, `css`, `safe`) to opt out per-placeholder.

use super::TemplateData;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    UnknownVariable(String),
    UnterminatedPlaceholder,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::UnknownVariable(name) => write!(f, "unknown template variable {name:?}"),
            TemplateError::UnterminatedPlaceholder => write!(f, "unterminated {{ placeholder"),
        }
    }
}

impl std::error::Error for TemplateError {}

pub fn render_text(source: &str, data: &TemplateData) -> Result<String, TemplateError> {
    render(source, data, false)
}

pub fn render_html(source: &str, data: &TemplateData) -> Result<String, TemplateError> {
    render(source, data, true)
}

fn render(source: &str, data: &TemplateData, html_escape_by_default: bool) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    loop {
        let Some(start) = rest.find("{{") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            return Err(TemplateError::UnterminatedPlaceholder);
        };
        let expr = after_open[..end].trim();
        let (name, modifier) = match expr.split_once('|') {
            Some((n, m)) => (n.trim(), Some(m.trim())),
            None => (expr, None),
        };
        let value = data
            .get(name)
            .ok_or_else(|| TemplateError::UnknownVariable(name.to_string()))?;
        out.push_str(&apply_modifier(value, modifier, html_escape_by_default));
        rest = &after_open[end + 2..];
    }
    Ok(out)
}

fn apply_modifier(value: &str, modifier: Option<&str>, html_escape_by_default: bool) -> String {
    match modifier {
        Some("safe") => value.to_string(),
        Some("attr") => escape_html(value),
        Some("url") => url_encode(value),
        Some("css") => value.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '#').collect(),
        Some(other) => {
            tracing::warn!(target: "resources", modifier = other, "unknown template modifier, falling back to default escaping");
            if html_escape_by_default { escape_html(value) } else { value.to_string() }
        }
        None if html_escape_by_default => escape_html(value),
        None => value.to_string(),
    }
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn url_encode(value: &str) -> String {
    let mut out = String::new();
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
