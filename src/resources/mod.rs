//! Resource FS and localized strings (§4.11): embedded-asset access,
//! template rendering, and locale-best-match string lookup.

mod strings;
mod template;

pub use strings::{best_match_locale, LocalizedStrings};
pub use template::{render_html, render_text, TemplateError};

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ConnectorError;

/// A flat map of resource name to bytes, loaded once at startup from a
/// root directory (a stand-in for a compiled-in asset bundle: this crate
/// reads from disk at startup rather than fabricating a dependency on an
/// asset-embedding crate).
#[derive(Default)]
pub struct ResourceFs {
    root: Option<PathBuf>,
    assets: HashMap<String, Vec<u8>>,
}

impl ResourceFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every regular file under `root` into memory, keyed by its
    /// path relative to `root` with forward slashes.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Self, ConnectorError> {
        let root = root.as_ref().to_path_buf();
        let mut assets = HashMap::new();
        load_recursive(&root, &root, &mut assets)?;
        Ok(Self {
            root: Some(root),
            assets,
        })
    }

    pub fn read_file(&self, name: &str) -> Option<&[u8]> {
        self.assets.get(name).map(Vec::as_slice)
    }

    pub fn read_text(&self, name: &str) -> Option<String> {
        self.read_file(name)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .map(str::to_string)
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(name.into(), bytes);
    }

    /// Computes the response a `serve(name, headers)` call would produce:
    /// a SHA-256 ETag, a 304 short-circuit when `if_none_match` already
    /// matches, and a best-guess content type from the file extension.
    pub fn serve(&self, name: &str, if_none_match: Option<&str>) -> Option<ServedAsset> {
        let bytes = self.read_file(name)?;
        let etag = format!("\"{:x}\"", Sha256::digest(bytes));
        if if_none_match == Some(etag.as_str()) {
            return Some(ServedAsset {
                status: 304,
                etag,
                content_type: guess_content_type(name),
                body: Vec::new(),
            });
        }
        Some(ServedAsset {
            status: 200,
            etag,
            content_type: guess_content_type(name),
            body: bytes.to_vec(),
        })
    }
}

pub struct ServedAsset {
    pub status: u16,
    pub etag: String,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

fn guess_content_type(name: &str) -> &'static str {
    match name.rsplit('.').next().unwrap_or("") {
        "html" | "htm" => "text/html; charset=utf-8",
        "json" => "application/json",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn load_recursive(root: &Path, dir: &Path, out: &mut HashMap<String, Vec<u8>>) -> Result<(), ConnectorError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| ConnectorError::Init(format!("reading resource dir {}: {e}", dir.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| ConnectorError::Init(format!("reading resource entry: {e}")))?;
        let path = entry.path();
        if path.is_dir() {
            load_recursive(root, &path, out)?;
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let bytes = std::fs::read(&path)
            .map_err(|e| ConnectorError::Init(format!("reading resource {}: {e}", path.display())))?;
        out.insert(relative, bytes);
    }
    Ok(())
}

pub type TemplateData = BTreeMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_returns_304_when_etag_matches() {
        let mut fs = ResourceFs::new();
        fs.insert("index.html", b"<h1>hi</h1>".to_vec());
        let first = fs.serve("index.html", None).unwrap();
        assert_eq!(first.status, 200);

        let cached = fs.serve("index.html", Some(&first.etag)).unwrap();
        assert_eq!(cached.status, 304);
        assert!(cached.body.is_empty());
    }

    #[test]
    fn content_type_guessed_from_extension() {
        let mut fs = ResourceFs::new();
        fs.insert("app.js", b"console.log(1)".to_vec());
        let served = fs.serve("app.js", None).unwrap();
        assert_eq!(served.content_type, "text/javascript; charset=utf-8");
    }
}
