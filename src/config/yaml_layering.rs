//! Layers `config.yaml` and `config.local.yaml` files while walking up
//! from the working directory to the filesystem root (§4.10 step 1),
//! nearest-directory-wins, scoped under the caller's hostname block.

use std::collections::HashMap;
use std::path::Path;

use serde_yaml::Value;

/// Loads and merges every `config.yaml`/`config.local.yaml` pair found
/// from `start_dir` up to the root, then extracts the flat `{name:
/// value}` map declared for `hostname` (falling back to the YAML's
/// top-level `all` block).
pub fn load_layered_yaml(start_dir: &Path, hostname: &str) -> HashMap<String, String> {
    let mut layers = Vec::new();
    let mut dir = Some(start_dir.to_path_buf());
    while let Some(current) = dir {
        for name in ["config.yaml", "config.local.yaml"] {
            let candidate = current.join(name);
            if let Ok(text) = std::fs::read_to_string(&candidate) {
                if let Ok(value) = serde_yaml::from_str::<Value>(&text) {
                    layers.push(value);
                }
            }
        }
        dir = current.parent().map(|p| p.to_path_buf());
    }
    // Furthest-ancestor first so nearer directories (pushed later as we
    // walk up) override them when merged in order.
    layers.reverse();

    let mut merged: HashMap<String, String> = HashMap::new();
    for layer in &layers {
        merge_scope(layer, "all", &mut merged);
        merge_scope(layer, hostname, &mut merged);
    }
    merged
}

fn merge_scope(layer: &Value, scope: &str, out: &mut HashMap<String, String>) {
    let Some(mapping) = layer.as_mapping() else {
        return;
    };
    let Some(scoped) = mapping.get(&Value::String(scope.to_string())) else {
        return;
    };
    let Some(scoped_mapping) = scoped.as_mapping() else {
        return;
    };
    for (key, value) in scoped_mapping {
        let Some(key) = key.as_str() else { continue };
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        out.insert(key.to_string(), rendered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn merges_all_and_hostname_scopes_nearest_wins() {
        let dir = std::env::temp_dir().join(format!("connector-config-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut file = std::fs::File::create(dir.join("config.yaml")).unwrap();
        writeln!(
            file,
            "all:\n  Log.Level: info\nmyhost:\n  Log.Level: debug\n"
        )
        .unwrap();

        let merged = load_layered_yaml(&dir, "myhost");
        assert_eq!(merged.get("Log.Level"), Some(&"debug".to_string()));

        let merged_other = load_layered_yaml(&dir, "otherhost");
        assert_eq!(merged_other.get("Log.Level"), Some(&"info".to_string()));

        std::fs::remove_dir_all(&dir).ok();
    }
}
