// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use crate::schema::Config;

/// Ordered search paths, lowest to highest precedence: system-wide, then
/// XDG home/config locations, then workspace-local dotfiles. An explicit
/// `--config` path (if any) is merged in last by [`load`].
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("/etc/conduit/config.yaml"));
    paths.push(PathBuf::from("/etc/conduit/config.yml"));

    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".conduit").join("config.yaml"));
        paths.push(home.join(".conduit").join("config.yml"));
    }
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("conduit").join("config.yaml"));
        paths.push(config_dir.join("conduit").join("config.yml"));
    }

    paths.push(PathBuf::from(".conduit/config.yaml"));
    paths.push(PathBuf::from(".conduit.yaml"));
    paths.push(PathBuf::from("conduit.yaml"));
    paths.push(PathBuf::from(".conduit/config.yml"));
    paths.push(PathBuf::from(".conduit.yml"));
    paths.push(PathBuf::from("conduit.yml"));

    paths
}

/// Load and merge the config document from the ordered search paths, then
/// merge an explicit override path (if given) on top. Missing files along
/// the search path are skipped; a missing `extra` path is an error since
/// the caller named it explicitly.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Null;

    for path in config_search_paths() {
        if let Some(layer) = load_yaml_layer(&path)? {
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(extra) = extra {
        let contents = std::fs::read_to_string(extra)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", extra.display()))?;
        let layer: serde_yaml::Value = serde_yaml::from_str(&contents)?;
        merge_yaml(&mut merged, layer);
    }

    if merged.is_null() {
        return Ok(Config::default());
    }

    let config: Config = serde_yaml::from_value(merged)?;
    Ok(config)
}

fn load_yaml_layer(path: &Path) -> anyhow::Result<Option<serde_yaml::Value>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)?;
    let value: serde_yaml::Value = serde_yaml::from_str(&contents)?;
    Ok(Some(value))
}

/// Recursively merge `src` into `dst`. Mappings merge key-by-key; any other
/// value type (scalars, sequences) lets `src` overwrite `dst` wholesale.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(dst_map), serde_yaml::Value::Mapping(src_map)) => {
            for (key, src_val) in src_map {
                match dst_map.get_mut(&key) {
                    Some(dst_val) => merge_yaml(dst_val, src_val),
                    None => {
                        dst_map.insert(key, src_val);
                    }
                }
            }
        }
        (dst, src) => *dst = src,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = yaml("gateway:\n  port: 8787\n");
        let src = yaml("gateway:\n  port: 9000\n");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["gateway"]["port"].as_u64(), Some(9000));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = yaml("agent:\n  primary: main\n  fallback: backup\n");
        let src = yaml("agent:\n  primary: other\n");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["agent"]["primary"].as_str(), Some("other"));
        assert_eq!(dst["agent"]["fallback"].as_str(), Some("backup"));
    }

    #[test]
    fn merge_nested_tables() {
        let mut dst = yaml("models:\n  main:\n    provider: anthropic\n    model: claude\n");
        let src = yaml("models:\n  backup:\n    provider: openai\n    model: gpt-4o\n");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["models"]["main"]["provider"].as_str(), Some("anthropic"));
        assert_eq!(dst["models"]["backup"]["provider"].as_str(), Some("openai"));
    }

    #[test]
    fn load_returns_error_when_explicit_path_missing() {
        let result = load(Some(Path::new("/nonexistent/conduit/config.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_with_no_extra_path_returns_defaults() {
        // Assumes no ambient /etc/conduit or ~/.conduit config exists in the
        // test environment; exercises the "no layers found" fallback path.
        let config = load(None).unwrap();
        assert_eq!(config.gateway.port, 9000);
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "gateway:\n  port: 12345\nagent:\n  primary: main\n").unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.gateway.port, 12345);
        assert_eq!(config.agent.primary.as_deref(), Some("main"));
    }
}
