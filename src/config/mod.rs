pub mod types;

use anyhow::{Context, Result};
use std::path::Path;

pub use types::{BridgeConfig, CameraConfig, ConflictPolicy, LogConfig};

/// 解析 YAML 配置文本，空文档得到默认值
pub fn parse_config(content: &str) -> Result<BridgeConfig> {
    let config: BridgeConfig = if content.trim().is_empty() {
        BridgeConfig::default()
    } else {
        serde_yml::from_str(content).context("parse bridge config")?
    };
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<BridgeConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read config {}", path.display()))?;
    let config = parse_config(&content)?;
    tracing::debug!(path = %path.display(), level = config.log.level.as_str(), "config loaded");
    Ok(config)
}

/// `path` 存在则加载，否则使用默认值
pub fn load_or_default(path: impl AsRef<Path>) -> Result<BridgeConfig> {
    let path = path.as_ref();
    if path.exists() {
        load_config(path)
    } else {
        Ok(BridgeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_empty() {
        let config = parse_config("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.log.level, "info");
        assert!(config.log.forward_to_host);
        assert_eq!(config.camera.on_conflict, ConflictPolicy::Supersede);
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = parse_config("camera:\n  on_conflict: reject\n").unwrap();
        assert_eq!(config.camera.on_conflict, ConflictPolicy::Reject);
        assert_eq!(config.log.level, "info");

        let config = parse_config("log:\n  level: debug\n  forward_to_host: false\n").unwrap();
        assert_eq!(config.log.level, "debug");
        assert!(!config.log.forward_to_host);
    }

    #[test]
    fn rejects_bad_log_filter() {
        let err = parse_config("log:\n  level: \"xplane_bridge=[\"\n").unwrap_err();
        assert!(err.to_string().contains("invalid log level"));
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(parse_config("camera:\n  on_conflict: steal\n").is_err());
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.yaml");
        std::fs::write(&path, "log:\n  level: \"xplane_bridge=trace\"\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.log.level, "xplane_bridge=trace");

        let missing = dir.path().join("missing.yaml");
        assert!(load_config(&missing).is_err());
        assert_eq!(load_or_default(&missing).unwrap(), BridgeConfig::default());
    }
}
