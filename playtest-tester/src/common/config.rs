use anyhow::{Context, Result};
use playtest_core::{ArenaConfig, DriverConfig, Keymap, PolicyConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Optional JSON config file. Every section falls back to its defaults;
/// command-line flags are applied on top.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaytestConfig {
    pub driver: DriverConfig,
    pub policy: PolicyConfig,
    pub keymap: Keymap,
    /// Only read in sandbox mode.
    pub arena: ArenaConfig,
}

impl PlaytestConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playtest_core::TestType;

    #[test]
    fn missing_path_uses_defaults() {
        assert_eq!(PlaytestConfig::load(None).unwrap(), PlaytestConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("playtest.json");
        fs::write(
            &path,
            r#"{
                "driver": { "max_steps": 42, "test_type": "bug_repro", "target": "healthNotNegative" },
                "policy": { "hostile_types": ["zombie"] },
                "keymap": { "interact": "f" }
            }"#,
        )
        .unwrap();
        let config = PlaytestConfig::load(Some(&path)).unwrap();
        assert_eq!(config.driver.max_steps, 42);
        assert_eq!(config.driver.test_type, TestType::BugRepro);
        assert_eq!(config.driver.checkpoint_every, 25);
        assert_eq!(config.policy.hostile_types, vec!["zombie"]);
        assert_eq!(config.keymap.interact, "f");
        assert_eq!(config.keymap.up, "w");
    }

    #[test]
    fn malformed_file_is_reported_with_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = PlaytestConfig::load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
    }
}
