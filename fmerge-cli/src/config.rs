//! Instance configuration
//!
//! A small JSON file under `.fmerge/` holding the persistent instance
//! UUID. Generated on first run, rewritten on every start so a hand-edited
//! file is normalized back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use fmerge_tree::STATE_DIR;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub uuid: String,
}

impl InstanceConfig {
    fn generate() -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
        }
    }

    /// Load the config, generating a fresh one if the file is missing.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::generate();
            debug!("Generated new instance id {}", config.uuid);
            return Ok(config);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }
}

/// Path of the config file inside a sync root.
pub fn config_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generate_and_reload() {
        let dir = tempdir().unwrap();
        let path = config_path(dir.path());

        let config = InstanceConfig::load_or_generate(&path).unwrap();
        config.save(&path).unwrap();

        let reloaded = InstanceConfig::load_or_generate(&path).unwrap();
        assert_eq!(reloaded.uuid, config.uuid);
    }

    #[test]
    fn test_corrupt_config_is_an_error() {
        let dir = tempdir().unwrap();
        let path = config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json").unwrap();

        assert!(InstanceConfig::load_or_generate(&path).is_err());
    }
}
