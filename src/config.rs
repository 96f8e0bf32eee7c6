//! Engine configuration loaded from a TOML file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MetakindError, MetakindResult};

/// Tunables for the validation and storage layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where the sled database lives.
    pub data_dir: PathBuf,
    /// Hard cap on indexed string fields.
    pub string_max_len: usize,
    /// Fetch limit used when checking a unique field; two rows are enough to
    /// distinguish "same entity" from "real duplicate".
    pub unique_query_limit: usize,
    /// Default page size for list queries.
    pub query_default_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            string_max_len: 1500,
            unique_query_limit: 2,
            query_default_limit: 100,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> MetakindResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| MetakindError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.string_max_len, 1500);
        assert_eq!(config.unique_query_limit, 2);
    }

    #[test]
    fn load_accepts_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "string_max_len = 64\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.string_max_len, 64);
        assert_eq!(config.unique_query_limit, 2);
    }
}
