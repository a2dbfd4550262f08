//! Hub configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HubError, HubResult};
use crate::storage::RefName;

/// Hub configuration options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Directory holding the metadata store and the blob store.
    pub data_dir: PathBuf,
    /// Create the data directory if it doesn't exist.
    pub create_if_missing: bool,
    /// Branch created with every new database.
    pub default_branch: String,
    /// tracing filter used when RUST_LOG is unset
    pub log_filter: String,
    /// Longest allowed branch, tag or release name.
    pub max_name_length: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".sqlhub"),
            create_if_missing: true,
            default_branch: "main".to_string(),
            log_filter: "info".to_string(),
            max_name_length: RefName::MAX_LEN,
        }
    }
}

impl HubConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Read a TOML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> HubResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HubError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        let config: Self =
            toml::from_str(&text).map_err(|e| HubError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HubResult<()> {
        if self.max_name_length == 0 {
            return Err(HubError::InvalidConfig("max_name_length must be positive".to_string()));
        }
        RefName::with_max_len(self.default_branch.as_str(), self.max_name_length)
            .map_err(|e| HubError::InvalidConfig(format!("default_branch: {}", e)))?;
        Ok(())
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn default_branch(mut self, name: impl Into<String>) -> Self {
        self.default_branch = name.into();
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    pub fn max_name_length(mut self, value: usize) -> Self {
        self.max_name_length = value;
        self
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("metadata.sqlite")
    }

    pub fn blob_path(&self) -> PathBuf {
        self.data_dir.join("blobs.git")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_and_paths() {
        let config = HubConfig::new("/srv/hub").default_branch("trunk").max_name_length(40);
        assert_eq!(config.default_branch, "trunk");
        assert!(config.create_if_missing);
        assert_eq!(config.metadata_path(), PathBuf::from("/srv/hub/metadata.sqlite"));
        assert_eq!(config.blob_path(), PathBuf::from("/srv/hub/blobs.git"));
    }

    #[test]
    fn test_load_toml_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sqlhub.toml");
        std::fs::write(&path, "data_dir = \"/var/lib/sqlhub\"\nlog_filter = \"debug\"\n").unwrap();

        let config = HubConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/sqlhub"));
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.default_branch, "main");
        assert_eq!(config.max_name_length, 32);
    }

    #[test]
    fn test_invalid_default_branch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sqlhub.toml");
        std::fs::write(&path, "default_branch = \"a/b\"\n").unwrap();
        assert!(HubConfig::load(&path).is_err());
    }
}
