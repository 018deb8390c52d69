//! Engine configuration
//!
//! The configuration is a JSON document; every key is optional:
//!
//! ```json
//! {
//!   "system_id": "local.ehrbase.org",
//!   "cleanup_unused_columns": true,
//!   "templates": { "vital_signs.v1": "5f1a0c2e-8a6b-4f0e-9c1d-2b3a4c5d6e7f" }
//! }
//! ```

use anyhow::Context;
use indexmap::IndexMap;
use openehr_aql_diagnostics::{ASL0300, ASL0301, AqlError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// System identifier used when neither the configuration nor the caller provides one
pub const DEFAULT_SYSTEM_ID: &str = "local.ehrbase.org";

/// Settings of an [`AqlEngine`](crate::AqlEngine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Local system identifier, used unless a `SystemIdentity` is injected
    pub system_id: String,
    /// Run the built-in column cleanup after every compilation
    pub cleanup_unused_columns: bool,
    /// Template id to internal id, used unless a `MetadataResolver` is injected
    pub templates: IndexMap<String, Uuid>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system_id: DEFAULT_SYSTEM_ID.to_string(),
            cleanup_unused_columns: true,
            templates: IndexMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| AqlError::configuration(ASL0300, format!("Invalid engine configuration: {e}")))
    }

    /// Read and parse a JSON configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = read_file(path).map_err(|e| AqlError::configuration(ASL0301, format!("{e:#}")))?;
        Self::from_json_str(&json).map_err(|e| e.with_context(path.display().to_string()))
    }

    pub fn with_system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = system_id.into();
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>, uuid: Uuid) -> Self {
        self.templates.insert(template_id.into(), uuid);
        self
    }

    pub fn with_cleanup(mut self, enabled: bool) -> Self {
        self.cleanup_unused_columns = enabled;
        self
    }
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read configuration file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openehr_aql_diagnostics::ErrorCategory;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.system_id, DEFAULT_SYSTEM_ID);
        assert!(config.cleanup_unused_columns);
        assert!(config.templates.is_empty());
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "system_id": "node-a" }"#).unwrap();
        assert_eq!(config, EngineConfig::default().with_system_id("node-a"));
        assert_eq!(EngineConfig::from_json_str("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_templates_keep_file_order() {
        let config = EngineConfig::from_json_str(
            r#"{
                "cleanup_unused_columns": false,
                "templates": {
                    "vital_signs.v1": "5f1a0c2e-8a6b-4f0e-9c1d-2b3a4c5d6e7f",
                    "discharge.v2": "00000000-0000-0000-0000-000000000001"
                }
            }"#,
        )
        .unwrap();
        assert!(!config.cleanup_unused_columns);
        assert_eq!(config.templates.keys().collect::<Vec<_>>(), vec!["vital_signs.v1", "discharge.v2"]);
        assert_eq!(config.templates["discharge.v2"], Uuid::from_u128(1));
    }

    #[test]
    fn test_invalid_json() {
        let err = EngineConfig::from_json_str(r#"{ "templates": { "t": "not-a-uuid" } }"#).unwrap_err();
        assert_eq!(err.code(), ASL0300);
        assert_eq!(err.category(), Some(ErrorCategory::Configuration));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "system_id": "node-b", "cleanup_unused_columns": false }}"#).unwrap();

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.system_id, "node-b");
        assert!(!config.cleanup_unused_columns);
    }

    #[test]
    fn test_unparsable_file_names_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "system_id = 'toml'").unwrap();

        let err = EngineConfig::from_json_file(file.path()).unwrap_err();
        assert_eq!(err.code(), ASL0300);
        assert_eq!(err.context(), Some(file.path().display().to_string().as_str()));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = EngineConfig::from_json_file(dir.path().join("engine.json")).unwrap_err();
        assert_eq!(err.code(), ASL0301);
        assert!(err.to_string().contains("engine.json"));
    }

    #[test]
    fn test_serializes_back() {
        let config = EngineConfig::default().with_template("t", Uuid::from_u128(7)).with_cleanup(false);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(EngineConfig::from_json_str(&json).unwrap(), config);
    }
}
