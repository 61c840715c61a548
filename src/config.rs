//! Generator configuration
//!
//! Loaded from `actionforge.yaml` next to the project, or from the path in
//! `ACTIONFORGE_CONFIG`. Every knob has a default so running without a
//! config file is fully supported.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CompileError;

/// Schemas whose tables carry a `tenant_id` column and are filtered by it.
pub const DEFAULT_TENANT_SCHEMAS: [&str; 4] = ["tenant", "crm", "management", "operations"];

fn default_tenant_schemas() -> Vec<String> {
    DEFAULT_TENANT_SCHEMAS.iter().map(|s| s.to_string()).collect()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("generated")
}

fn default_soft_delete() -> bool {
    true
}

/// Generator-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeConfig {
    /// Schemas that get tenant scoping and two-argument Trinity helpers.
    #[serde(default = "default_tenant_schemas")]
    pub tenant_schemas: Vec<String>,

    /// Whether delete impact entries carry full row data by default.
    /// Actions override per-block with `include_data`.
    #[serde(default)]
    pub include_impact_data: bool,

    /// Whether deletes are soft (stamp `deleted_at`) unless the entity
    /// opts into `hard_delete`.
    #[serde(default = "default_soft_delete")]
    pub soft_delete: bool,

    /// Where generated SQL files land; overridden by `--out`.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            tenant_schemas: default_tenant_schemas(),
            include_impact_data: false,
            soft_delete: true,
            output_dir: default_output_dir(),
        }
    }
}

impl ForgeConfig {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: ForgeConfig = serde_yaml::from_str(yaml)
            .map_err(|e| anyhow::anyhow!("Failed to parse actionforge config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            )
        })?;
        Self::from_yaml(&content)
    }

    /// Resolve configuration through the fallback chain:
    /// `ACTIONFORGE_CONFIG` env var, then `./actionforge.yaml`, then defaults.
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var("ACTIONFORGE_CONFIG") {
            let config = Self::from_yaml_file(&path)?;
            tracing::info!(path = %path, "loaded config from ACTIONFORGE_CONFIG");
            return Ok(config);
        }

        let project_file = Path::new("actionforge.yaml");
        if project_file.exists() {
            let config = Self::from_yaml_file(project_file)?;
            tracing::info!("loaded config from ./actionforge.yaml");
            return Ok(config);
        }

        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn validate(&self) -> Result<(), CompileError> {
        if self.tenant_schemas.is_empty() {
            return Err(CompileError::Config {
                message: "tenant_schemas must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Whether tables in `schema` carry tenant scoping.
    pub fn is_tenant_schema(&self, schema: &str) -> bool {
        self.tenant_schemas.iter().any(|s| s == schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ForgeConfig::default();
        assert_eq!(config.tenant_schemas.len(), 4);
        assert!(config.is_tenant_schema("tenant"));
        assert!(config.is_tenant_schema("crm"));
        assert!(!config.is_tenant_schema("app"));
        assert!(!config.include_impact_data);
        assert!(config.soft_delete);
        assert_eq!(config.output_dir, PathBuf::from("generated"));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ForgeConfig::from_yaml("include_impact_data: true\n").unwrap();
        assert!(config.include_impact_data);
        assert_eq!(config.tenant_schemas.len(), 4);
        assert!(config.soft_delete);
    }

    #[test]
    fn test_custom_tenant_schemas() {
        let config = ForgeConfig::from_yaml("tenant_schemas: [tenant, billing]\n").unwrap();
        assert!(config.is_tenant_schema("billing"));
        assert!(!config.is_tenant_schema("crm"));
    }

    #[test]
    fn test_empty_tenant_schemas_rejected() {
        let err = ForgeConfig::from_yaml("tenant_schemas: []\n").unwrap_err();
        assert!(err.to_string().contains("tenant_schemas"));
    }
}
