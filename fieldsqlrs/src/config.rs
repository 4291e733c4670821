//! Configuration system for fieldsql.
//!
//! TOML-based: which dialect to emit and where the catalog lives.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dialect::DialectKind;
use crate::error::{FieldsqlError, Result};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FieldsqlConfig {
    pub compiler: CompilerConfig,
    pub catalog: CatalogConfig,
}

/// SQL generation settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Target dialect (default: postgres).
    pub dialect: DialectKind,
}

/// Catalog location and overrides.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory holding `context.yml`, `tables/` and `fields/`.
    pub dir: Option<PathBuf>,
    /// Replaces the namespace declared in `context.yml`.
    pub schema: Option<String>,
}

impl FieldsqlConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| FieldsqlError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| FieldsqlError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from default locations (env var, cwd, user config dir, or defaults).
    ///
    /// Search order:
    /// 1. `FIELDSQL_CONFIG` environment variable
    /// 2. `./fieldsql.toml` (current directory)
    /// 3. `~/.config/fieldsql/config.toml` (user config dir)
    /// 4. Built-in defaults
    pub fn load_default() -> Self {
        if let Ok(path) = std::env::var("FIELDSQL_CONFIG") {
            match Self::from_file(&path) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "loaded config from FIELDSQL_CONFIG");
                    return cfg;
                }
                Err(err) => tracing::warn!(path = %path, error = %err, "ignoring FIELDSQL_CONFIG"),
            }
        }

        if let Ok(cfg) = Self::from_file("fieldsql.toml") {
            tracing::info!("loaded config from ./fieldsql.toml");
            return cfg;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("fieldsql").join("config.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }

        tracing::debug!("no config file found, using defaults");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = FieldsqlConfig::default();
        assert_eq!(cfg.compiler.dialect, DialectKind::Postgres);
        assert!(cfg.catalog.dir.is_none());
        assert!(cfg.catalog.schema.is_none());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[compiler]
dialect = "mssql"

[catalog]
dir = "catalog/omop"
schema = "cdm"
"#;
        let cfg = FieldsqlConfig::from_toml(toml).unwrap();
        assert_eq!(cfg.compiler.dialect, DialectKind::MsSql);
        assert_eq!(cfg.catalog.dir.as_deref(), Some(Path::new("catalog/omop")));
        assert_eq!(cfg.catalog.schema.as_deref(), Some("cdm"));
    }

    #[test]
    fn test_dialect_alias_and_partial_sections() {
        let cfg = FieldsqlConfig::from_toml("[compiler]\ndialect = \"msss\"\n").unwrap();
        assert_eq!(cfg.compiler.dialect, DialectKind::MsSql);
        assert!(cfg.catalog.dir.is_none());
    }

    #[test]
    fn test_rejects_unknown_dialect() {
        let err = FieldsqlConfig::from_toml("[compiler]\ndialect = \"oracle\"\n").unwrap_err();
        assert!(matches!(err, FieldsqlError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldsql.toml");
        std::fs::write(&path, "[compiler]\ndialect = \"postgres\"\n").unwrap();
        let cfg = FieldsqlConfig::from_file(&path).unwrap();
        assert_eq!(cfg.compiler.dialect, DialectKind::Postgres);
        assert!(FieldsqlConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
