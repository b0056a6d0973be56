//! Typed configuration for the migration engine.
//!
//! Mirrors the teacher's `Config` shape (nested sub-configs, `serde`-derived,
//! parsed once at startup) but drops the interactive `dialoguer`-based setup
//! wizard: this crate is a library plus a thin non-interactive CLI, so
//! configuration is always loaded from a file or string, never prompted for.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Top-level configuration, matching the dotted key namespace in the
/// specification's external-interfaces table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub paths: PathsConfig,
    pub runtime: RuntimeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { database: DatabaseConfig::default(), paths: PathsConfig::default(), runtime: RuntimeConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connection: ConnectionConfig,
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { connection: ConnectionConfig::default(), name: "myapp".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub uri: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self { uri: "mongodb://localhost:27017".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub migrations: String,
    pub schemas: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self { migrations: "./migrations".to_string(), schemas: "./schemas.ts".to_string() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaManagement {
    #[default]
    Auto,
    Managed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub schema_management: SchemaManagement,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { schema_management: SchemaManagement::Auto }
    }
}

impl EngineConfig {
    /// Parse configuration from a TOML document. Missing keys fall back to
    /// their documented defaults via `#[serde(default)]`.
    pub fn from_toml_str(input: &str) -> EngineResult<Self> {
        toml::from_str(input).map_err(|e| EngineError::ConfigParse { path: "<toml>".to_string(), source: Box::new(e) })
    }

    /// Parse configuration from a JSON document.
    pub fn from_json_str(input: &str) -> EngineResult<Self> {
        serde_json::from_str(input)
            .map_err(|e| EngineError::ConfigParse { path: "<json>".to_string(), source: Box::new(e) })
    }

    pub fn to_toml_string(&self) -> EngineResult<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::configuration(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.database.connection.uri, "mongodb://localhost:27017");
        assert_eq!(cfg.database.name, "myapp");
        assert_eq!(cfg.paths.migrations, "./migrations");
        assert_eq!(cfg.paths.schemas, "./schemas.ts");
        assert_eq!(cfg.runtime.schema_management, SchemaManagement::Auto);
    }

    #[test]
    fn partial_toml_fills_remaining_defaults() {
        let cfg = EngineConfig::from_toml_str("[database]\nname = \"prod\"\n").unwrap();
        assert_eq!(cfg.database.name, "prod");
        assert_eq!(cfg.database.connection.uri, "mongodb://localhost:27017");
        assert_eq!(cfg.paths.migrations, "./migrations");
    }

    #[test]
    fn managed_schema_mode_round_trips() {
        let cfg = EngineConfig::from_toml_str("[runtime]\nschema_management = \"managed\"\n").unwrap();
        assert_eq!(cfg.runtime.schema_management, SchemaManagement::Managed);
        let toml = cfg.to_toml_string().unwrap();
        assert!(toml.contains("managed"));
    }
}
