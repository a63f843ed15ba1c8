//! `pgcdc.toml` project configuration, with `${VAR}` environment
//! interpolation for secrets (connection strings, API keys) that shouldn't
//! be committed in plain text.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use pgcdc_pg::SessionConfig;

#[derive(Debug, Deserialize)]
pub struct ProjectConfig {
    pub postgres: PostgresConfig,
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub cursor_store: CursorStoreConfig,
}

#[derive(Debug, Deserialize)]
pub struct PostgresConfig {
    pub connection_string: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ReplicationConfig {
    pub slot_name: String,
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub identity_full_tables: Vec<String>,
    #[serde(default)]
    pub require_column_diff: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CursorStoreConfig {
    File { path: String },
    Http { base_url: String },
}

impl Default for CursorStoreConfig {
    fn default() -> Self {
        CursorStoreConfig::File {
            path: "pgcdc-cursors".to_string(),
        }
    }
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: ProjectConfig =
            toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Resolve `${VAR_NAME}` references against the process environment.
    pub fn resolve_env(&self, s: &str) -> String {
        let mut result = s.to_string();

        while let Some(start) = result.find("${") {
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let value = std::env::var(var_name).unwrap_or_default();
                result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
            } else {
                break;
            }
        }

        result
    }

    pub fn postgres_connection_string(&self) -> String {
        self.resolve_env(&self.postgres.connection_string)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            slot_name: self.replication.slot_name.clone(),
            connection_string: self.postgres_connection_string(),
            tables: self.replication.tables.clone(),
            identity_full_tables: self.replication.identity_full_tables.clone(),
            require_column_diff: self.replication.require_column_diff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_env_vars() {
        std::env::set_var("PGCDC_TEST_VAR", "hello");

        let config = ProjectConfig {
            postgres: PostgresConfig {
                connection_string: "postgres://${PGCDC_TEST_VAR}".to_string(),
            },
            replication: ReplicationConfig {
                slot_name: "my_slot".to_string(),
                tables: vec![],
                identity_full_tables: vec![],
                require_column_diff: false,
            },
            cursor_store: CursorStoreConfig::default(),
        };

        assert_eq!(config.postgres_connection_string(), "postgres://hello");
    }

    #[test]
    fn loads_minimal_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgcdc.toml");
        std::fs::write(
            &path,
            r#"
            [postgres]
            connection_string = "postgres://localhost/test"

            [replication]
            slot_name = "my_slot"
            "#,
        )
        .unwrap();

        let config = ProjectConfig::load(&path).unwrap();
        assert_eq!(config.replication.slot_name, "my_slot");
        assert!(config.replication.tables.is_empty());
        assert!(matches!(config.cursor_store, CursorStoreConfig::File { .. }));
    }
}
