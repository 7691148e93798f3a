//! Engine selection and connection configuration.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::dialect::{Dialect, MySqlDialect, PostgresDialect, SqliteDialect};
use crate::error::{DbError, Result};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Engine {
    /// SQLite.
    #[serde(rename = "sqlite")]
    Sqlite,
    /// MySQL / MariaDB.
    #[serde(rename = "mysql")]
    MySql,
    /// PostgreSQL.
    #[serde(rename = "postgres")]
    Postgres,
}

impl Engine {
    /// Returns the engine identifier.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    /// Returns the dialect strategy for this engine.
    #[must_use]
    pub fn dialect(self) -> Box<dyn Dialect> {
        match self {
            Self::Sqlite => Box::new(SqliteDialect::new()),
            Self::MySql => Box::new(MySqlDialect::new()),
            Self::Postgres => Box::new(PostgresDialect::new()),
        }
    }

    /// Infers the engine from a connection URL scheme.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?;
        match scheme {
            "sqlite" => Some(Self::Sqlite),
            "mysql" | "mariadb" => Some(Self::MySql),
            "postgres" | "postgresql" => Some(Self::Postgres),
            _ => None,
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" => Ok(Self::MySql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err(DbError::invalid("engine", s, "expected sqlite, mysql or postgres")),
        }
    }
}

fn default_safe_typing() -> bool {
    true
}

/// Connection and behaviour settings, passed explicitly to [`Database`](crate::Database).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Target engine.
    pub engine: Engine,
    /// sqlx connection URL, e.g. `sqlite://app.db?mode=rwc`.
    pub database_url: String,
    /// Restrict column types to the semantic set and type-check defaults.
    #[serde(default = "default_safe_typing")]
    pub safe_typing: bool,
    /// Developer mode; consulted by front ends when reporting errors.
    #[serde(default)]
    pub debug: bool,
}

impl Config {
    /// Creates a configuration with safe typing enabled.
    #[must_use]
    pub fn new(engine: Engine, database_url: impl Into<String>) -> Self {
        Self {
            engine,
            database_url: database_url.into(),
            safe_typing: true,
            debug: false,
        }
    }

    /// Configuration for a private in-memory SQLite database.
    #[must_use]
    pub fn sqlite_memory() -> Self {
        Self::new(Engine::Sqlite, "sqlite::memory:")
    }

    /// Builds a configuration from a URL, inferring the engine from its scheme.
    pub fn from_url(database_url: impl Into<String>) -> Result<Self> {
        let url = database_url.into();
        let engine = Engine::from_url(&url)
            .ok_or_else(|| DbError::invalid("database_url", &url, "unknown URL scheme"))?;
        Ok(Self::new(engine, url))
    }

    /// Loads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        if config.database_url.is_empty() {
            return Err(DbError::MissingParameter("database_url"));
        }
        Ok(config)
    }

    /// Enables or disables safe typing.
    #[must_use]
    pub fn with_safe_typing(mut self, enabled: bool) -> Self {
        self.safe_typing = enabled;
        self
    }

    /// Enables or disables developer mode.
    #[must_use]
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_from_url() {
        assert_eq!(Engine::from_url("sqlite::memory:"), Some(Engine::Sqlite));
        assert_eq!(Engine::from_url("postgresql://u@h/db"), Some(Engine::Postgres));
        assert_eq!(Engine::from_url("mysql://u@h/db"), Some(Engine::MySql));
        assert_eq!(Engine::from_url("redis://h"), None);
    }

    #[test]
    fn test_engine_parse() {
        assert_eq!("MySQL".parse::<Engine>().unwrap(), Engine::MySql);
        assert!("oracle".parse::<Engine>().is_err());
    }

    #[test]
    fn test_config_from_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.json");
        std::fs::write(&path, r#"{"engine":"postgres","database_url":"postgres://localhost/app"}"#)
            .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.engine, Engine::Postgres);
        assert!(config.safe_typing);
        assert!(!config.debug);
    }

    #[test]
    fn test_config_from_file_requires_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.json");
        std::fs::write(&path, r#"{"engine":"sqlite","database_url":""}"#).unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(DbError::MissingParameter("database_url"))
        ));
    }
}
