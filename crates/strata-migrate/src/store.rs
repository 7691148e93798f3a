//! Migration snapshot store.
//!
//! This module manages the `_migrations` table that records which snapshot
//! is current, and the JSON snapshot artifacts written next to it on disk.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strata_db::builder;
use strata_db::{
    column, DataType, Database, DefaultValue, Dialect, Engine, Filter, Record, SchemaSnapshot, Size, Statement,
    TableSchema, Value,
};
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};

/// Name of the migrations history table.
pub const MIGRATIONS_TABLE: &str = "_migrations";

/// A snapshot version, rendered `NNNN_YYYYMMDD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    /// Monotonic number.
    pub number: u32,
    /// Creation date.
    pub date: NaiveDate,
}

impl Version {
    /// Creates a version.
    #[must_use]
    pub fn new(number: u32, date: NaiveDate) -> Self {
        Self { number, date }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_{}", self.number, self.date.format("%Y%m%d"))
    }
}

impl FromStr for Version {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || MigrateError::InvalidState(format!("malformed snapshot version `{s}`"));
        let (number, date) = s.split_once('_').ok_or_else(invalid)?;
        Ok(Self {
            number: number.parse().map_err(|_| invalid())?,
            date: NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|_| invalid())?,
        })
    }
}

/// A row of the migrations table.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationRecord {
    /// Row id.
    pub id: i64,
    /// Snapshot version.
    pub version: String,
    /// Whether this is the current snapshot.
    pub current: bool,
    /// When the row was written, as reported by the database.
    pub date: String,
    /// Audit comment.
    pub comment: Option<String>,
}

impl MigrationRecord {
    fn from_row(mut row: strata_db::Row) -> Result<Self> {
        let mut text = |name: &str| match row.remove(name) {
            Some(Value::Text(s)) => Some(s),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        let version = text("version")
            .ok_or_else(|| MigrateError::InvalidState("migration row without a version".into()))?;
        let date = text("date").unwrap_or_default();
        let comment = text("comment");
        Ok(Self {
            id: row.get("id").and_then(Value::as_i64).unwrap_or_default(),
            version,
            current: row.get("current").and_then(Value::as_bool).unwrap_or(false),
            date,
            comment,
        })
    }
}

/// On-disk snapshot artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Snapshot version.
    pub version: String,
    /// Engine the schemas were resolved for.
    pub engine: Engine,
    /// Creation time.
    pub date: DateTime<Utc>,
    /// Audit comment.
    pub comment: String,
    /// Model name to table schema.
    pub models: BTreeMap<String, TableSchema>,
}

impl SnapshotFile {
    /// The recorded schema.
    #[must_use]
    pub fn schema(&self) -> SchemaSnapshot {
        SchemaSnapshot {
            engine: self.engine,
            models: self.models.clone(),
        }
    }
}

/// Persists snapshots in the database and on disk.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Creates a store writing artifacts into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Artifact directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Schema of the migrations table for `dialect`.
    pub fn migrations_schema(dialect: &dyn Dialect) -> Result<TableSchema> {
        let mut schema = TableSchema::new(MIGRATIONS_TABLE, "id", dialect.type_name(&DataType::Int, None, None)?);
        let mut add = |name: &str, spec: strata_db::ColumnSpec| -> Result<()> {
            schema.col_type.insert(
                name.to_string(),
                dialect.type_name(&spec.datatype, spec.size, spec.scale)?,
            );
            if spec.unique {
                schema.unique.insert(name.to_string());
            }
            if spec.not_null {
                schema.not_null.insert(name.to_string());
            }
            if let Some(default) = &spec.default {
                schema.default.insert(name.to_string(), dialect.render_default(default));
            }
            Ok(())
        };
        add("version", column(DataType::Str).size(Size::Xs).unique().not_null())?;
        add("current", column(DataType::Bool).not_null().default(false))?;
        add(
            "date",
            column(DataType::DateTime)
                .not_null()
                .default(DefaultValue::expr("CURRENT_TIMESTAMP")),
        )?;
        add("comment", column(DataType::Str).size(Size::Md))?;
        Ok(schema)
    }

    /// Returns true when the migrations table exists.
    pub async fn is_initialized(&self, db: &Database) -> Result<bool> {
        Ok(db.exist_table(MIGRATIONS_TABLE).await?)
    }

    /// Creates the migrations table if it does not exist.
    pub async fn ensure_table(&self, db: &Database) -> Result<bool> {
        if self.is_initialized(db).await? {
            return Ok(false);
        }
        let sql = db.dialect().create_table(&Self::migrations_schema(db.dialect())?, false);
        db.execute(&sql, Vec::new()).await?;
        info!(table = MIGRATIONS_TABLE, "created migrations table");
        Ok(true)
    }

    /// Drops the migrations table. Artifacts on disk are kept.
    pub async fn drop_table(&self, db: &Database) -> Result<()> {
        if self.is_initialized(db).await? {
            db.execute(&db.dialect().drop_table(MIGRATIONS_TABLE), Vec::new()).await?;
            info!(table = MIGRATIONS_TABLE, "dropped migrations table");
        }
        Ok(())
    }

    fn select_sql(dialect: &dyn Dialect) -> String {
        let q = |name: &str| dialect.quote_identifier(name);
        format!(
            "SELECT {}, {}, {}, {} AS {}, {} FROM {}",
            q("id"),
            q("version"),
            q("current"),
            dialect.text_cast(&q("date")),
            q("date"),
            q("comment"),
            q(MIGRATIONS_TABLE)
        )
    }

    /// Every recorded migration, oldest first.
    pub async fn history(&self, db: &Database) -> Result<Vec<MigrationRecord>> {
        if !self.is_initialized(db).await? {
            return Err(MigrateError::NotInitialized);
        }
        let sql = format!(
            "{} ORDER BY {}",
            Self::select_sql(db.dialect()),
            db.dialect().quote_identifier("id")
        );
        db.query(&sql, Vec::new())?
            .all()
            .await?
            .into_iter()
            .map(MigrationRecord::from_row)
            .collect()
    }

    /// The current migration row, if any.
    pub async fn current_record(&self, db: &Database) -> Result<Option<MigrationRecord>> {
        if !self.is_initialized(db).await? {
            return Err(MigrateError::NotInitialized);
        }
        let dialect = db.dialect();
        let sql = format!(
            "{} WHERE {} = {}",
            Self::select_sql(dialect),
            dialect.quote_identifier("current"),
            dialect.placeholder(1)
        );
        db.query(&sql, vec![Value::Bool(true)])?
            .first()
            .await?
            .map(MigrationRecord::from_row)
            .transpose()
    }

    /// The current migration row with its artifact.
    pub async fn current(&self, db: &Database) -> Result<Option<(MigrationRecord, SnapshotFile)>> {
        let Some(record) = self.current_record(db).await? else {
            return Ok(None);
        };
        let file = self.read_artifact(&record.version)?;
        Ok(Some((record, file)))
    }

    /// Path of the artifact for `version`.
    #[must_use]
    pub fn artifact_path(&self, version: &str) -> PathBuf {
        self.dir.join(format!("{version}.json"))
    }

    /// Loads an artifact.
    pub fn read_artifact(&self, version: &str) -> Result<SnapshotFile> {
        let path = self.artifact_path(version);
        let content = fs::read_to_string(&path).map_err(|e| {
            MigrateError::InvalidState(format!("cannot read snapshot `{}`: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_artifact(&self, file: &SnapshotFile) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.artifact_path(&file.version);
        fs::write(&path, serde_json::to_string_pretty(file)?)?;
        debug!(path = %path.display(), "wrote snapshot artifact");
        Ok(path)
    }

    /// Version numbers of the artifacts on disk.
    pub fn artifact_numbers(&self) -> Result<Vec<u32>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut numbers = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(version) = stem.parse::<Version>() {
                numbers.push(version.number);
            }
        }
        numbers.sort_unstable();
        Ok(numbers)
    }

    /// The next version: one past the largest number in the table or on disk.
    pub async fn next_version(&self, db: &Database) -> Result<Version> {
        let mut last = self.artifact_numbers()?.into_iter().max().unwrap_or(0);
        if self.is_initialized(db).await? {
            for record in self.history(db).await? {
                if let Ok(version) = record.version.parse::<Version>() {
                    last = last.max(version.number);
                }
            }
        }
        Ok(Version::new(last + 1, Utc::now().date_naive()))
    }

    async fn record(db: &Database, demote: &Statement, insert: &Statement) -> Result<()> {
        let mut tx = db.begin().await?;
        let result = async {
            tx.execute(demote).await?;
            tx.execute(insert).await
        }
        .await;
        match result {
            Ok(_) => Ok(tx.commit().await?),
            Err(err) => {
                tx.rollback().await?;
                Err(err.into())
            }
        }
    }

    /// Writes `snapshot` as the new current version.
    ///
    /// The artifact is removed again if the history row cannot be recorded.
    pub async fn save(&self, db: &Database, snapshot: &SchemaSnapshot, comment: &str) -> Result<Version> {
        let version = self.next_version(db).await?;
        let comment = if comment.trim().is_empty() { "Untitled" } else { comment };
        let file = SnapshotFile {
            version: version.to_string(),
            engine: snapshot.engine,
            date: Utc::now(),
            comment: comment.to_string(),
            models: snapshot.models.clone(),
        };
        let dialect = db.dialect();
        let demote = builder::update(
            dialect,
            MIGRATIONS_TABLE,
            &Record::new().set("current", false),
            &Filter::equal("current", true)?,
        )?;
        let insert: Statement = builder::insert(
            dialect,
            MIGRATIONS_TABLE,
            &Record::new()
                .set("version", file.version.as_str())
                .set("current", true)
                .set("comment", comment),
            None,
        )?;

        let path = self.write_artifact(&file)?;
        if let Err(err) = Self::record(db, &demote, &insert).await {
            if let Err(remove) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %remove, "cannot remove orphan snapshot artifact");
            }
            return Err(err);
        }
        info!(version = %version, comment, "saved snapshot");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db::{Config, MySqlDialect, PostgresDialect, SqliteDialect};

    #[test]
    fn test_version_format() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let version = Version::new(7, date);
        assert_eq!(version.to_string(), "0007_20240309");
        assert_eq!("0007_20240309".parse::<Version>().unwrap(), version);
        assert!("7".parse::<Version>().is_err());
        assert!("x_20240309".parse::<Version>().is_err());
    }

    #[test]
    fn test_migrations_table_per_engine() {
        let sqlite = SqliteDialect::new();
        assert_eq!(
            sqlite.create_table(&SnapshotStore::migrations_schema(&sqlite).unwrap(), false),
            "CREATE TABLE \"_migrations\" (\n  \
             \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n  \
             \"comment\" TEXT,\n  \
             \"current\" INTEGER NOT NULL DEFAULT 0,\n  \
             \"date\" TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,\n  \
             \"version\" TEXT NOT NULL UNIQUE\n)"
        );
        let mysql = MySqlDialect::new();
        let sql = mysql.create_table(&SnapshotStore::migrations_schema(&mysql).unwrap(), false);
        assert!(sql.contains("`version` VARCHAR(255) NOT NULL UNIQUE"), "{sql}");
        assert!(sql.contains("`date` DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP"), "{sql}");
        let postgres = PostgresDialect::new();
        let sql = postgres.create_table(&SnapshotStore::migrations_schema(&postgres).unwrap(), false);
        assert!(sql.contains("\"current\" BOOLEAN NOT NULL DEFAULT FALSE"), "{sql}");
    }

    #[tokio::test]
    async fn test_save_flips_current_flag() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(Config::sqlite_memory()).await.unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(matches!(store.history(&db).await, Err(MigrateError::NotInitialized)));
        assert!(store.ensure_table(&db).await.unwrap());
        assert!(!store.ensure_table(&db).await.unwrap());

        let snapshot = SchemaSnapshot::new(Engine::Sqlite);
        let first = store.save(&db, &snapshot, "first").await.unwrap();
        let second = store.save(&db, &snapshot, "").await.unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);

        let history = store.history(&db).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].current);
        assert!(history[1].current);
        assert_eq!(history[1].comment.as_deref(), Some("Untitled"));
        assert!(!history[1].date.is_empty());

        let (record, file) = store.current(&db).await.unwrap().unwrap();
        assert_eq!(record.version, second.to_string());
        assert_eq!(file.comment, "Untitled");
        assert_eq!(file.schema(), snapshot);
    }

    #[tokio::test]
    async fn test_versions_are_never_reused() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(Config::sqlite_memory()).await.unwrap();
        let store = SnapshotStore::new(dir.path());
        store.ensure_table(&db).await.unwrap();
        let snapshot = SchemaSnapshot::new(Engine::Sqlite);
        store.save(&db, &snapshot, "a").await.unwrap();
        store.save(&db, &snapshot, "b").await.unwrap();

        store.drop_table(&db).await.unwrap();
        store.ensure_table(&db).await.unwrap();
        assert_eq!(store.artifact_numbers().unwrap(), vec![1, 2]);
        assert_eq!(store.save(&db, &snapshot, "c").await.unwrap().number, 3);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::connect(Config::sqlite_memory()).await.unwrap();
        let store = SnapshotStore::new(dir.path());
        store.ensure_table(&db).await.unwrap();
        db.execute(
            &format!("CREATE TRIGGER refuse BEFORE INSERT ON \"{MIGRATIONS_TABLE}\" BEGIN SELECT RAISE(ABORT, 'refused'); END"),
            Vec::new(),
        )
        .await
        .unwrap();

        let snapshot = SchemaSnapshot::new(Engine::Sqlite);
        assert!(store.save(&db, &snapshot, "a").await.is_err());
        assert!(store.artifact_numbers().unwrap().is_empty());
        assert!(store.history(&db).await.unwrap().is_empty());
    }
}
