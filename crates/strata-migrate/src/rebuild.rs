//! Table rebuilds.
//!
//! Changes the engine cannot apply in place (SQLite column changes,
//! primary key changes everywhere, column renames without `RENAME COLUMN`)
//! move the live table aside under a temporary name, recreate it with the
//! target shape, copy the shared columns back and drop the temporary table.
//!
//! On SQLite the whole sequence runs inside one transaction with foreign key
//! enforcement off and ends with `PRAGMA foreign_key_check`; a failure rolls
//! everything back and is returned to the caller.

use std::collections::BTreeMap;

use strata_db::{temp_table_name, Database, DbError, Dialect, Engine, TableSchema, TEMP_SUFFIX};
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};

/// A planned rebuild of one table.
#[derive(Debug, Clone)]
pub struct Rebuild<'a> {
    previous: &'a TableSchema,
    target: &'a TableSchema,
    renames: BTreeMap<String, String>,
}

impl<'a> Rebuild<'a> {
    /// Rebuilds `previous` into `target`, copying columns present in both.
    #[must_use]
    pub fn new(previous: &'a TableSchema, target: &'a TableSchema) -> Self {
        Self {
            previous,
            target,
            renames: BTreeMap::new(),
        }
    }

    /// Copies the data of `old` into the target column `new`.
    #[must_use]
    pub fn rename(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.renames.insert(old.into(), new.into());
        self
    }

    /// Source column feeding target column `column`, if the data survives.
    fn source_of<'s>(&'s self, column: &'s str) -> Option<&'s str> {
        let source = self
            .renames
            .iter()
            .find(|(_, new)| new.as_str() == column)
            .map_or(column, |(old, _)| old.as_str());
        if self.renames.contains_key(column) && source == column {
            return None;
        }
        self.previous.has_column(source).then_some(source)
    }

    /// `INSERT ... SELECT` moving rows from the temporary table.
    fn copy_statement(&self, dialect: &dyn Dialect, temp: &str, identity: bool) -> Option<String> {
        let pairs: Vec<(&str, &str)> = self
            .target
            .columns()
            .into_iter()
            .filter_map(|column| {
                if identity {
                    Some((column, column))
                } else {
                    self.source_of(column).map(|source| (column, source))
                }
            })
            .collect();
        if pairs.is_empty() {
            return None;
        }
        let targets: Vec<String> = pairs.iter().map(|(t, _)| dialect.quote_identifier(t)).collect();
        let sources: Vec<String> = pairs.iter().map(|(_, s)| dialect.quote_identifier(s)).collect();
        Some(format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            dialect.quote_identifier(&self.target.table),
            targets.join(", "),
            sources.join(", "),
            dialect.quote_identifier(temp)
        ))
    }

    /// Statements for the SQLite rebuild: one pass without foreign keys,
    /// and a second pass adding them when the target declares any.
    #[must_use]
    pub fn sqlite_statements(&self, dialect: &dyn Dialect) -> Vec<String> {
        let temp = temp_table_name(&self.target.table);
        let mut statements = vec![
            dialect.rename_table(&self.previous.table, &temp),
            dialect.create_table(self.target, false),
        ];
        statements.extend(self.copy_statement(dialect, &temp, false));
        statements.push(dialect.drop_table(&temp));

        if !self.target.foreign_key.is_empty() {
            statements.push(dialect.rename_table(&self.target.table, &temp));
            statements.push(dialect.create_table(self.target, true));
            statements.extend(self.copy_statement(dialect, &temp, true));
            statements.push(dialect.drop_table(&temp));
        }
        statements
    }

    /// Statements for engines with constraint support. `constraint_drops`
    /// removes the live table's foreign keys and checks first, since their
    /// names would otherwise collide with the rebuilt table's.
    pub fn alter_statements(&self, dialect: &dyn Dialect, constraint_drops: Vec<String>) -> Result<Vec<String>> {
        let temp = temp_table_name(&self.target.table);
        let mut statements = constraint_drops;
        statements.push(dialect.rename_table(&self.previous.table, &temp));
        statements.push(dialect.create_table(self.target, false));
        statements.extend(self.copy_statement(dialect, &temp, false));
        statements.push(dialect.drop_table(&temp));
        for (column, fk) in &self.target.foreign_key {
            statements.push(dialect.add_foreign_key(&self.target.table, column, fk)?);
        }
        let key_type = self.target.col_type.get(&self.target.primary_key).map_or("", String::as_str);
        if dialect.is_integer_type(key_type) {
            statements.extend(dialect.reset_sequence(&self.target.table, &self.target.primary_key));
        }
        Ok(statements)
    }

    /// Drops for the live table's foreign keys and checks, found by introspection.
    async fn constraint_drops(&self, db: &Database) -> Result<Vec<String>> {
        let dialect = db.dialect();
        let table = &self.previous.table;
        let mut drops = Vec::new();
        for column in self.previous.foreign_key.keys() {
            for name in db.foreign_key_names(table, column).await? {
                drops.push(dialect.drop_foreign_key(table, &name)?);
            }
        }
        if !self.previous.check.is_empty() {
            for name in db.check_constraint_names(table).await? {
                drops.push(dialect.drop_check(table, &name)?);
            }
        }
        Ok(drops)
    }

    /// Runs the rebuild, returning the executed statements.
    pub async fn run(&self, db: &Database) -> Result<Vec<String>> {
        info!(table = %self.target.table, "rebuilding table");
        let statements = match db.engine() {
            Engine::Sqlite => {
                let statements = self.sqlite_statements(db.dialect());
                run_sqlite(db, &statements).await?;
                statements
            }
            Engine::MySql | Engine::Postgres => {
                let drops = self.constraint_drops(db).await?;
                let statements = self.alter_statements(db.dialect(), drops)?;
                run_in_transaction(db, &statements, false).await?;
                statements
            }
        };
        debug!(table = %self.target.table, statements = statements.len(), "rebuilt table");
        Ok(statements)
    }
}

async fn run_in_transaction(db: &Database, statements: &[String], foreign_key_check: bool) -> Result<()> {
    let mut tx = db.begin().await?;
    let result = async {
        for sql in statements {
            tx.execute_sql(sql).await?;
        }
        if foreign_key_check {
            let violations = tx.fetch_all(&strata_db::Statement::new("PRAGMA foreign_key_check")).await?;
            if !violations.is_empty() {
                return Err(DbError::Integrity(format!(
                    "{} row(s) violate foreign keys after the rebuild",
                    violations.len()
                )));
            }
        }
        Ok(())
    }
    .await;
    match result {
        Ok(()) => Ok(tx.commit().await?),
        Err(err) => {
            warn!(error = %err, "rebuild failed, rolling back");
            tx.rollback().await?;
            Err(err.into())
        }
    }
}

/// Runs SQLite rebuild statements with foreign keys off and legacy rename
/// semantics on, so references from other tables keep pointing at the
/// original name. The pragmas are restored whatever the outcome.
async fn run_sqlite(db: &Database, statements: &[String]) -> Result<()> {
    db.execute("PRAGMA foreign_keys = OFF", Vec::new()).await?;
    db.execute("PRAGMA legacy_alter_table = ON", Vec::new()).await?;
    let outcome = run_in_transaction(db, statements, true).await;
    let restored = restore_pragmas(db).await;
    outcome?;
    restored
}

async fn restore_pragmas(db: &Database) -> Result<()> {
    db.execute("PRAGMA legacy_alter_table = OFF", Vec::new()).await?;
    db.execute("PRAGMA foreign_keys = ON", Vec::new()).await?;
    Ok(())
}

/// Cleans up temporary tables left by an interrupted rebuild: dropped when
/// the original table exists, renamed back when it does not. Returns the
/// original names of the healed tables.
pub async fn heal(db: &Database) -> Result<Vec<String>> {
    let tables = db.list_tables().await?;
    let mut healed = Vec::new();
    let mut errors = Vec::new();
    for temp in &tables {
        let Some(original) = temp.strip_suffix(TEMP_SUFFIX) else {
            continue;
        };
        let sql = if tables.iter().any(|t| t == original) {
            db.dialect().drop_table(temp)
        } else {
            db.dialect().rename_table(temp, original)
        };
        warn!(table = %original, sql = %sql, "healing leftover temporary table");
        match db.execute(&sql, Vec::new()).await {
            Ok(_) => healed.push(original.to_string()),
            Err(err) => errors.push(MigrateError::from(err)),
        }
    }
    match MigrateError::from_many(errors) {
        Some(err) => Err(err),
        None => Ok(healed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db::{column, DataType, ModelDecl, MySqlDialect, PostgresDialect, Registry, SqliteDialect};

    fn schemas(dialect: &dyn Dialect) -> (TableSchema, TableSchema) {
        let author = ModelDecl::new("Author").column("name", column(DataType::Str));
        let previous = Registry::new()
            .with(author.clone())
            .with(
                ModelDecl::new("Post")
                    .column("title", column(DataType::Str))
                    .column("legacy", column(DataType::Int)),
            )
            .extract(dialect, true)
            .unwrap();
        let target = Registry::new()
            .with(author)
            .with(
                ModelDecl::new("Post")
                    .column("title", column(DataType::Str).not_null().default("t"))
                    .column("author_id", column(DataType::Int).related_to("Author")),
            )
            .extract(dialect, true)
            .unwrap();
        (
            previous.model("Post").unwrap().clone(),
            target.model("Post").unwrap().clone(),
        )
    }

    #[test]
    fn test_sqlite_two_pass_rebuild() {
        let dialect = SqliteDialect::new();
        let (previous, target) = schemas(&dialect);
        let statements = Rebuild::new(&previous, &target).sqlite_statements(&dialect);
        assert_eq!(statements.len(), 8);
        assert_eq!(statements[0], "ALTER TABLE \"post\" RENAME TO \"post__temp\"");
        assert!(!statements[1].contains("FOREIGN KEY"));
        assert_eq!(
            statements[2],
            "INSERT INTO \"post\" (\"id\", \"title\") SELECT \"id\", \"title\" FROM \"post__temp\""
        );
        assert_eq!(statements[3], "DROP TABLE \"post__temp\"");
        assert!(statements[5].contains("FOREIGN KEY (\"author_id\") REFERENCES \"author\" (\"id\")"));
        assert_eq!(
            statements[6],
            "INSERT INTO \"post\" (\"id\", \"author_id\", \"title\") \
             SELECT \"id\", \"author_id\", \"title\" FROM \"post__temp\""
        );
    }

    #[test]
    fn test_single_pass_without_foreign_keys() {
        let dialect = SqliteDialect::new();
        let (target, previous) = schemas(&dialect);
        let statements = Rebuild::new(&previous, &target).sqlite_statements(&dialect);
        assert_eq!(statements.len(), 4);
        assert_eq!(
            statements[2],
            "INSERT INTO \"post\" (\"id\", \"title\") SELECT \"id\", \"title\" FROM \"post__temp\""
        );
    }

    #[test]
    fn test_rename_maps_source_column() {
        let dialect = SqliteDialect::new();
        let (previous, _) = schemas(&dialect);
        let target = previous.with_column_renamed("legacy", "score");
        let statements = Rebuild::new(&previous, &target)
            .rename("legacy", "score")
            .sqlite_statements(&dialect);
        assert_eq!(
            statements[2],
            "INSERT INTO \"post\" (\"id\", \"score\", \"title\") \
             SELECT \"id\", \"legacy\", \"title\" FROM \"post__temp\""
        );
    }

    #[test]
    fn test_alter_rebuild_adds_foreign_keys_after_copy() {
        let dialect = MySqlDialect::new();
        let (previous, target) = schemas(&dialect);
        let drops = vec!["ALTER TABLE `post` DROP CHECK `ck_post_x`".to_string()];
        let statements = Rebuild::new(&previous, &target)
            .alter_statements(&dialect, drops)
            .unwrap();
        assert_eq!(statements[0], "ALTER TABLE `post` DROP CHECK `ck_post_x`");
        assert_eq!(statements[1], "RENAME TABLE `post` TO `post__temp`");
        assert!(statements.last().unwrap().starts_with("ALTER TABLE `post` ADD CONSTRAINT `fk_post_author_id`"));
    }

    #[test]
    fn test_postgres_rebuild_resets_sequence() {
        let dialect = PostgresDialect::new();
        let (previous, target) = schemas(&dialect);
        let statements = Rebuild::new(&previous, &target)
            .alter_statements(&dialect, Vec::new())
            .unwrap();
        assert!(statements.last().unwrap().contains("setval"), "{statements:?}");
    }
}
