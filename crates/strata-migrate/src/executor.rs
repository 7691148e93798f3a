//! Migration executor.
//!
//! Checks a [`Plan`] against live data and applies it. MySQL and
//! PostgreSQL alter tables in place; SQLite only adds plain columns in
//! place and rebuilds the table for anything else. Primary key changes
//! rebuild on every engine.

use strata_db::{Database, DbError, Engine, SchemaSnapshot, TableSchema};
use tracing::{debug, info};

use crate::error::{MigrateError, Result};
use crate::plan::{Change, Plan};
use crate::rebuild::Rebuild;

fn schema<'s>(snapshot: &'s SchemaSnapshot, model: &str) -> Result<&'s TableSchema> {
    snapshot
        .model(model)
        .ok_or_else(|| MigrateError::InvalidState(format!("model `{model}` is missing from the snapshot")))
}

/// Returns true if a rendered default is a constant SQLite accepts in
/// `ALTER TABLE ... ADD COLUMN`.
fn is_literal_default(sql: &str) -> bool {
    let sql = sql.trim();
    (sql.len() >= 2 && sql.starts_with('\'') && sql.ends_with('\''))
        || sql.parse::<f64>().is_ok()
        || matches!(sql.to_ascii_uppercase().as_str(), "NULL" | "TRUE" | "FALSE")
}

/// Returns true if SQLite can add `column` without rebuilding the table.
fn sqlite_can_add(target: &TableSchema, column: &str) -> bool {
    !target.foreign_key.contains_key(column)
        && !target.unique.contains(column)
        && !target.check.contains_key(column)
        && target
            .default
            .get(column)
            .map_or(!target.not_null.contains(column), |d| is_literal_default(d))
}

/// Applies plans to a database, recording every executed statement.
pub struct Executor<'a> {
    db: &'a Database,
    executed: Vec<String>,
}

impl<'a> Executor<'a> {
    /// Creates an executor.
    #[must_use]
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            executed: Vec::new(),
        }
    }

    /// Statements executed so far.
    #[must_use]
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Consumes the executor, returning the executed statements.
    #[must_use]
    pub fn into_statements(self) -> Vec<String> {
        self.executed
    }

    async fn run(&mut self, sql: String) -> Result<()> {
        debug!(sql = %sql, "executing migration statement");
        self.db.execute(&sql, Vec::new()).await?;
        self.executed.push(sql);
        Ok(())
    }

    async fn is_populated(&self, table: &str) -> Result<bool> {
        Ok(self.db.count_rows(table).await? > 0)
    }

    /// Checks the plan against live data before anything is executed.
    ///
    /// On a table holding rows, rejects NOT NULL columns without a default
    /// that would be added, dropped or imposed, and a new non-integer
    /// primary key. Primary key rebuilds of referenced tables are rejected
    /// on engines that enforce foreign keys across `ALTER TABLE`.
    pub async fn validate(&self, plan: &Plan, recorded: &SchemaSnapshot, declared: &SchemaSnapshot) -> Result<()> {
        let dialect = self.db.dialect();
        let mut reasons = Vec::new();
        for change in plan {
            match change {
                Change::AddColumn { model, column, .. } => {
                    let previous = schema(recorded, model)?;
                    let target = schema(declared, model)?;
                    if target.requires_value(column) && self.is_populated(&previous.table).await? {
                        reasons.push(
                            DbError::NotNullWithoutDefault {
                                table: previous.table.clone(),
                                column: column.clone(),
                            }
                            .to_string(),
                        );
                    }
                }
                Change::DropColumn { model, column, .. } => {
                    let previous = schema(recorded, model)?;
                    if previous.requires_value(column) && self.is_populated(&previous.table).await? {
                        reasons.push(format!(
                            "dropping NOT NULL column `{}.{column}` without a default while the table holds rows",
                            previous.table
                        ));
                    }
                }
                Change::ModifyColumn { model, column, .. } => {
                    let previous = schema(recorded, model)?;
                    let target = schema(declared, model)?;
                    if target.requires_value(column)
                        && !previous.not_null.contains(column)
                        && self.is_populated(&previous.table).await?
                    {
                        reasons.push(
                            DbError::NotNullWithoutDefault {
                                table: previous.table.clone(),
                                column: column.clone(),
                            }
                            .to_string(),
                        );
                    }
                }
                Change::PrimaryKey { model, to, .. } => {
                    let previous = schema(recorded, model)?;
                    let target = schema(declared, model)?;
                    let key_type = target.col_type.get(to).map_or("", String::as_str);
                    if !previous.has_column(to)
                        && !dialect.is_integer_type(key_type)
                        && self.is_populated(&previous.table).await?
                    {
                        reasons.push(format!(
                            "new primary key `{}.{to}` is not an integer and `{}` holds rows",
                            target.table, previous.table
                        ));
                    }
                    if self.db.engine() != Engine::Sqlite {
                        for other in recorded.referencing(&previous.table) {
                            reasons.push(format!(
                                "`{}` references `{}`; drop that foreign key before changing the primary key",
                                other.table, previous.table
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(MigrateError::Rejected(reasons))
        }
    }

    /// Applies the plan: renames, creates, column changes, drops.
    pub async fn apply(&mut self, plan: &Plan, recorded: &SchemaSnapshot, declared: &SchemaSnapshot) -> Result<()> {
        let db = self.db;
        let dialect = db.dialect();
        let sqlite = db.engine() == Engine::Sqlite;
        let mut current = recorded.clone();

        for change in plan {
            if let Change::RenameTable { from, to, .. } = change {
                info!(%change, "applying");
                self.run(dialect.rename_table(from, to)).await?;
                for schema in current.models.values_mut() {
                    if schema.table == *from {
                        schema.table.clone_from(to);
                    }
                    for fk in schema.foreign_key.values_mut() {
                        if fk.table == *from {
                            fk.table.clone_from(to);
                        }
                    }
                }
            }
        }

        let mut created = Vec::new();
        for change in plan {
            if let Change::CreateTable { schema, .. } = change {
                info!(%change, "applying");
                self.run(dialect.create_table(schema, sqlite)).await?;
                created.push(schema);
            }
        }
        if !sqlite {
            for schema in created {
                for (column, fk) in &schema.foreign_key {
                    self.run(dialect.add_foreign_key(&schema.table, column, fk)?).await?;
                }
            }
        }

        for model in plan.altered_models() {
            let previous = schema(&current, model)?;
            let target = schema(declared, model)?;
            let changes = plan.column_changes(model);
            for change in &changes {
                info!(%change, "applying");
            }
            self.alter_model(previous, target, &changes).await?;
        }

        for change in plan {
            if let Change::DropTable { table, .. } = change {
                info!(%change, "applying");
                self.run(dialect.drop_table(table)).await?;
            }
        }
        Ok(())
    }

    async fn alter_model(&mut self, previous: &TableSchema, target: &TableSchema, changes: &[&Change]) -> Result<()> {
        if changes.iter().any(|c| matches!(c, Change::PrimaryKey { .. })) {
            return self.rebuild(previous, target).await;
        }

        if self.db.engine() == Engine::Sqlite {
            let native = changes
                .iter()
                .all(|c| matches!(c, Change::AddColumn { column, .. } if sqlite_can_add(target, column)));
            if !native {
                return self.rebuild(previous, target).await;
            }
            for column in changes.iter().filter_map(|c| c.column()) {
                self.run(self.db.dialect().add_column(target, column)).await?;
            }
            return Ok(());
        }

        for change in changes {
            match change {
                Change::AddColumn { column, .. } => self.add_column(target, column).await?,
                Change::DropColumn { column, .. } => self.drop_column(previous, column).await?,
                Change::ModifyColumn { column, .. } => self.modify_column(previous, target, column).await?,
                _ => {}
            }
        }
        Ok(())
    }

    async fn rebuild(&mut self, previous: &TableSchema, target: &TableSchema) -> Result<()> {
        let statements = Rebuild::new(previous, target).run(self.db).await?;
        self.executed.extend(statements);
        Ok(())
    }

    async fn add_column(&mut self, target: &TableSchema, column: &str) -> Result<()> {
        let db = self.db;
        let dialect = db.dialect();
        self.run(dialect.add_column(target, column)).await?;
        if let Some(expr) = target.check.get(column) {
            self.run(dialect.add_check(&target.table, column, expr)?).await?;
        }
        if let Some(fk) = target.foreign_key.get(column) {
            self.run(dialect.add_foreign_key(&target.table, column, fk)?).await?;
        }
        Ok(())
    }

    async fn drop_column(&mut self, previous: &TableSchema, column: &str) -> Result<()> {
        if previous.foreign_key.contains_key(column) {
            self.drop_foreign_keys(&previous.table, column).await?;
        }
        if previous.check.contains_key(column) {
            self.drop_checks(&previous.table, column).await?;
        }
        self.run(self.db.dialect().drop_column(&previous.table, column)).await
    }

    async fn modify_column(&mut self, previous: &TableSchema, target: &TableSchema, column: &str) -> Result<()> {
        let missing = || MigrateError::InvalidState(format!("column `{}.{column}` is not declared", target.table));
        let before = previous.column_shape(column).ok_or_else(missing)?;
        let after = target.column_shape(column).ok_or_else(missing)?;
        let db = self.db;
        let dialect = db.dialect();
        let table = &target.table;

        if before.foreign_key.is_some() {
            self.drop_foreign_keys(table, column).await?;
        }
        if before.unique && !after.unique {
            for name in db.unique_constraint_names(table, column).await? {
                self.run(dialect.drop_unique(table, &name)?).await?;
            }
        }
        if before.check.is_some() && before.check != after.check {
            self.drop_checks(table, column).await?;
        }

        for sql in dialect.modify_column(previous, target, column)? {
            self.run(sql).await?;
        }

        if after.unique && !before.unique {
            self.run(dialect.add_unique(table, column)?).await?;
        }
        if let Some(expr) = after.check {
            if before.check != after.check {
                self.run(dialect.add_check(table, column, expr)?).await?;
            }
        }
        if let Some(fk) = after.foreign_key {
            self.run(dialect.add_foreign_key(table, column, fk)?).await?;
        }
        Ok(())
    }

    async fn drop_foreign_keys(&mut self, table: &str, column: &str) -> Result<()> {
        for name in self.db.foreign_key_names(table, column).await? {
            self.run(self.db.dialect().drop_foreign_key(table, &name)?).await?;
        }
        Ok(())
    }

    async fn drop_checks(&mut self, table: &str, column: &str) -> Result<()> {
        let suffix = format!("_{column}");
        for name in self.db.check_constraint_names(table).await? {
            if name.starts_with("ck_") && name.ends_with(&suffix) {
                self.run(self.db.dialect().drop_check(table, &name)?).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db::{column, DataType, DefaultValue, ModelDecl, Registry, SqliteDialect};

    #[test]
    fn test_literal_defaults() {
        assert!(is_literal_default("'x'"));
        assert!(is_literal_default("0"));
        assert!(is_literal_default("-1.5"));
        assert!(is_literal_default("NULL"));
        assert!(!is_literal_default("CURRENT_TIMESTAMP"));
        assert!(!is_literal_default("'"));
    }

    #[test]
    fn test_sqlite_native_add_rules() {
        let snapshot = Registry::new()
            .with(ModelDecl::new("Author"))
            .with(
                ModelDecl::new("Post")
                    .column("plain", column(DataType::Str))
                    .column("defaulted", column(DataType::Str).not_null().default("x"))
                    .column("required", column(DataType::Str).not_null())
                    .column("stamped", column(DataType::DateTime).default(DefaultValue::expr("CURRENT_TIMESTAMP")))
                    .column("slug", column(DataType::Str).unique())
                    .column("score", column(DataType::Int).check("score > 0"))
                    .column("author_id", column(DataType::Int).related_to("Author")),
            )
            .extract(&SqliteDialect::new(), true)
            .unwrap();
        let post = snapshot.model("Post").unwrap();
        assert!(sqlite_can_add(post, "plain"));
        assert!(sqlite_can_add(post, "defaulted"));
        for column in ["required", "stamped", "slug", "score", "author_id"] {
            assert!(!sqlite_can_add(post, column), "{column}");
        }
    }
}
