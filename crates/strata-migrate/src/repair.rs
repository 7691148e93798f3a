//! Column rename repair.
//!
//! The differ cannot tell a renamed column from a dropped one plus an added
//! one. Models list intended renames as repair entries (`old -> new`); the
//! repair flow renames the live column in place, keeping its data, and
//! carries the rename into the recorded snapshot.

use strata_db::{Database, Registry, SchemaSnapshot};
use tracing::{info, warn};

use crate::error::{MigrateError, Result};
use crate::rebuild::Rebuild;

/// One requested column rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRename {
    /// Model name.
    pub model: String,
    /// Recorded table name.
    pub table: String,
    /// Current column name.
    pub old: String,
    /// Requested column name.
    pub new: String,
}

impl std::fmt::Display for ColumnRename {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rename column `{}.{}` to `{}`", self.table, self.old, self.new)
    }
}

fn refuse(model: &str, column: &str, reason: impl Into<String>) -> MigrateError {
    MigrateError::RepairNotAllowed {
        model: model.to_string(),
        column: column.to_string(),
        reason: reason.into(),
    }
}

/// Collects the repair entries of every declared model and checks them
/// against the recorded snapshot.
///
/// Only plain columns can be renamed: the old column must be recorded, the
/// new name must be free, and neither primary keys nor foreign keys qualify.
pub fn pending_renames(registry: &Registry, recorded: &SchemaSnapshot) -> Result<Vec<ColumnRename>> {
    let mut renames = Vec::new();
    for decl in registry.models() {
        if decl.repair.is_empty() {
            continue;
        }
        let schema = recorded
            .model(&decl.name)
            .ok_or_else(|| refuse(&decl.name, "*", "the model has no recorded table"))?;
        for (old, new) in &decl.repair {
            if !schema.has_column(old) {
                return Err(refuse(&decl.name, old, "the column is not in the recorded schema"));
            }
            if schema.has_column(new) {
                return Err(refuse(&decl.name, old, format!("column `{new}` already exists")));
            }
            if schema.primary_key == *old {
                return Err(refuse(&decl.name, old, "primary keys cannot be renamed"));
            }
            if schema.foreign_key.contains_key(old) {
                return Err(refuse(&decl.name, old, "foreign key columns cannot be renamed"));
            }
            renames.push(ColumnRename {
                model: decl.name.clone(),
                table: schema.table.clone(),
                old: old.clone(),
                new: new.clone(),
            });
        }
    }
    Ok(renames)
}

/// Renames the live columns and returns the updated recorded snapshot with
/// the executed statements.
///
/// Engines that refuse `RENAME COLUMN` fall back to a table rebuild that
/// copies the old column into the new one. Columns already renamed in the
/// database are only carried into the snapshot.
pub async fn apply_renames(
    db: &Database,
    recorded: &SchemaSnapshot,
    renames: &[ColumnRename],
) -> Result<(SchemaSnapshot, Vec<String>)> {
    let mut current = recorded.clone();
    let mut executed = Vec::new();
    for rename in renames {
        let previous = current
            .model(&rename.model)
            .cloned()
            .ok_or_else(|| refuse(&rename.model, &rename.old, "the model has no recorded table"))?;
        let renamed = previous.with_column_renamed(&rename.old, &rename.new);

        let done = db.exist_column(&rename.table, &rename.new).await?
            && !db.exist_column(&rename.table, &rename.old).await?;
        if done {
            info!(%rename, "column already renamed in the database");
        } else {
            let sql = db.dialect().rename_column(&rename.table, &rename.old, &rename.new);
            match db.execute(&sql, Vec::new()).await {
                Ok(_) => executed.push(sql),
                Err(err) => {
                    warn!(%rename, error = %err, "rename failed, rebuilding the table");
                    let statements = Rebuild::new(&previous, &renamed)
                        .rename(rename.old.as_str(), rename.new.as_str())
                        .run(db)
                        .await?;
                    executed.extend(statements);
                }
            }
            info!(%rename, "repaired column");
        }
        current.models.insert(rename.model.clone(), renamed);
    }
    Ok((current, executed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db::{column, DataType, ModelDecl, SqliteDialect};

    fn recorded() -> SchemaSnapshot {
        Registry::new()
            .with(ModelDecl::new("Author").column("email", column(DataType::Str)))
            .with(ModelDecl::new("Post").column("author_id", column(DataType::Int).related_to("Author")))
            .extract(&SqliteDialect::new(), true)
            .unwrap()
    }

    fn declared(model: &str, old: &str, new: &str) -> Registry {
        Registry::new().with(ModelDecl::new(model).repair(old, new))
    }

    #[test]
    fn test_pending_renames() {
        let renames = pending_renames(&declared("Author", "email", "email_address"), &recorded()).unwrap();
        assert_eq!(
            renames,
            vec![ColumnRename {
                model: "Author".into(),
                table: "author".into(),
                old: "email".into(),
                new: "email_address".into(),
            }]
        );
        assert_eq!(renames[0].to_string(), "rename column `author.email` to `email_address`");
    }

    #[test]
    fn test_refused_renames() {
        let recorded = recorded();
        for (model, old, new) in [
            ("Author", "missing", "other"),
            ("Author", "email", "id"),
            ("Author", "id", "key"),
            ("Post", "author_id", "writer_id"),
            ("Tag", "name", "label"),
        ] {
            let err = pending_renames(&declared(model, old, new), &recorded).unwrap_err();
            assert!(matches!(err, MigrateError::RepairNotAllowed { .. }), "{model}.{old}");
        }
    }
}
