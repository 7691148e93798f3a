//! Schema differ.
//!
//! Compares the recorded snapshot against the declared models and
//! classifies every difference into a [`Plan`]. Diffing is pure; checks
//! against live data happen separately before execution.

use std::collections::BTreeSet;

use strata_db::{SchemaSnapshot, TableSchema};
use tracing::debug;

use crate::plan::{Change, Plan};

/// Detects schema changes between two snapshots.
#[derive(Debug, Default)]
pub struct Differ;

impl Differ {
    /// Creates a differ.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Returns the changes turning `recorded` into `declared`.
    #[must_use]
    pub fn diff(&self, recorded: &SchemaSnapshot, declared: &SchemaSnapshot) -> Plan {
        let mut renames = Vec::new();
        let mut columns = Vec::new();

        for (model, target) in &declared.models {
            let Some(previous) = recorded.model(model) else {
                continue;
            };
            if previous.table != target.table {
                renames.push(Change::RenameTable {
                    model: model.clone(),
                    from: previous.table.clone(),
                    to: target.table.clone(),
                });
            }
            diff_columns(model, previous, target, &mut columns);
        }

        let created: Vec<(&str, &TableSchema)> = declared
            .models
            .iter()
            .filter(|(model, _)| recorded.model(model).is_none())
            .map(|(model, schema)| (model.as_str(), schema))
            .collect();
        let creates = creation_order(created).into_iter().map(|(model, schema)| Change::CreateTable {
            model: model.to_string(),
            schema: schema.clone(),
        });

        let removed: Vec<(&str, &TableSchema)> = recorded
            .models
            .iter()
            .filter(|(model, _)| declared.model(model).is_none())
            .map(|(model, schema)| (model.as_str(), schema))
            .collect();
        let drops = creation_order(removed).into_iter().rev().map(|(model, schema)| Change::DropTable {
            model: model.to_string(),
            table: schema.table.clone(),
        });

        let mut plan = Plan::new();
        plan.changes.extend(renames);
        plan.changes.extend(creates);
        plan.changes.extend(columns);
        plan.changes.extend(drops);
        debug!(changes = plan.len(), "diffed schemas");
        plan
    }
}

/// Shorthand for `Differ::new().diff(recorded, declared)`.
#[must_use]
pub fn diff(recorded: &SchemaSnapshot, declared: &SchemaSnapshot) -> Plan {
    Differ::new().diff(recorded, declared)
}

fn diff_columns(model: &str, previous: &TableSchema, target: &TableSchema, changes: &mut Vec<Change>) {
    let table = &target.table;
    let is_key = |column: &str| column == previous.primary_key || column == target.primary_key;

    let key_type = |schema: &TableSchema| schema.col_type.get(&schema.primary_key).cloned();
    if previous.primary_key != target.primary_key || key_type(previous) != key_type(target) {
        changes.push(Change::PrimaryKey {
            model: model.to_string(),
            table: table.clone(),
            from: previous.primary_key.clone(),
            to: target.primary_key.clone(),
        });
    }

    for column in target.columns() {
        if is_key(column) || previous.has_column(column) {
            continue;
        }
        changes.push(Change::AddColumn {
            model: model.to_string(),
            table: table.clone(),
            column: column.to_string(),
        });
    }

    for column in target.columns() {
        if is_key(column) || !previous.has_column(column) {
            continue;
        }
        if previous.column_shape(column) != target.column_shape(column) {
            changes.push(Change::ModifyColumn {
                model: model.to_string(),
                table: table.clone(),
                column: column.to_string(),
            });
        }
    }

    for column in previous.columns() {
        if is_key(column) || target.has_column(column) {
            continue;
        }
        changes.push(Change::DropColumn {
            model: model.to_string(),
            table: table.clone(),
            column: column.to_string(),
        });
    }
}

/// Orders schemas so that foreign key targets come before the tables
/// referencing them. Cycles keep their remaining members in name order.
fn creation_order<'a>(mut pending: Vec<(&'a str, &'a TableSchema)>) -> Vec<(&'a str, &'a TableSchema)> {
    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let waiting: BTreeSet<&str> = pending.iter().map(|(_, schema)| schema.table.as_str()).collect();
        let (ready, blocked): (Vec<_>, Vec<_>) = pending.into_iter().partition(|(_, schema)| {
            schema
                .foreign_key
                .values()
                .all(|fk| fk.table == schema.table || !waiting.contains(fk.table.as_str()))
        });
        if ready.is_empty() {
            ordered.extend(blocked);
            break;
        }
        ordered.extend(ready);
        pending = blocked;
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db::{column, DataType, Engine, ModelDecl, Registry, SqliteDialect};

    fn snapshot(models: Vec<ModelDecl>) -> SchemaSnapshot {
        Registry::from_decls(models)
            .extract(&SqliteDialect::new(), true)
            .unwrap()
    }

    fn author() -> ModelDecl {
        ModelDecl::new("Author").column("name", column(DataType::Str))
    }

    #[test]
    fn test_identical_snapshots_have_no_changes() {
        let a = snapshot(vec![author()]);
        assert!(diff(&a, &a.clone()).is_empty());
    }

    #[test]
    fn test_added_column() {
        let recorded = snapshot(vec![author()]);
        let declared = snapshot(vec![author().column("email", column(DataType::Str).not_null().default("x"))]);
        let plan = diff(&recorded, &declared);
        assert_eq!(
            plan.changes,
            vec![Change::AddColumn {
                model: "Author".into(),
                table: "author".into(),
                column: "email".into(),
            }]
        );
    }

    #[test]
    fn test_modified_and_dropped_columns() {
        let recorded = snapshot(vec![author().column("bio", column(DataType::Str)).column("age", column(DataType::Int))]);
        let declared = snapshot(vec![ModelDecl::new("Author")
            .column("name", column(DataType::Str).unique())
            .column("age", column(DataType::Int))]);
        let plan = diff(&recorded, &declared);
        assert_eq!(plan.summaries(), vec!["modify column `author.name`", "drop column `author.bio`"]);
    }

    #[test]
    fn test_primary_key_change() {
        let recorded = snapshot(vec![author()]);
        let declared = snapshot(vec![author()
            .column("code", column(DataType::Str).not_null())
            .primary_key("code")]);
        let plan = diff(&recorded, &declared);
        assert_eq!(
            plan.changes,
            vec![Change::PrimaryKey {
                model: "Author".into(),
                table: "author".into(),
                from: "id".into(),
                to: "code".into(),
            }]
        );
    }

    #[test]
    fn test_table_rename_is_detected_per_model() {
        let recorded = snapshot(vec![author()]);
        let declared = snapshot(vec![author().table("writer")]);
        let plan = diff(&recorded, &declared);
        assert_eq!(plan.summaries(), vec!["rename table `author` to `writer` for model Author"]);
    }

    #[test]
    fn test_creates_targets_first_and_drops_dependents_first() {
        let post = ModelDecl::new("Post").column("author_id", column(DataType::Int).related_to("Author"));
        let comment = ModelDecl::new("Comment").column("post_id", column(DataType::Int).related_to("Post"));
        let empty = SchemaSnapshot::new(Engine::Sqlite);
        let full = snapshot(vec![comment, post, author()]);

        let created_plan = diff(&empty, &full);
        let created: Vec<&str> = created_plan.iter().map(Change::model).collect();
        assert_eq!(created, vec!["Author", "Post", "Comment"]);

        let dropped_plan = diff(&full, &empty);
        let dropped: Vec<&str> = dropped_plan.iter().map(Change::model).collect();
        assert_eq!(dropped, vec!["Comment", "Post", "Author"]);
    }

    #[test]
    fn test_plan_order_is_renames_creates_columns_drops() {
        let recorded = snapshot(vec![author(), ModelDecl::new("Tag")]);
        let declared = snapshot(vec![
            author().table("writer").column("bio", column(DataType::Str)),
            ModelDecl::new("Post"),
        ]);
        let plan = diff(&recorded, &declared);
        assert_eq!(
            plan.summaries(),
            vec![
                "rename table `author` to `writer` for model Author",
                "create table `post` for model Post",
                "add column `writer.bio`",
                "drop table `tag` of removed model Tag",
            ]
        );
    }
}
