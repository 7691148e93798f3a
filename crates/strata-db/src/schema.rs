//! Normalized table schemas.
//!
//! A [`TableSchema`] is the engine-resolved shape of one model; a
//! [`SchemaSnapshot`] groups every model's schema with the engine it was
//! resolved for. Both serialize to the JSON stored in migration snapshots.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::column::ReferentialAction;
use crate::config::Engine;

/// Suffix of the temporary table used while rebuilding a table.
pub const TEMP_SUFFIX: &str = "__temp";

/// Returns the temporary name for `table` during a rebuild.
#[must_use]
pub fn temp_table_name(table: &str) -> String {
    format!("{table}{TEMP_SUFFIX}")
}

/// Foreign key target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Referenced table.
    pub table: String,
    /// Referenced column.
    pub column: String,
    /// `ON UPDATE` action.
    pub on_update: ReferentialAction,
    /// `ON DELETE` action.
    pub on_delete: ReferentialAction,
}

/// One model's resolved table shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Physical table name.
    pub table: String,
    /// Column name to resolved SQL type.
    pub col_type: BTreeMap<String, String>,
    /// Primary key column.
    pub primary_key: String,
    /// Columns with a UNIQUE constraint.
    #[serde(default)]
    pub unique: BTreeSet<String>,
    /// Columns with a NOT NULL constraint.
    #[serde(default)]
    pub not_null: BTreeSet<String>,
    /// Column name to rendered SQL default.
    #[serde(default)]
    pub default: BTreeMap<String, String>,
    /// Column name to CHECK expression.
    #[serde(default)]
    pub check: BTreeMap<String, String>,
    /// Column name to foreign key target.
    #[serde(default)]
    pub foreign_key: BTreeMap<String, ForeignKey>,
}

/// Comparable view of everything declared about one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnShape<'a> {
    /// Resolved SQL type.
    pub sql_type: &'a str,
    /// UNIQUE.
    pub unique: bool,
    /// NOT NULL.
    pub not_null: bool,
    /// Rendered default.
    pub default: Option<&'a str>,
    /// CHECK expression.
    pub check: Option<&'a str>,
    /// Foreign key target.
    pub foreign_key: Option<&'a ForeignKey>,
}

impl TableSchema {
    /// Creates a schema holding only its primary key column.
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        primary_key: impl Into<String>,
        pk_type: impl Into<String>,
    ) -> Self {
        let primary_key = primary_key.into();
        let mut col_type = BTreeMap::new();
        col_type.insert(primary_key.clone(), pk_type.into());
        Self {
            table: table.into(),
            col_type,
            primary_key,
            unique: BTreeSet::new(),
            not_null: BTreeSet::new(),
            default: BTreeMap::new(),
            check: BTreeMap::new(),
            foreign_key: BTreeMap::new(),
        }
    }

    /// Column names, primary key first, the rest in name order.
    #[must_use]
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = vec![self.primary_key.as_str()];
        columns.extend(
            self.col_type
                .keys()
                .map(String::as_str)
                .filter(|c| *c != self.primary_key),
        );
        columns
    }

    /// Returns true if the column is declared.
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.col_type.contains_key(column)
    }

    /// Returns the comparable shape of a column.
    #[must_use]
    pub fn column_shape(&self, column: &str) -> Option<ColumnShape<'_>> {
        let sql_type = self.col_type.get(column)?;
        Some(ColumnShape {
            sql_type,
            unique: self.unique.contains(column),
            not_null: self.not_null.contains(column),
            default: self.default.get(column).map(String::as_str),
            check: self.check.get(column).map(String::as_str),
            foreign_key: self.foreign_key.get(column),
        })
    }

    /// Returns true if inserting a row requires a value for this column.
    #[must_use]
    pub fn requires_value(&self, column: &str) -> bool {
        self.not_null.contains(column) && !self.default.contains_key(column)
    }

    /// Returns true if any column references `table`.
    #[must_use]
    pub fn references(&self, table: &str) -> bool {
        self.foreign_key.values().any(|fk| fk.table == table)
    }

    /// Returns a copy with every trace of `old` renamed to `new`.
    #[must_use]
    pub fn with_column_renamed(&self, old: &str, new: &str) -> Self {
        fn rename_key<V: Clone>(map: &BTreeMap<String, V>, old: &str, new: &str) -> BTreeMap<String, V> {
            map.iter()
                .map(|(k, v)| (if k == old { new.to_string() } else { k.clone() }, v.clone()))
                .collect()
        }
        let rename_set = |set: &BTreeSet<String>| -> BTreeSet<String> {
            set.iter()
                .map(|c| if c == old { new.to_string() } else { c.clone() })
                .collect()
        };

        Self {
            table: self.table.clone(),
            col_type: rename_key(&self.col_type, old, new),
            primary_key: if self.primary_key == old {
                new.to_string()
            } else {
                self.primary_key.clone()
            },
            unique: rename_set(&self.unique),
            not_null: rename_set(&self.not_null),
            default: rename_key(&self.default, old, new),
            check: rename_key(&self.check, old, new)
                .into_iter()
                .map(|(column, expr)| (column, rename_identifier(&expr, old, new)))
                .collect(),
            foreign_key: rename_key(&self.foreign_key, old, new),
        }
    }
}

/// Renames identifier `old` in a SQL expression, leaving string literals
/// and longer identifiers alone. Quoted identifiers keep their quotes.
fn rename_identifier(expr: &str, old: &str, new: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut chars = expr.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                let mut end = expr.len();
                while let Some((i, next)) = chars.next() {
                    if next == c {
                        if c == '\'' && chars.peek().is_some_and(|(_, n)| *n == '\'') {
                            chars.next();
                            continue;
                        }
                        end = i + next.len_utf8();
                        break;
                    }
                }
                let token = &expr[start..end];
                let inner = &token[1..token.len().saturating_sub(1).max(1)];
                if c != '\'' && inner == old {
                    out.push(c);
                    out.push_str(new);
                    out.push(c);
                } else {
                    out.push_str(token);
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start + 1;
                while let Some((i, next)) = chars.peek().copied() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        end = i + 1;
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &expr[start..end];
                out.push_str(if word == old { new } else { word });
            }
            c => out.push(c),
        }
    }
    out
}

/// Every model's schema, resolved for one engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    /// Engine the types were resolved for.
    pub engine: Engine,
    /// Model name to table schema.
    pub models: BTreeMap<String, TableSchema>,
}

impl SchemaSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            models: BTreeMap::new(),
        }
    }

    /// Looks up a model's schema.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&TableSchema> {
        self.models.get(name)
    }

    /// Finds the model mapped to a physical table.
    #[must_use]
    pub fn model_for_table(&self, table: &str) -> Option<(&str, &TableSchema)> {
        self.models
            .iter()
            .find(|(_, schema)| schema.table == table)
            .map(|(name, schema)| (name.as_str(), schema))
    }

    /// Tables with a foreign key into `table`, other than `table` itself.
    #[must_use]
    pub fn referencing(&self, table: &str) -> Vec<&TableSchema> {
        self.models
            .values()
            .filter(|schema| schema.table != table && schema.references(table))
            .collect()
    }

    /// Physical table names.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.models.values().map(|schema| schema.table.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> TableSchema {
        let mut schema = TableSchema::new("post", "id", "INTEGER");
        schema.col_type.insert("title".into(), "TEXT".into());
        schema.col_type.insert("author_id".into(), "INTEGER".into());
        schema.not_null.insert("title".into());
        schema.foreign_key.insert(
            "author_id".into(),
            ForeignKey {
                table: "author".into(),
                column: "id".into(),
                on_update: ReferentialAction::Restrict,
                on_delete: ReferentialAction::Cascade,
            },
        );
        schema
    }

    #[test]
    fn test_columns_primary_key_first() {
        assert_eq!(post().columns(), vec!["id", "author_id", "title"]);
    }

    #[test]
    fn test_column_shape_and_requires_value() {
        let schema = post();
        let shape = schema.column_shape("title").unwrap();
        assert!(shape.not_null);
        assert!(shape.default.is_none());
        assert!(schema.requires_value("title"));
        assert!(!schema.requires_value("author_id"));
        assert!(schema.column_shape("missing").is_none());
    }

    #[test]
    fn test_rename_column_carries_constraints() {
        let renamed = post().with_column_renamed("title", "headline");
        assert!(!renamed.has_column("title"));
        assert!(renamed.not_null.contains("headline"));
        assert_eq!(renamed.columns(), vec!["id", "author_id", "headline"]);
    }

    #[test]
    fn test_rename_column_rewrites_check_expressions() {
        let mut schema = post();
        schema
            .check
            .insert("title".into(), "length(title) > 2 AND title <> 'title' AND \"title\" <> subtitle".into());
        let renamed = schema.with_column_renamed("title", "headline");
        assert_eq!(
            renamed.check["headline"],
            "length(headline) > 2 AND headline <> 'title' AND \"headline\" <> subtitle"
        );
    }

    #[test]
    fn test_rename_identifier_keeps_escaped_literals() {
        assert_eq!(rename_identifier("a = 'it''s a'", "a", "b"), "b = 'it''s a'");
        assert_eq!(rename_identifier("`a` + a_b + ab", "a", "b"), "`b` + a_b + ab");
    }

    #[test]
    fn test_referencing() {
        let mut snapshot = SchemaSnapshot::new(Engine::Sqlite);
        snapshot.models.insert("Post".into(), post());
        snapshot
            .models
            .insert("Author".into(), TableSchema::new("author", "id", "INTEGER"));

        assert_eq!(snapshot.referencing("author").len(), 1);
        assert!(snapshot.referencing("post").is_empty());
        assert_eq!(snapshot.model_for_table("post").map(|(m, _)| m), Some("Post"));
    }

    #[test]
    fn test_temp_table_name() {
        assert_eq!(temp_table_name("user"), "user__temp");
    }
}
