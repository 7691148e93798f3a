//! Engine dialects.
//!
//! A [`Dialect`] turns semantic column declarations into engine types and
//! generates the DDL, introspection and clause fragments the query builder
//! and migration engine need. One implementation exists per [`Engine`].

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use std::fmt;

use crate::builder::JoinKind;
use crate::column::{DataType, DefaultValue, Size};
use crate::config::Engine;
use crate::error::{DbError, Result};
use crate::schema::{ForeignKey, TableSchema};

/// Name of the foreign key constraint on `table.column`.
#[must_use]
pub fn foreign_key_name(table: &str, column: &str) -> String {
    format!("fk_{table}_{column}")
}

/// Name of the check constraint on `table.column`.
#[must_use]
pub fn check_name(table: &str, column: &str) -> String {
    format!("ck_{table}_{column}")
}

/// Name of a unique constraint added after table creation.
#[must_use]
pub fn unique_name(table: &str, column: &str) -> String {
    format!("uq_{table}_{column}")
}

/// Size used when a sized type is declared without one.
pub(crate) fn default_size(datatype: &DataType) -> Size {
    match datatype {
        DataType::Str => Size::Sm,
        _ => Size::Md,
    }
}

/// Normalizes a raw SQL type token.
pub(crate) fn raw_type(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DbError::MissingParameter("datatype"));
    }
    Ok(raw.to_ascii_uppercase())
}

/// Quotes a string literal for DDL.
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Database-specific SQL generation.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Engine this dialect targets.
    fn engine(&self) -> Engine;

    /// Dialect name.
    fn name(&self) -> &'static str {
        self.engine().as_str()
    }

    /// Quotes an identifier (table or column name).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Bind placeholder for the 1-based parameter `index`.
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Resolves a semantic type to this engine's SQL type.
    fn type_name(&self, datatype: &DataType, size: Option<Size>, scale: Option<u8>) -> Result<String>;

    /// Boolean literal used in defaults.
    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "TRUE"
        } else {
            "FALSE"
        }
    }

    /// Renders a default value as SQL.
    fn render_default(&self, value: &DefaultValue) -> String {
        match value {
            DefaultValue::Bool(b) => self.bool_literal(*b).to_string(),
            DefaultValue::Int(i) => i.to_string(),
            DefaultValue::Float(f) => f.to_string(),
            DefaultValue::Str(s) => quote_literal(s),
            DefaultValue::Expr { expr } => expr.clone(),
        }
    }

    /// Returns true if `sql_type` is an integer type eligible for auto-increment.
    fn is_integer_type(&self, sql_type: &str) -> bool;

    /// Definition of an auto-incrementing integer primary key column.
    fn auto_increment_column(&self, column: &str, sql_type: &str) -> String;

    /// Whether columns can be altered in place.
    fn supports_alter_column(&self) -> bool {
        true
    }

    /// Whether constraints can be added and dropped after table creation.
    fn supports_add_constraint(&self) -> bool {
        true
    }

    /// Whether the join kind is available.
    fn supports_join(&self, _kind: JoinKind) -> bool {
        true
    }

    /// Whether `INSERT ... RETURNING` is needed to learn the inserted key.
    fn supports_returning(&self) -> bool {
        false
    }

    /// Query reading back the key generated by the last insert on the
    /// same connection, as a row with an `id` column.
    fn last_insert_id_sql(&self) -> Option<String> {
        None
    }

    /// `LIMIT` / `OFFSET` clause, with a leading space, or empty.
    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut clause = String::new();
        if let Some(limit) = limit {
            clause.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            clause.push_str(&format!(" OFFSET {offset}"));
        }
        clause
    }

    /// Wraps an aggregate so the driver reads it back as a float.
    fn float_cast(&self, expr: &str) -> String {
        expr.to_string()
    }

    /// Wraps an expression so the driver reads it back as text.
    fn text_cast(&self, expr: &str) -> String {
        expr.to_string()
    }

    /// Column definition as used in `CREATE TABLE` and `ADD COLUMN`.
    fn column_definition(&self, schema: &TableSchema, column: &str, inline_unique: bool) -> String {
        let sql_type = schema.col_type.get(column).map_or("", String::as_str);
        if column == schema.primary_key {
            if self.is_integer_type(sql_type) {
                return self.auto_increment_column(column, sql_type);
            }
            return format!("{} {sql_type} NOT NULL PRIMARY KEY", self.quote_identifier(column));
        }

        let mut parts = vec![self.quote_identifier(column), sql_type.to_string()];
        if schema.not_null.contains(column) {
            parts.push("NOT NULL".to_string());
        }
        if inline_unique && schema.unique.contains(column) {
            parts.push("UNIQUE".to_string());
        }
        if let Some(default) = schema.default.get(column) {
            parts.push(format!("DEFAULT {default}"));
        }
        parts.join(" ")
    }

    /// Table-level `CHECK` constraint.
    fn check_constraint(&self, table: &str, column: &str, expr: &str) -> String {
        format!(
            "CONSTRAINT {} CHECK ({expr})",
            self.quote_identifier(&check_name(table, column))
        )
    }

    /// Table-level `FOREIGN KEY` constraint.
    fn foreign_key_constraint(&self, table: &str, column: &str, fk: &ForeignKey) -> String {
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
            self.quote_identifier(&foreign_key_name(table, column)),
            self.quote_identifier(column),
            self.quote_identifier(&fk.table),
            self.quote_identifier(&fk.column),
            fk.on_update.to_sql(),
            fk.on_delete.to_sql()
        )
    }

    /// `CREATE TABLE` for the schema, optionally without foreign keys.
    fn create_table(&self, schema: &TableSchema, with_foreign_keys: bool) -> String {
        let mut items: Vec<String> = schema
            .columns()
            .into_iter()
            .map(|column| self.column_definition(schema, column, true))
            .collect();
        for (column, expr) in &schema.check {
            items.push(self.check_constraint(&schema.table, column, expr));
        }
        if with_foreign_keys {
            for (column, fk) in &schema.foreign_key {
                items.push(self.foreign_key_constraint(&schema.table, column, fk));
            }
        }
        format!(
            "CREATE TABLE {} (\n  {}\n)",
            self.quote_identifier(&schema.table),
            items.join(",\n  ")
        )
    }

    /// `DROP TABLE`.
    fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE {}", self.quote_identifier(table))
    }

    /// Renames a table.
    fn rename_table(&self, old: &str, new: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote_identifier(old),
            self.quote_identifier(new)
        )
    }

    /// Adds a column; checks and foreign keys are added separately.
    fn add_column(&self, schema: &TableSchema, column: &str) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(&schema.table),
            self.column_definition(schema, column, true)
        )
    }

    /// Drops a column.
    fn drop_column(&self, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote_identifier(table),
            self.quote_identifier(column)
        )
    }

    /// Statements changing a column's type, nullability and default from
    /// `previous` to `target`. Unique, check and foreign key changes are
    /// handled through the constraint helpers.
    fn modify_column(&self, _previous: &TableSchema, _target: &TableSchema, column: &str) -> Result<Vec<String>> {
        Err(DbError::Unsupported {
            engine: self.name(),
            operation: format!("altering column `{column}` in place"),
        })
    }

    /// Renames a column in place.
    fn rename_column(&self, table: &str, old: &str, new: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote_identifier(table),
            self.quote_identifier(old),
            self.quote_identifier(new)
        )
    }

    /// Adds a foreign key constraint to an existing table.
    fn add_foreign_key(&self, table: &str, column: &str, fk: &ForeignKey) -> Result<String> {
        self.require_constraints("adding foreign keys")?;
        Ok(format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(table),
            self.foreign_key_constraint(table, column, fk)
        ))
    }

    /// Drops a named foreign key constraint.
    fn drop_foreign_key(&self, table: &str, name: &str) -> Result<String> {
        self.require_constraints("dropping foreign keys")?;
        Ok(self.drop_constraint(table, name))
    }

    /// Adds a unique constraint to an existing column.
    fn add_unique(&self, table: &str, column: &str) -> Result<String> {
        self.require_constraints("adding unique constraints")?;
        Ok(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            self.quote_identifier(table),
            self.quote_identifier(&unique_name(table, column)),
            self.quote_identifier(column)
        ))
    }

    /// Drops a named unique constraint.
    fn drop_unique(&self, table: &str, name: &str) -> Result<String> {
        self.require_constraints("dropping unique constraints")?;
        Ok(self.drop_constraint(table, name))
    }

    /// Adds a check constraint to an existing table.
    fn add_check(&self, table: &str, column: &str, expr: &str) -> Result<String> {
        self.require_constraints("adding check constraints")?;
        Ok(format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(table),
            self.check_constraint(table, column, expr)
        ))
    }

    /// Drops a named check constraint.
    fn drop_check(&self, table: &str, name: &str) -> Result<String> {
        self.require_constraints("dropping check constraints")?;
        Ok(self.drop_constraint(table, name))
    }

    /// Generic `DROP CONSTRAINT`.
    fn drop_constraint(&self, table: &str, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        )
    }

    /// Fails with [`DbError::Unsupported`] when constraints cannot be altered.
    fn require_constraints(&self, operation: &str) -> Result<()> {
        if self.supports_add_constraint() {
            Ok(())
        } else {
            Err(DbError::Unsupported {
                engine: self.name(),
                operation: operation.to_string(),
            })
        }
    }

    /// Statement re-synchronising the key sequence after rows were copied in.
    fn reset_sequence(&self, _table: &str, _column: &str) -> Option<String> {
        None
    }

    /// Lists base tables as rows with a `name` column.
    fn list_tables_sql(&self) -> String;

    /// Lists a table's columns as rows with a `name` column; binds the table.
    fn list_columns_sql(&self) -> String;

    /// Foreign key constraint names on a column; binds table and column.
    fn foreign_key_names_sql(&self) -> Result<String> {
        Err(DbError::Unsupported {
            engine: self.name(),
            operation: "foreign key introspection".to_string(),
        })
    }

    /// Unique constraint names on a column; binds table and column.
    fn unique_constraint_names_sql(&self) -> Result<String> {
        Err(DbError::Unsupported {
            engine: self.name(),
            operation: "unique constraint introspection".to_string(),
        })
    }

    /// Check constraint names on a table; binds the table.
    fn check_constraint_names_sql(&self) -> Result<String> {
        Err(DbError::Unsupported {
            engine: self.name(),
            operation: "check constraint introspection".to_string(),
        })
    }
}
