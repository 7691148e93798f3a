//! SQLite dialect.
//!
//! SQLite has no `ALTER COLUMN` and cannot add or drop constraints on an
//! existing table, so structural changes beyond plain column additions go
//! through the table rebuild performed by the migration engine.

use super::{raw_type, Dialect};
use crate::column::{DataType, Size};
use crate::config::Engine;
use crate::error::Result;

/// SQLite dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for SqliteDialect {
    fn engine(&self) -> Engine {
        Engine::Sqlite
    }

    fn type_name(&self, datatype: &DataType, _size: Option<Size>, scale: Option<u8>) -> Result<String> {
        let name = match datatype {
            DataType::Str | DataType::Date | DataType::Time | DataType::DateTime => "TEXT",
            DataType::Int | DataType::Bool => "INTEGER",
            DataType::Float if scale.is_some() => "NUMERIC",
            DataType::Float => "REAL",
            DataType::Raw(raw) => return raw_type(raw),
        };
        Ok(name.to_string())
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    fn is_integer_type(&self, sql_type: &str) -> bool {
        sql_type == "INTEGER"
    }

    fn auto_increment_column(&self, column: &str, _sql_type: &str) -> String {
        format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", self.quote_identifier(column))
    }

    fn supports_alter_column(&self) -> bool {
        false
    }

    fn supports_add_constraint(&self) -> bool {
        false
    }

    fn last_insert_id_sql(&self) -> Option<String> {
        Some("SELECT last_insert_rowid() AS id".to_string())
    }

    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, Some(offset)) => format!(" LIMIT -1 OFFSET {offset}"),
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, None) => String::new(),
        }
    }

    fn list_tables_sql(&self) -> String {
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            .to_string()
    }

    fn list_columns_sql(&self) -> String {
        "SELECT name FROM pragma_table_info(?) ORDER BY cid".to_string()
    }
}
