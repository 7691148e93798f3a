//! MySQL dialect.

use super::{default_size, raw_type, Dialect};
use crate::builder::JoinKind;
use crate::column::{DataType, Size};
use crate::config::Engine;
use crate::error::Result;
use crate::schema::TableSchema;

/// MySQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl MySqlDialect {
    /// Creates a new MySQL dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MySqlDialect {
    fn engine(&self) -> Engine {
        Engine::MySql
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn type_name(&self, datatype: &DataType, size: Option<Size>, scale: Option<u8>) -> Result<String> {
        let size = size.unwrap_or_else(|| default_size(datatype));
        let name = match datatype {
            DataType::Str => match size {
                Size::Xs => "VARCHAR(255)",
                Size::Sm => "VARCHAR(500)",
                Size::Md => "TEXT",
                Size::Lg => "MEDIUMTEXT",
                Size::Xl => "LONGTEXT",
            },
            DataType::Int => match size {
                Size::Xs => "TINYINT",
                Size::Sm => "SMALLINT",
                Size::Md => "INT",
                Size::Lg | Size::Xl => "BIGINT",
            },
            DataType::Float => match scale {
                Some(scale) => return Ok(format!("DECIMAL({},{scale})", size.precision())),
                None if size <= Size::Sm => "FLOAT",
                None => "DOUBLE",
            },
            DataType::Bool => "BOOLEAN",
            DataType::Date => "DATE",
            DataType::Time => "TIME",
            DataType::DateTime => "DATETIME",
            DataType::Raw(raw) => return raw_type(raw),
        };
        Ok(name.to_string())
    }

    fn is_integer_type(&self, sql_type: &str) -> bool {
        matches!(sql_type, "TINYINT" | "SMALLINT" | "INT" | "BIGINT")
    }

    fn auto_increment_column(&self, column: &str, sql_type: &str) -> String {
        format!(
            "{} {sql_type} NOT NULL AUTO_INCREMENT PRIMARY KEY",
            self.quote_identifier(column)
        )
    }

    fn supports_join(&self, kind: JoinKind) -> bool {
        kind != JoinKind::Full
    }

    fn last_insert_id_sql(&self) -> Option<String> {
        Some("SELECT CAST(LAST_INSERT_ID() AS SIGNED) AS id".to_string())
    }

    fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, Some(offset)) => format!(" LIMIT {} OFFSET {offset}", u64::MAX),
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, None) => String::new(),
        }
    }

    fn float_cast(&self, expr: &str) -> String {
        format!("CAST({expr} AS DOUBLE)")
    }

    fn text_cast(&self, expr: &str) -> String {
        format!("CAST({expr} AS CHAR)")
    }

    fn rename_table(&self, old: &str, new: &str) -> String {
        format!(
            "RENAME TABLE {} TO {}",
            self.quote_identifier(old),
            self.quote_identifier(new)
        )
    }

    fn modify_column(&self, previous: &TableSchema, target: &TableSchema, column: &str) -> Result<Vec<String>> {
        let changed = previous.col_type.get(column) != target.col_type.get(column)
            || previous.not_null.contains(column) != target.not_null.contains(column)
            || previous.default.get(column) != target.default.get(column);
        if !changed {
            return Ok(Vec::new());
        }
        Ok(vec![format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.quote_identifier(&target.table),
            self.column_definition(target, column, false)
        )])
    }

    fn drop_foreign_key(&self, table: &str, name: &str) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        ))
    }

    fn drop_unique(&self, table: &str, name: &str) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP INDEX {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        ))
    }

    fn drop_check(&self, table: &str, name: &str) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP CHECK {}",
            self.quote_identifier(table),
            self.quote_identifier(name)
        ))
    }

    fn list_tables_sql(&self) -> String {
        "SELECT CAST(TABLE_NAME AS CHAR) AS name FROM information_schema.TABLES \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_NAME"
            .to_string()
    }

    fn list_columns_sql(&self) -> String {
        "SELECT CAST(COLUMN_NAME AS CHAR) AS name FROM information_schema.COLUMNS \
         WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION"
            .to_string()
    }

    fn foreign_key_names_sql(&self) -> Result<String> {
        Ok("SELECT CAST(CONSTRAINT_NAME AS CHAR) AS name FROM information_schema.KEY_COLUMN_USAGE \
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ? \
            AND REFERENCED_TABLE_NAME IS NOT NULL"
            .to_string())
    }

    fn unique_constraint_names_sql(&self) -> Result<String> {
        Ok("SELECT DISTINCT CAST(INDEX_NAME AS CHAR) AS name FROM information_schema.STATISTICS \
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND COLUMN_NAME = ? \
            AND NON_UNIQUE = 0 AND INDEX_NAME <> 'PRIMARY'"
            .to_string())
    }

    fn check_constraint_names_sql(&self) -> Result<String> {
        Ok("SELECT CAST(CONSTRAINT_NAME AS CHAR) AS name FROM information_schema.TABLE_CONSTRAINTS \
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_TYPE = 'CHECK'"
            .to_string())
    }
}
