//! PostgreSQL dialect.

use super::{default_size, raw_type, Dialect};
use crate::column::{DataType, Size};
use crate::config::Engine;
use crate::error::Result;
use crate::schema::TableSchema;

/// PostgreSQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn type_name(&self, datatype: &DataType, size: Option<Size>, scale: Option<u8>) -> Result<String> {
        let size = size.unwrap_or_else(|| default_size(datatype));
        let name = match datatype {
            DataType::Str => match size {
                Size::Xs => "VARCHAR(255)",
                Size::Sm => "VARCHAR(500)",
                Size::Md | Size::Lg | Size::Xl => "TEXT",
            },
            DataType::Int => match size {
                Size::Xs | Size::Sm => "SMALLINT",
                Size::Md => "INTEGER",
                Size::Lg | Size::Xl => "BIGINT",
            },
            DataType::Float => match scale {
                Some(scale) => return Ok(format!("NUMERIC({},{scale})", size.precision())),
                None if size <= Size::Sm => "REAL",
                None => "DOUBLE PRECISION",
            },
            DataType::Bool => "BOOLEAN",
            DataType::Date => "DATE",
            DataType::Time => "TIME",
            DataType::DateTime => "TIMESTAMP",
            DataType::Raw(raw) => return raw_type(raw),
        };
        Ok(name.to_string())
    }

    fn is_integer_type(&self, sql_type: &str) -> bool {
        matches!(sql_type, "SMALLINT" | "INTEGER" | "BIGINT")
    }

    fn auto_increment_column(&self, column: &str, sql_type: &str) -> String {
        let serial = match sql_type {
            "SMALLINT" => "SMALLSERIAL",
            "BIGINT" => "BIGSERIAL",
            _ => "SERIAL",
        };
        format!("{} {serial} PRIMARY KEY", self.quote_identifier(column))
    }

    fn supports_returning(&self) -> bool {
        true
    }

    fn float_cast(&self, expr: &str) -> String {
        format!("CAST({expr} AS DOUBLE PRECISION)")
    }

    fn text_cast(&self, expr: &str) -> String {
        format!("CAST({expr} AS TEXT)")
    }

    fn modify_column(&self, previous: &TableSchema, target: &TableSchema, column: &str) -> Result<Vec<String>> {
        let table = self.quote_identifier(&target.table);
        let quoted = self.quote_identifier(column);
        let mut statements = Vec::new();

        if let Some(sql_type) = target.col_type.get(column) {
            if previous.col_type.get(column) != Some(sql_type) {
                statements.push(format!(
                    "ALTER TABLE {table} ALTER COLUMN {quoted} TYPE {sql_type} USING {quoted}::{sql_type}"
                ));
            }
        }

        let was_not_null = previous.not_null.contains(column);
        let is_not_null = target.not_null.contains(column);
        if was_not_null != is_not_null {
            let action = if is_not_null { "SET" } else { "DROP" };
            statements.push(format!("ALTER TABLE {table} ALTER COLUMN {quoted} {action} NOT NULL"));
        }

        let target_default = target.default.get(column);
        if previous.default.get(column) != target_default {
            statements.push(match target_default {
                Some(default) => format!("ALTER TABLE {table} ALTER COLUMN {quoted} SET DEFAULT {default}"),
                None => format!("ALTER TABLE {table} ALTER COLUMN {quoted} DROP DEFAULT"),
            });
        }
        Ok(statements)
    }

    fn reset_sequence(&self, table: &str, column: &str) -> Option<String> {
        let quoted_table = self.quote_identifier(table);
        Some(format!(
            "SELECT setval(pg_get_serial_sequence('{quoted_table}', '{column}'), \
             COALESCE((SELECT MAX({}) FROM {quoted_table}), 0) + 1, false)",
            self.quote_identifier(column)
        ))
    }

    fn list_tables_sql(&self) -> String {
        "SELECT CAST(table_name AS TEXT) AS name FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' ORDER BY table_name"
            .to_string()
    }

    fn list_columns_sql(&self) -> String {
        "SELECT CAST(column_name AS TEXT) AS name FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 ORDER BY ordinal_position"
            .to_string()
    }

    fn foreign_key_names_sql(&self) -> Result<String> {
        Ok(constraint_names_sql("FOREIGN KEY"))
    }

    fn unique_constraint_names_sql(&self) -> Result<String> {
        Ok(constraint_names_sql("UNIQUE"))
    }

    fn check_constraint_names_sql(&self) -> Result<String> {
        Ok("SELECT CAST(conname AS TEXT) AS name FROM pg_constraint \
            WHERE conrelid = CAST($1 AS regclass) AND contype = 'c'"
            .to_string())
    }
}

fn constraint_names_sql(constraint_type: &str) -> String {
    format!(
        "SELECT CAST(tc.constraint_name AS TEXT) AS name \
         FROM information_schema.table_constraints tc \
         JOIN information_schema.key_column_usage kcu \
         ON tc.constraint_name = kcu.constraint_name \
         AND tc.table_schema = kcu.table_schema AND tc.table_name = kcu.table_name \
         WHERE tc.table_schema = current_schema() AND tc.table_name = $1 \
         AND kcu.column_name = $2 AND tc.constraint_type = '{constraint_type}'"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        let d = PostgresDialect::new();
        assert_eq!(d.type_name(&DataType::Str, Some(Size::Xs), None).unwrap(), "VARCHAR(255)");
        assert_eq!(d.type_name(&DataType::Str, Some(Size::Md), None).unwrap(), "TEXT");
        assert_eq!(d.type_name(&DataType::Int, Some(Size::Sm), None).unwrap(), "SMALLINT");
        assert_eq!(d.type_name(&DataType::Int, Some(Size::Lg), None).unwrap(), "BIGINT");
        assert_eq!(d.type_name(&DataType::Float, None, None).unwrap(), "DOUBLE PRECISION");
        assert_eq!(d.type_name(&DataType::Float, Some(Size::Xl), Some(10)).unwrap(), "NUMERIC(38,10)");
        assert_eq!(d.type_name(&DataType::DateTime, None, None).unwrap(), "TIMESTAMP");
    }

    #[test]
    fn test_serial_primary_keys() {
        let d = PostgresDialect::new();
        assert_eq!(d.auto_increment_column("id", "INTEGER"), "\"id\" SERIAL PRIMARY KEY");
        assert_eq!(d.auto_increment_column("id", "BIGINT"), "\"id\" BIGSERIAL PRIMARY KEY");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(PostgresDialect::new().placeholder(3), "$3");
    }

    #[test]
    fn test_modify_column_statements() {
        let mut before = TableSchema::new("item", "id", "INTEGER");
        before.col_type.insert("price".into(), "REAL".into());
        before.default.insert("price".into(), "0".into());
        let mut after = before.clone();
        after.col_type.insert("price".into(), "NUMERIC(20,2)".into());
        after.not_null.insert("price".into());
        after.default.remove("price");

        let statements = PostgresDialect::new().modify_column(&before, &after, "price").unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"item\" ALTER COLUMN \"price\" TYPE NUMERIC(20,2) USING \"price\"::NUMERIC(20,2)"
                    .to_string(),
                "ALTER TABLE \"item\" ALTER COLUMN \"price\" SET NOT NULL".to_string(),
                "ALTER TABLE \"item\" ALTER COLUMN \"price\" DROP DEFAULT".to_string(),
            ]
        );
    }

    #[test]
    fn test_reset_sequence() {
        let sql = PostgresDialect::new().reset_sequence("user", "id").unwrap();
        assert!(sql.starts_with("SELECT setval(pg_get_serial_sequence('\"user\"', 'id')"));
    }
}
