//! Parameterized statement builders.
//!
//! Builders interpolate identifiers with the dialect's quoting and bind
//! every value. `NULL` values in `INSERT` / `UPDATE` are written as the
//! literal `NULL`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::dialect::Dialect;
use crate::error::{DbError, Result};
use crate::filter::Filter;
use crate::schema::{SchemaSnapshot, TableSchema};
use crate::value::{Record, Value};

/// SQL text with its bound parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    /// SQL text with dialect placeholders.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
}

impl Statement {
    /// Creates a statement without parameters.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Creates a statement with parameters.
    #[must_use]
    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Appends a parameter and returns its placeholder.
    pub fn bind(&mut self, dialect: &dyn Dialect, value: Value) -> String {
        self.params.push(value);
        dialect.placeholder(self.params.len())
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Join kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    /// `INNER JOIN`
    #[default]
    Inner,
    /// `LEFT JOIN`
    Left,
    /// `RIGHT JOIN`
    Right,
    /// `FULL JOIN`
    Full,
    /// `CROSS JOIN`
    Cross,
}

impl JoinKind {
    /// SQL keyword.
    #[must_use]
    pub fn to_sql(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Full => "FULL JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

impl FromStr for JoinKind {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INNER" => Ok(Self::Inner),
            "LEFT" => Ok(Self::Left),
            "RIGHT" => Ok(Self::Right),
            "FULL" => Ok(Self::Full),
            "CROSS" => Ok(Self::Cross),
            _ => Err(DbError::invalid("join", s, "expected INNER, LEFT, RIGHT, FULL or CROSS")),
        }
    }
}

/// Single-table read.
#[derive(Debug, Clone, Default)]
pub struct ReadQuery {
    /// Selected columns; empty selects all.
    pub columns: Vec<String>,
    /// `WHERE` conditions.
    pub filter: Filter,
    /// Order columns, `-` prefix for descending.
    pub order_by: Vec<String>,
    /// Grouping columns.
    pub group_by: Vec<String>,
    /// Row limit.
    pub limit: Option<u64>,
    /// Row offset.
    pub offset: Option<u64>,
}

impl ReadQuery {
    /// Creates a query selecting every column.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the given columns.
    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Adds an order column.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(column.into());
        self
    }

    /// Adds a grouping column.
    #[must_use]
    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by.push(column.into());
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the row offset.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Multi-model read; column references are written `Model.column`.
#[derive(Debug, Clone, Default)]
pub struct JoinQuery {
    /// Models in join order, at least two.
    pub models: Vec<String>,
    /// Join kind applied between consecutive models.
    pub kind: JoinKind,
    /// Selected `Model.column` references; empty selects all.
    pub columns: Vec<String>,
    /// `WHERE` conditions keyed by `Model.column`.
    pub filter: Filter,
    /// Order references, `-` prefix for descending.
    pub order_by: Vec<String>,
    /// Row limit.
    pub limit: Option<u64>,
    /// Row offset.
    pub offset: Option<u64>,
}

impl JoinQuery {
    /// Creates a join over the given models.
    #[must_use]
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: models.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the join kind.
    #[must_use]
    pub fn kind(mut self, kind: JoinKind) -> Self {
        self.kind = kind;
        self
    }

    /// Selects the given references.
    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Adds an order reference.
    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by.push(column.into());
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Sets the row offset.
    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A built `SELECT` plus what the aggregates need to rewrite it.
#[derive(Debug, Clone, Default)]
pub struct Select {
    /// The statement.
    pub statement: Statement,
    /// Rendered grouping expressions.
    pub group_by: Vec<String>,
    /// Result alias to column expression, for joins.
    pub aliases: BTreeMap<String, String>,
}

fn require_table(table: &str) -> Result<()> {
    if table.is_empty() {
        Err(DbError::MissingParameter("table"))
    } else {
        Ok(())
    }
}

fn order_clause(order_by: &[String], resolve: &dyn Fn(&str) -> Result<String>) -> Result<String> {
    if order_by.is_empty() {
        return Ok(String::new());
    }
    let parts = order_by
        .iter()
        .map(|spec| match spec.strip_prefix('-') {
            Some(column) => Ok(format!("{} DESC", resolve(column)?)),
            None => Ok(format!("{} ASC", resolve(spec)?)),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(format!(" ORDER BY {}", parts.join(", ")))
}

/// Builds an `INSERT`, optionally returning `returning`.
pub fn insert(dialect: &dyn Dialect, table: &str, record: &Record, returning: Option<&str>) -> Result<Statement> {
    require_table(table)?;
    if record.is_empty() {
        return Err(DbError::MissingParameter("values"));
    }
    let mut statement = Statement::default();
    let mut columns = Vec::with_capacity(record.len());
    let mut values = Vec::with_capacity(record.len());
    for (column, value) in record.iter() {
        columns.push(dialect.quote_identifier(column));
        values.push(if value.is_null() {
            "NULL".to_string()
        } else {
            statement.bind(dialect, value.clone())
        });
    }
    statement.sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.quote_identifier(table),
        columns.join(", "),
        values.join(", ")
    );
    if let Some(column) = returning {
        statement.sql.push_str(&format!(" RETURNING {}", dialect.quote_identifier(column)));
    }
    Ok(statement)
}

/// Builds a single-table `SELECT`.
pub fn select(dialect: &dyn Dialect, table: &str, query: &ReadQuery) -> Result<Select> {
    require_table(table)?;
    let quote = |column: &str| -> Result<String> { Ok(dialect.quote_identifier(column)) };
    let mut statement = Statement::default();

    let columns = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query
            .columns
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut sql = format!("SELECT {columns} FROM {}", dialect.quote_identifier(table));
    if !query.filter.is_empty() {
        let clause = query.filter.render(&mut statement, dialect, &quote)?;
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }
    let group_by: Vec<String> = query.group_by.iter().map(|c| dialect.quote_identifier(c)).collect();
    if !group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&group_by.join(", "));
    }
    sql.push_str(&order_clause(&query.order_by, &quote)?);
    sql.push_str(&dialect.limit_clause(query.limit, query.offset));
    statement.sql = sql;

    Ok(Select {
        statement,
        group_by,
        aliases: BTreeMap::new(),
    })
}

/// Builds an `UPDATE`; an empty filter updates every row.
pub fn update(dialect: &dyn Dialect, table: &str, record: &Record, filter: &Filter) -> Result<Statement> {
    require_table(table)?;
    if record.is_empty() {
        return Err(DbError::MissingParameter("values"));
    }
    let quote = |column: &str| -> Result<String> { Ok(dialect.quote_identifier(column)) };
    let mut statement = Statement::default();
    let assignments: Vec<String> = record
        .iter()
        .map(|(column, value)| {
            let rhs = if value.is_null() {
                "NULL".to_string()
            } else {
                statement.bind(dialect, value.clone())
            };
            format!("{} = {rhs}", dialect.quote_identifier(column))
        })
        .collect();
    let mut sql = format!(
        "UPDATE {} SET {}",
        dialect.quote_identifier(table),
        assignments.join(", ")
    );
    if !filter.is_empty() {
        let clause = filter.render(&mut statement, dialect, &quote)?;
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }
    statement.sql = sql;
    Ok(statement)
}

/// Builds a `DELETE`; an empty filter deletes every row.
pub fn delete(dialect: &dyn Dialect, table: &str, filter: &Filter) -> Result<Statement> {
    require_table(table)?;
    let quote = |column: &str| -> Result<String> { Ok(dialect.quote_identifier(column)) };
    let mut statement = Statement::default();
    let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(table));
    if !filter.is_empty() {
        let clause = filter.render(&mut statement, dialect, &quote)?;
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }
    statement.sql = sql;
    Ok(statement)
}

/// Resolves `Model.column` references against the joined models.
struct JoinScope<'a> {
    dialect: &'a dyn Dialect,
    models: Vec<(&'a str, &'a TableSchema)>,
}

impl JoinScope<'_> {
    fn column(&self, table: &str, column: &str) -> String {
        format!(
            "{}.{}",
            self.dialect.quote_identifier(table),
            self.dialect.quote_identifier(column)
        )
    }

    fn resolve(&self, reference: &str) -> Result<String> {
        let (model, column) = reference.split_once('.').ok_or_else(|| {
            DbError::invalid("join column", reference, "expected `Model.column`")
        })?;
        let (_, schema) = self
            .models
            .iter()
            .find(|(name, _)| *name == model)
            .ok_or_else(|| DbError::invalid("join column", reference, "model is not part of the join"))?;
        if !schema.has_column(column) {
            return Err(DbError::DoesNotExist(format!("column `{reference}`")));
        }
        Ok(self.column(&schema.table, column))
    }

    /// `ON` condition linking `schema` to one of the models before it.
    fn link(&self, index: usize) -> Result<String> {
        let (name, schema) = self.models[index];
        for (_, other) in &self.models[..index] {
            if let Some((column, fk)) = schema.foreign_key.iter().find(|(_, fk)| fk.table == other.table) {
                return Ok(format!(
                    "{} = {}",
                    self.column(&schema.table, column),
                    self.column(&other.table, &fk.column)
                ));
            }
            if let Some((column, fk)) = other.foreign_key.iter().find(|(_, fk)| fk.table == schema.table) {
                return Ok(format!(
                    "{} = {}",
                    self.column(&other.table, column),
                    self.column(&schema.table, &fk.column)
                ));
            }
        }
        Err(DbError::Integrity(format!(
            "model `{name}` has no foreign key link to the models joined before it"
        )))
    }
}

/// Builds a multi-model `SELECT` with `ON` conditions derived from foreign keys.
pub fn join(dialect: &dyn Dialect, snapshot: &SchemaSnapshot, query: &JoinQuery) -> Result<Select> {
    if query.models.len() < 2 {
        return Err(DbError::invalid(
            "models",
            query.models.join(", "),
            "a join needs at least two models",
        ));
    }
    if !dialect.supports_join(query.kind) {
        return Err(DbError::Unsupported {
            engine: dialect.name(),
            operation: query.kind.to_sql().to_string(),
        });
    }

    let mut models = Vec::with_capacity(query.models.len());
    for name in &query.models {
        if models.iter().any(|(m, _)| m == name) {
            return Err(DbError::invalid("models", name, "listed more than once"));
        }
        let schema = snapshot
            .model(name)
            .ok_or_else(|| DbError::DoesNotExist(format!("model `{name}`")))?;
        models.push((name.as_str(), schema));
    }
    let scope = JoinScope { dialect, models };
    let resolve = |reference: &str| scope.resolve(reference);

    let mut aliases = BTreeMap::new();
    if query.columns.is_empty() {
        for (name, schema) in &scope.models {
            for column in schema.columns() {
                aliases.insert(format!("{name}.{column}"), scope.column(&schema.table, column));
            }
        }
    } else {
        for reference in &query.columns {
            aliases.insert(reference.clone(), scope.resolve(reference)?);
        }
    }
    let select_list: Vec<String> = if query.columns.is_empty() {
        scope
            .models
            .iter()
            .flat_map(|(name, schema)| {
                schema
                    .columns()
                    .into_iter()
                    .map(move |column| format!("{name}.{column}"))
            })
            .map(|alias| format!("{} AS {}", aliases[&alias], dialect.quote_identifier(&alias)))
            .collect()
    } else {
        query
            .columns
            .iter()
            .map(|alias| format!("{} AS {}", aliases[alias], dialect.quote_identifier(alias)))
            .collect()
    };

    let (_, first) = scope.models[0];
    let mut sql = format!(
        "SELECT {} FROM {}",
        select_list.join(", "),
        dialect.quote_identifier(&first.table)
    );
    for index in 1..scope.models.len() {
        let (_, schema) = scope.models[index];
        sql.push_str(&format!(" {} {}", query.kind.to_sql(), dialect.quote_identifier(&schema.table)));
        if query.kind != JoinKind::Cross {
            sql.push_str(&format!(" ON {}", scope.link(index)?));
        }
    }

    let mut statement = Statement::default();
    if !query.filter.is_empty() {
        let clause = query.filter.render(&mut statement, dialect, &resolve)?;
        sql.push_str(" WHERE ");
        sql.push_str(&clause);
    }
    sql.push_str(&order_clause(&query.order_by, &resolve)?);
    sql.push_str(&dialect.limit_clause(query.limit, query.offset));
    statement.sql = sql;

    Ok(Select {
        statement,
        group_by: Vec::new(),
        aliases,
    })
}
