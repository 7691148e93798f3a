//! Lazy query results.
//!
//! A [`Read`] holds a built `SELECT` and only touches the database when
//! one of its accessors is awaited. Aggregates rewrite the select list of
//! the stored SQL in place, so the original `WHERE` and `GROUP BY`
//! clauses keep applying.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{NoExpand, Regex};

use crate::builder::{Select, Statement};
use crate::database::Database;
use crate::error::{DbError, Result};
use crate::value::{Row, Value};

fn select_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^\s*SELECT\s+.*?\s+FROM\s+").expect("valid regex"))
}

fn order_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)\s+ORDER\s+BY\s+.*?(\s+LIMIT\s+.*|\s+OFFSET\s+.*)?$").expect("valid regex")
    })
}

fn window_clause() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s(LIMIT|OFFSET)\s").expect("valid regex"))
}

fn group_clause() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\sGROUP\s+BY\s").expect("valid regex"))
}

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    /// `MIN`
    Min,
    /// `MAX`
    Max,
    /// `AVG`
    Avg,
    /// `SUM`
    Sum,
}

impl AggregateFn {
    /// Lowercase name, also used as the result alias.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
            Self::Sum => "sum",
        }
    }

    fn to_sql(self) -> &'static str {
        match self {
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Avg => "AVG",
            Self::Sum => "SUM",
        }
    }
}

/// Requested return shape of an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregateShape {
    /// The aggregate value of the first row.
    #[default]
    Scalar,
    /// The first result row.
    Row,
    /// Every result row.
    Rows,
}

/// Aggregate result in the requested shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    /// Single value; `Null` when there are no rows.
    Scalar(Value),
    /// First row, if any.
    Row(Option<Row>),
    /// All rows.
    Rows(Vec<Row>),
}

impl Aggregate {
    /// Returns the scalar value, if this is a scalar result.
    #[must_use]
    pub fn scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the rows of a row-list result.
    #[must_use]
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            Self::Rows(rows) => Some(rows),
            _ => None,
        }
    }
}

/// Lazy result of `query`, `read` or `join`.
#[derive(Debug, Clone)]
pub struct Read<'a> {
    db: &'a Database,
    select: Select,
}

impl<'a> Read<'a> {
    pub(crate) fn new(db: &'a Database, select: Select) -> Self {
        Self { db, select }
    }

    /// The stored SQL.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.select.statement.sql
    }

    /// The stored parameters.
    #[must_use]
    pub fn params(&self) -> &[Value] {
        &self.select.statement.params
    }

    /// Every row.
    pub async fn all(&self) -> Result<Vec<Row>> {
        self.db.fetch_all(&self.select.statement).await
    }

    /// The first row, if any.
    pub async fn first(&self) -> Result<Option<Row>> {
        self.db.fetch_optional(&self.select.statement).await
    }

    /// The last row, if any.
    pub async fn last(&self) -> Result<Option<Row>> {
        Ok(self.all().await?.pop())
    }

    /// Number of rows the query yields.
    pub async fn count(&self) -> Result<i64> {
        let statement = self.count_statement()?;
        let row = self.db.fetch_optional(&statement).await?;
        Ok(row
            .and_then(|r| r.get("count").and_then(Value::as_i64))
            .unwrap_or(0))
    }

    /// `MIN(column)`.
    pub async fn min(&self, column: &str, shape: AggregateShape) -> Result<Aggregate> {
        self.aggregate(AggregateFn::Min, column, shape).await
    }

    /// `MAX(column)`.
    pub async fn max(&self, column: &str, shape: AggregateShape) -> Result<Aggregate> {
        self.aggregate(AggregateFn::Max, column, shape).await
    }

    /// `AVG(column)`.
    pub async fn avg(&self, column: &str, shape: AggregateShape) -> Result<Aggregate> {
        self.aggregate(AggregateFn::Avg, column, shape).await
    }

    /// `SUM(column)`.
    pub async fn sum(&self, column: &str, shape: AggregateShape) -> Result<Aggregate> {
        self.aggregate(AggregateFn::Sum, column, shape).await
    }

    /// Runs an aggregate and shapes the result.
    pub async fn aggregate(&self, func: AggregateFn, column: &str, shape: AggregateShape) -> Result<Aggregate> {
        let statement = self.aggregate_statement(func, column)?;
        Ok(match shape {
            AggregateShape::Scalar => {
                let row = self.db.fetch_optional(&statement).await?;
                Aggregate::Scalar(
                    row.and_then(|mut r| r.remove(func.as_str()))
                        .unwrap_or(Value::Null),
                )
            }
            AggregateShape::Row => Aggregate::Row(self.db.fetch_optional(&statement).await?),
            AggregateShape::Rows => Aggregate::Rows(self.db.fetch_all(&statement).await?),
        })
    }

    fn is_windowed(&self) -> bool {
        window_clause().is_match(self.sql())
    }

    fn is_grouped(&self) -> bool {
        !self.select.group_by.is_empty() || group_clause().is_match(self.sql())
    }

    /// Rewrites the select list, dropping any `ORDER BY`.
    fn rewrite(&self, select_list: &str) -> Result<Statement> {
        let sql = self.sql();
        if !select_prefix().is_match(sql) {
            return Err(DbError::invalid(
                "sql",
                sql,
                "aggregates need a SELECT ... FROM statement",
            ));
        }
        let rewritten = select_prefix().replacen(sql, 1, NoExpand(&format!("SELECT {select_list} FROM ")));
        let rewritten = order_suffix().replacen(&rewritten, 1, "${1}");
        Ok(Statement::with_params(rewritten, self.params().to_vec()))
    }

    fn wrap(&self, select_list: &str) -> Statement {
        Statement::with_params(
            format!("SELECT {select_list} FROM ({}) AS sub", self.sql()),
            self.params().to_vec(),
        )
    }

    /// Statement counting the rows of this query.
    pub fn count_statement(&self) -> Result<Statement> {
        let list = format!("COUNT(*) AS {}", self.db.dialect().quote_identifier("count"));
        if self.is_grouped() || self.is_windowed() {
            Ok(self.wrap(&list))
        } else {
            self.rewrite(&list)
        }
    }

    /// Statement computing `func(column)` over this query.
    ///
    /// With grouping the grouping columns are selected alongside the
    /// aggregate. A limited or offset query is aggregated over its window.
    pub fn aggregate_statement(&self, func: AggregateFn, column: &str) -> Result<Statement> {
        if column.is_empty() {
            return Err(DbError::MissingParameter("column"));
        }
        let dialect = self.db.dialect();
        let alias = dialect.quote_identifier(func.as_str());
        let cast = |expr: String| match func {
            AggregateFn::Avg | AggregateFn::Sum => dialect.float_cast(&expr),
            AggregateFn::Min | AggregateFn::Max => expr,
        };

        if self.is_windowed() {
            let inner = format!("sub.{}", dialect.quote_identifier(column));
            let expr = cast(format!("{}({inner})", func.to_sql()));
            return Ok(self.wrap(&format!("{expr} AS {alias}")));
        }

        let target = resolve_column(&self.select.aliases, column, |c| dialect.quote_identifier(c));
        let expr = cast(format!("{}({target})", func.to_sql()));
        let mut list: Vec<String> = self.select.group_by.clone();
        list.push(format!("{expr} AS {alias}"));
        self.rewrite(&list.join(", "))
    }
}

fn resolve_column(aliases: &BTreeMap<String, String>, column: &str, quote: impl Fn(&str) -> String) -> String {
    aliases.get(column).cloned().unwrap_or_else(|| quote(column))
}
