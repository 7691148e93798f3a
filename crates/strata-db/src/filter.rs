//! `WHERE` conditions keyed by column and operator.
//!
//! A filter key names a column with an optional operator suffix and an
//! optional joiner prefix, separated by `--`:
//!
//! ```text
//! [and|a|or|o--]column[--operator]
//! ```
//!
//! Operators: `equal`/`e` (the default), `ne`, `gt`, `lt`, `ge`, `le`,
//! `l`/`like`, `nl`/`notlike`, `b`/`between`, `nb`/`notbetween`,
//! `i`/`in`, `ni`/`notin`. The joiner links a condition to the previous
//! one and is ignored on the first. Values always become bound
//! parameters.
//!
//! ```
//! use strata_db::Filter;
//!
//! let filter = Filter::new()
//!     .push("age--ge", 18)?
//!     .push("or--name--l", "A%")?
//!     .push_list("status--i", ["new", "open"])?;
//! assert_eq!(filter.len(), 3);
//! # Ok::<(), strata_db::DbError>(())
//! ```

use std::str::FromStr;

use crate::builder::Statement;
use crate::dialect::Dialect;
use crate::error::{DbError, Result};
use crate::value::Value;

/// Boolean joiner to the previous condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Joiner {
    /// `AND`.
    #[default]
    And,
    /// `OR`.
    Or,
}

impl Joiner {
    fn to_sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operator {
    /// `=`
    #[default]
    Equal,
    /// `<>`
    NotEqual,
    /// `>`
    Greater,
    /// `<`
    Less,
    /// `>=`
    GreaterEqual,
    /// `<=`
    LessEqual,
    /// `LIKE`
    Like,
    /// `NOT LIKE`
    NotLike,
    /// `BETWEEN`
    Between,
    /// `NOT BETWEEN`
    NotBetween,
    /// `IN`
    In,
    /// `NOT IN`
    NotIn,
}

impl Operator {
    fn to_sql(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "<>",
            Self::Greater => ">",
            Self::Less => "<",
            Self::GreaterEqual => ">=",
            Self::LessEqual => "<=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::Between => "BETWEEN",
            Self::NotBetween => "NOT BETWEEN",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
        }
    }

    fn takes_range(self) -> bool {
        matches!(self, Self::Between | Self::NotBetween)
    }

    fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

impl FromStr for Operator {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "equal" | "e" => Self::Equal,
            "ne" => Self::NotEqual,
            "gt" => Self::Greater,
            "lt" => Self::Less,
            "ge" => Self::GreaterEqual,
            "le" => Self::LessEqual,
            "l" | "like" => Self::Like,
            "nl" | "notlike" => Self::NotLike,
            "b" | "between" => Self::Between,
            "nb" | "notbetween" => Self::NotBetween,
            "i" | "in" => Self::In,
            "ni" | "notin" => Self::NotIn,
            other => return Err(DbError::invalid("operator", other, "unknown filter operator")),
        })
    }
}

/// Value side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    /// A single value.
    Single(Value),
    /// Low and high bound for `BETWEEN`.
    Range(Value, Value),
    /// Members for `IN`.
    List(Vec<Value>),
}

/// One parsed condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Joiner to the previous condition.
    pub joiner: Joiner,
    /// Column reference as written in the key.
    pub column: String,
    /// Operator.
    pub operator: Operator,
    /// Value(s).
    pub criterion: Criterion,
}

/// Parses a filter key into joiner, column and operator.
pub fn parse_key(key: &str) -> Result<(Joiner, String, Operator)> {
    let mut parts: Vec<&str> = key.split("--").collect();
    let joiner = match parts.first().copied() {
        Some("and" | "a") if parts.len() > 1 => {
            parts.remove(0);
            Joiner::And
        }
        Some("or" | "o") if parts.len() > 1 => {
            parts.remove(0);
            Joiner::Or
        }
        _ => Joiner::And,
    };
    let (column, operator) = match parts.as_slice() {
        [column] => (*column, Operator::Equal),
        [column, op] => (*column, op.parse()?),
        _ => return Err(DbError::invalid("filter key", key, "expected [joiner--]column[--operator]")),
    };
    if column.is_empty() {
        return Err(DbError::MissingParameter("filter column"));
    }
    Ok((joiner, column.to_string(), operator))
}

/// Ordered list of conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single equality filter.
    pub fn equal(column: &str, value: impl Into<Value>) -> Result<Self> {
        Self::new().push(column, value)
    }

    /// Adds a single-valued condition.
    pub fn push(self, key: &str, value: impl Into<Value>) -> Result<Self> {
        self.push_criterion(key, Criterion::Single(value.into()))
    }

    /// Adds an `IN` / `NOT IN` condition.
    pub fn push_list<I, V>(self, key: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.push_criterion(key, Criterion::List(values.into_iter().map(Into::into).collect()))
    }

    /// Adds a `BETWEEN` / `NOT BETWEEN` condition.
    pub fn push_range(self, key: &str, low: impl Into<Value>, high: impl Into<Value>) -> Result<Self> {
        self.push_criterion(key, Criterion::Range(low.into(), high.into()))
    }

    /// Adds a condition, checking the value shape against the operator.
    pub fn push_criterion(mut self, key: &str, criterion: Criterion) -> Result<Self> {
        let (joiner, column, operator) = parse_key(key)?;
        match (&criterion, operator) {
            (Criterion::Range(..), op) if op.takes_range() => {}
            (Criterion::List(values), op) if op.takes_list() => {
                if values.is_empty() {
                    return Err(DbError::invalid("filter", key, "IN list must not be empty"));
                }
            }
            (Criterion::Single(Value::Null), Operator::Equal | Operator::NotEqual) => {}
            (Criterion::Single(Value::Null), _) => {
                return Err(DbError::invalid("filter", key, "NULL only compares with equal or ne"));
            }
            (Criterion::Single(_), op) if !op.takes_range() && !op.takes_list() => {}
            _ => {
                return Err(DbError::invalid(
                    "filter",
                    key,
                    format!("operator `{}` does not accept this value shape", operator.to_sql()),
                ))
            }
        }
        self.conditions.push(Condition {
            joiner,
            column,
            operator,
            criterion,
        });
        Ok(self)
    }

    /// Returns true when there are no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Number of conditions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Parsed conditions in order.
    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Renders the conditions, binding every value into `statement`.
    ///
    /// `resolve` turns a column reference into quoted SQL.
    pub(crate) fn render(
        &self,
        statement: &mut Statement,
        dialect: &dyn Dialect,
        resolve: &dyn Fn(&str) -> Result<String>,
    ) -> Result<String> {
        let mut sql = String::new();
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                sql.push(' ');
                sql.push_str(condition.joiner.to_sql());
                sql.push(' ');
            }
            let column = resolve(&condition.column)?;
            let op = condition.operator.to_sql();
            match &condition.criterion {
                Criterion::Single(Value::Null) => {
                    let test = if condition.operator == Operator::Equal {
                        "IS NULL"
                    } else {
                        "IS NOT NULL"
                    };
                    sql.push_str(&format!("{column} {test}"));
                }
                Criterion::Single(value) => {
                    let p = statement.bind(dialect, value.clone());
                    sql.push_str(&format!("{column} {op} {p}"));
                }
                Criterion::Range(low, high) => {
                    let low = statement.bind(dialect, low.clone());
                    let high = statement.bind(dialect, high.clone());
                    sql.push_str(&format!("{column} {op} {low} AND {high}"));
                }
                Criterion::List(values) => {
                    let placeholders: Vec<String> = values
                        .iter()
                        .map(|v| statement.bind(dialect, v.clone()))
                        .collect();
                    sql.push_str(&format!("{column} {op} ({})", placeholders.join(", ")));
                }
            }
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};

    fn render(filter: &Filter, dialect: &dyn Dialect) -> Statement {
        let mut statement = Statement::default();
        let quote = |c: &str| -> Result<String> { Ok(dialect.quote_identifier(c)) };
        let sql = filter.render(&mut statement, dialect, &quote).unwrap();
        statement.sql = sql;
        statement
    }

    #[test]
    fn test_parse_key_forms() {
        assert_eq!(parse_key("name").unwrap(), (Joiner::And, "name".into(), Operator::Equal));
        assert_eq!(parse_key("age--ge").unwrap(), (Joiner::And, "age".into(), Operator::GreaterEqual));
        assert_eq!(parse_key("o--age--lt").unwrap(), (Joiner::Or, "age".into(), Operator::Less));
        assert_eq!(parse_key("and--id").unwrap(), (Joiner::And, "id".into(), Operator::Equal));
        assert_eq!(parse_key("Post.id--ni").unwrap().1, "Post.id");
    }

    #[test]
    fn test_parse_key_rejects_garbage() {
        assert!(parse_key("age--over").is_err());
        assert!(parse_key("a--b--c--d").is_err());
        assert!(matches!(parse_key(""), Err(DbError::MissingParameter(_))));
    }

    #[test]
    fn test_render_binds_every_value() {
        let filter = Filter::new()
            .push("name", "O'Brien")
            .unwrap()
            .push_range("or--age--b", 18, 65)
            .unwrap()
            .push_list("a--id--ni", [1, 2])
            .unwrap();
        let statement = render(&filter, &SqliteDialect::new());
        assert_eq!(
            statement.sql,
            "\"name\" = ? OR \"age\" BETWEEN ? AND ? AND \"id\" NOT IN (?, ?)"
        );
        assert_eq!(statement.params.len(), 5);
        assert!(!statement.sql.contains("O'Brien"));
    }

    #[test]
    fn test_render_numbered_placeholders() {
        let filter = Filter::new().push("a--x--gt", 1).unwrap().push("y--l", "%z").unwrap();
        let statement = render(&filter, &PostgresDialect::new());
        assert_eq!(statement.sql, "\"x\" > $1 AND \"y\" LIKE $2");
    }

    #[test]
    fn test_null_comparisons() {
        let filter = Filter::new()
            .push("deleted_at", Value::Null)
            .unwrap()
            .push("owner--ne", None::<i64>)
            .unwrap();
        let statement = render(&filter, &SqliteDialect::new());
        assert_eq!(statement.sql, "\"deleted_at\" IS NULL AND \"owner\" IS NOT NULL");
        assert!(statement.params.is_empty());
        assert!(Filter::new().push("x--gt", Value::Null).is_err());
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(Filter::new().push("id--i", 3).is_err());
        assert!(Filter::new().push_list("id--i", Vec::<i64>::new()).is_err());
        assert!(Filter::new().push_range("id", 1, 2).is_err());
    }
}
