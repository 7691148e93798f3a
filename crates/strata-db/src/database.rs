//! Query execution over a single connection.
//!
//! [`Database`] owns an sqlx `Any` pool sized to exactly one connection
//! that is never reaped, so session state such as SQLite pragmas and
//! in-memory databases survives for the lifetime of the handle.

use sqlx::any::{AnyArguments, AnyPoolOptions, AnyQueryResult, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Column, Executor, Row as _};
use tracing::{debug, info};

use crate::builder::{self, JoinQuery, ReadQuery, Select, Statement};
use crate::config::{Config, Engine};
use crate::dialect::Dialect;
use crate::error::{DbError, Result};
use crate::filter::Filter;
use crate::read::Read;
use crate::schema::SchemaSnapshot;
use crate::value::{Record, Row, Value};

/// Binds values to a query in order.
fn bind_values<'q>(sql: &'q str, params: &'q [Value]) -> Query<'q, Any, AnyArguments<'q>> {
    let mut query = sqlx::query(sql);
    for value in params {
        query = match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(*b),
            Value::Int(i) => query.bind(*i),
            Value::Float(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Bytes(b) => query.bind(b.as_slice()),
        };
    }
    query
}

/// Decodes one column, trying the value kinds the `Any` driver supports.
fn decode_value(row: &AnyRow, index: usize) -> Result<Value> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Int));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Float));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Text));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return Ok(v.map_or(Value::Null, Value::Bool));
    }
    Ok(row
        .try_get::<Option<Vec<u8>>, _>(index)?
        .map_or(Value::Null, Value::Bytes))
}

fn decode_row(row: &AnyRow) -> Result<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), decode_value(row, index)?);
    }
    Ok(out)
}

async fn run<'c, E>(executor: E, statement: &Statement) -> Result<AnyQueryResult>
where
    E: Executor<'c, Database = Any>,
{
    debug!(sql = %statement.sql, params = statement.params.len(), "execute");
    Ok(bind_values(&statement.sql, &statement.params)
        .execute(executor)
        .await?)
}

async fn fetch<'c, E>(executor: E, statement: &Statement) -> Result<Vec<Row>>
where
    E: Executor<'c, Database = Any>,
{
    debug!(sql = %statement.sql, params = statement.params.len(), "fetch");
    let rows = bind_values(&statement.sql, &statement.params)
        .fetch_all(executor)
        .await?;
    rows.iter().map(decode_row).collect()
}

async fn fetch_one_opt<'c, E>(executor: E, statement: &Statement) -> Result<Option<Row>>
where
    E: Executor<'c, Database = Any>,
{
    debug!(sql = %statement.sql, params = statement.params.len(), "fetch optional");
    let row = bind_values(&statement.sql, &statement.params)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(decode_row).transpose()
}

fn names(rows: Vec<Row>) -> Vec<String> {
    rows.into_iter()
        .filter_map(|mut row| match row.remove("name") {
            Some(Value::Text(name)) => Some(name),
            _ => None,
        })
        .collect()
}

/// A database handle: one connection, one dialect, one configuration.
#[derive(Debug)]
pub struct Database {
    pool: AnyPool,
    dialect: Box<dyn Dialect>,
    config: Config,
}

impl Database {
    /// Opens the single connection described by `config`.
    pub async fn connect(config: Config) -> Result<Self> {
        if config.database_url.is_empty() {
            return Err(DbError::MissingParameter("database_url"));
        }
        if let Some(engine) = Engine::from_url(&config.database_url) {
            if engine != config.engine {
                return Err(DbError::invalid(
                    "database_url",
                    &config.database_url,
                    format!("URL is for {engine} but the engine is {}", config.engine),
                ));
            }
        }

        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&config.database_url)
            .await?;
        info!(engine = %config.engine, "connected to database");

        Ok(Self {
            pool,
            dialect: config.engine.dialect(),
            config,
        })
    }

    /// The injected dialect.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// The configuration this handle was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The target engine.
    #[must_use]
    pub fn engine(&self) -> Engine {
        self.config.engine
    }

    /// Closes the connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Starts a transaction on the connection.
    pub async fn begin(&self) -> Result<Transaction> {
        debug!("begin transaction");
        Ok(Transaction {
            inner: self.pool.begin().await?,
        })
    }

    pub(crate) async fn fetch_all(&self, statement: &Statement) -> Result<Vec<Row>> {
        fetch(&self.pool, statement).await
    }

    pub(crate) async fn fetch_optional(&self, statement: &Statement) -> Result<Option<Row>> {
        fetch_one_opt(&self.pool, statement).await
    }

    /// Wraps raw SQL in a lazy [`Read`].
    pub fn query(&self, sql: &str, params: Vec<Value>) -> Result<Read<'_>> {
        if sql.trim().is_empty() {
            return Err(DbError::MissingParameter("sql"));
        }
        Ok(Read::new(
            self,
            Select {
                statement: Statement::with_params(sql, params),
                ..Select::default()
            },
        ))
    }

    /// Executes raw SQL, returning the number of affected rows.
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64> {
        if sql.trim().is_empty() {
            return Err(DbError::MissingParameter("sql"));
        }
        self.execute_statement(&Statement::with_params(sql, params)).await
    }

    /// Executes a built statement.
    pub async fn execute_statement(&self, statement: &Statement) -> Result<u64> {
        Ok(run(&self.pool, statement).await?.rows_affected())
    }

    /// Inserts a row, returning its `id`.
    ///
    /// On engines that need `RETURNING`, a table without an `id` column is
    /// inserted into plainly and 0 is returned.
    pub async fn create(&self, table: &str, record: &Record) -> Result<i64> {
        let key = self.returning_key(table).await?;
        let mut conn = self.pool.acquire().await?;
        insert_row(self.dialect(), &mut *conn, table, record, key).await
    }

    /// Inserts a row, returning the value of the integer key column `key`.
    pub async fn create_with_key(&self, table: &str, record: &Record, key: &str) -> Result<i64> {
        let mut conn = self.pool.acquire().await?;
        insert_row(self.dialect(), &mut *conn, table, record, Some(key)).await
    }

    /// Inserts rows in one transaction, returning their ids in order.
    pub async fn create_multi(&self, table: &str, records: &[Record]) -> Result<Vec<i64>> {
        if records.is_empty() {
            return Err(DbError::MissingParameter("records"));
        }
        let key = self.returning_key(table).await?;
        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(insert_row(self.dialect(), &mut *tx, table, record, key).await?);
        }
        tx.commit().await?;
        debug!(table, rows = ids.len(), "inserted rows");
        Ok(ids)
    }

    /// Key column named in `RETURNING`, checked against the live table.
    async fn returning_key(&self, table: &str) -> Result<Option<&'static str>> {
        if !self.dialect.supports_returning() {
            return Ok(Some("id"));
        }
        Ok(self.exist_column(table, "id").await?.then_some("id"))
    }

    /// Builds a lazy single-table read.
    pub fn read(&self, table: &str, query: ReadQuery) -> Result<Read<'_>> {
        let select = builder::select(self.dialect(), table, &query)?;
        Ok(Read::new(self, select))
    }

    /// Builds a lazy multi-model read resolved through `snapshot`.
    pub fn join(&self, snapshot: &SchemaSnapshot, query: JoinQuery) -> Result<Read<'_>> {
        let select = builder::join(self.dialect(), snapshot, &query)?;
        Ok(Read::new(self, select))
    }

    /// Updates rows matching `filter`; an empty filter needs `confirm`.
    pub async fn update(&self, table: &str, values: &Record, filter: &Filter, confirm: bool) -> Result<u64> {
        if filter.is_empty() && !confirm {
            return Err(DbError::Unconfirmed(format!("UPDATE of every row in `{table}`")));
        }
        let statement = builder::update(self.dialect(), table, values, filter)?;
        self.execute_statement(&statement).await
    }

    /// Deletes rows matching `filter`; an empty filter needs `confirm`.
    pub async fn delete(&self, table: &str, filter: &Filter, confirm: bool) -> Result<u64> {
        if filter.is_empty() && !confirm {
            return Err(DbError::Unconfirmed(format!("DELETE of every row in `{table}`")));
        }
        let statement = builder::delete(self.dialect(), table, filter)?;
        self.execute_statement(&statement).await
    }

    /// Base table names.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = self.fetch_all(&Statement::new(self.dialect.list_tables_sql())).await?;
        Ok(names(rows))
    }

    /// Column names of `table` in ordinal order.
    pub async fn list_columns(&self, table: &str) -> Result<Vec<String>> {
        let statement = Statement::with_params(self.dialect.list_columns_sql(), vec![table.into()]);
        Ok(names(self.fetch_all(&statement).await?))
    }

    /// Whether `table` exists.
    pub async fn exist_table(&self, table: &str) -> Result<bool> {
        Ok(self.list_tables().await?.iter().any(|t| t == table))
    }

    /// Whether `table.column` exists.
    pub async fn exist_column(&self, table: &str, column: &str) -> Result<bool> {
        Ok(self.list_columns(table).await?.iter().any(|c| c == column))
    }

    /// Number of rows in `table`.
    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let statement = Statement::new(format!(
            "SELECT COUNT(*) AS {} FROM {}",
            self.dialect.quote_identifier("count"),
            self.dialect.quote_identifier(table)
        ));
        let row = self.fetch_optional(&statement).await?;
        Ok(row
            .and_then(|r| r.get("count").and_then(Value::as_i64))
            .unwrap_or(0))
    }

    /// Foreign key constraint names on `table.column`.
    pub async fn foreign_key_names(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let statement = Statement::with_params(
            self.dialect.foreign_key_names_sql()?,
            vec![table.into(), column.into()],
        );
        Ok(names(self.fetch_all(&statement).await?))
    }

    /// Unique constraint (or index) names on `table.column`.
    pub async fn unique_constraint_names(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let statement = Statement::with_params(
            self.dialect.unique_constraint_names_sql()?,
            vec![table.into(), column.into()],
        );
        Ok(names(self.fetch_all(&statement).await?))
    }

    /// Check constraint names on `table`.
    pub async fn check_constraint_names(&self, table: &str) -> Result<Vec<String>> {
        let statement = Statement::with_params(self.dialect.check_constraint_names_sql()?, vec![table.into()]);
        Ok(names(self.fetch_all(&statement).await?))
    }
}

async fn insert_row(
    dialect: &dyn Dialect,
    conn: &mut sqlx::AnyConnection,
    table: &str,
    record: &Record,
    key: Option<&str>,
) -> Result<i64> {
    let missing = |key: &str| DbError::DoesNotExist(format!("integer key `{key}` on `{table}`"));
    if let Some(id) = key.and_then(|k| record.get(k)).and_then(Value::as_i64) {
        let statement = builder::insert(dialect, table, record, None)?;
        run(&mut *conn, &statement).await?;
        return Ok(id);
    }
    if dialect.supports_returning() {
        let Some(key) = key else {
            let statement = builder::insert(dialect, table, record, None)?;
            run(&mut *conn, &statement).await?;
            return Ok(0);
        };
        let statement = builder::insert(dialect, table, record, Some(key))?;
        let row = fetch_one_opt(&mut *conn, &statement).await?;
        return row
            .and_then(|r| r.get(key).and_then(Value::as_i64))
            .ok_or_else(|| missing(key));
    }
    let statement = builder::insert(dialect, table, record, None)?;
    run(&mut *conn, &statement).await?;
    let Some(sql) = dialect.last_insert_id_sql() else {
        return Err(missing(key.unwrap_or("id")));
    };
    let row = fetch_one_opt(&mut *conn, &Statement::new(sql)).await?;
    row.and_then(|r| r.get("id").and_then(Value::as_i64))
        .filter(|id| *id > 0)
        .ok_or_else(|| missing(key.unwrap_or("id")))
}

/// An open transaction on the database connection.
pub struct Transaction {
    inner: sqlx::Transaction<'static, Any>,
}

impl Transaction {
    /// Executes a statement inside the transaction.
    pub async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        Ok(run(&mut *self.inner, statement).await?.rows_affected())
    }

    /// Executes raw SQL without parameters.
    pub async fn execute_sql(&mut self, sql: &str) -> Result<u64> {
        self.execute(&Statement::new(sql)).await
    }

    /// Fetches rows inside the transaction.
    pub async fn fetch_all(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        fetch(&mut *self.inner, statement).await
    }

    /// Commits.
    pub async fn commit(self) -> Result<()> {
        debug!("commit transaction");
        Ok(self.inner.commit().await?)
    }

    /// Rolls back.
    pub async fn rollback(self) -> Result<()> {
        debug!("rollback transaction");
        Ok(self.inner.rollback().await?)
    }
}
