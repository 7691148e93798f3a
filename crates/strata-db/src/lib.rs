//! Declarative model schemas and multi-dialect SQL for SQLite, MySQL and
//! PostgreSQL.
//!
//! Models declare their columns with [`column`] and are resolved into
//! engine-specific [`TableSchema`]s by a [`Registry`]. A [`Database`]
//! executes parameterized CRUD, join and introspection statements built
//! through the injected [`Dialect`], and returns lazy [`Read`] results.
//!
//! # Example
//!
//! ```no_run
//! use strata_db::{Config, Database, Filter, ReadQuery, Record};
//!
//! # async fn example() -> strata_db::Result<()> {
//! let db = Database::connect(Config::sqlite_memory()).await?;
//! db.execute("CREATE TABLE person (id INTEGER PRIMARY KEY, name TEXT)", vec![]).await?;
//!
//! let id = db.create("person", &Record::new().set("name", "O'Brien")).await?;
//! let row = db
//!     .read("person", ReadQuery::new().filter(Filter::new().push("id--equal", id)?))?
//!     .first()
//!     .await?;
//! assert!(row.is_some());
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod column;
pub mod config;
pub mod database;
pub mod dialect;
pub mod error;
pub mod filter;
pub mod model;
pub mod read;
pub mod schema;
pub mod value;

pub use builder::{JoinKind, JoinQuery, ReadQuery, Statement};
pub use column::{column, ColumnSpec, DataType, DefaultValue, ReferentialAction, Size};
pub use config::{Config, Engine};
pub use database::{Database, Transaction};
pub use dialect::{Dialect, MySqlDialect, PostgresDialect, SqliteDialect};
pub use error::{DbError, Result};
pub use filter::Filter;
pub use model::{is_snake_case, to_snake_case, ColumnDef, Model, ModelDecl, Registry, RepairMap};
pub use read::{Aggregate, AggregateFn, AggregateShape, Read};
pub use schema::{temp_table_name, ForeignKey, SchemaSnapshot, TableSchema, TEMP_SUFFIX};
pub use value::{Record, Row, Value};
