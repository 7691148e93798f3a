//! Snapshot-based schema migrations.
//!
//! `strata-migrate` keeps a database in step with the models declared
//! through `strata-db`:
//! - The **snapshot store** records every applied schema as a numbered
//!   version in the `_migrations` table and as a JSON artifact on disk
//! - The **differ** compares the current snapshot with the declared models
//!   and produces an ordered [`Plan`](plan::Plan)
//! - The **executor** validates the plan against live data and applies it,
//!   rebuilding tables where the engine cannot alter them in place
//! - The **repair** flow renames columns without losing their data and
//!   rewrites the model declarations to match
//!
//! # Example
//!
//! ```rust,no_run
//! use strata_db::{column, Config, DataType, Database, ModelDecl, Registry};
//! use strata_migrate::prelude::*;
//!
//! # async fn run() -> strata_migrate::Result<()> {
//! let db = Database::connect(Config::sqlite_memory()).await?;
//! let registry = Registry::new().with(ModelDecl::new("Author").column("name", column(DataType::Str)));
//!
//! let mut migrator = Migrator::new(&db, registry, MigratorOptions::default());
//! migrator.run(Pattern::Init).await?;
//! let report = migrator.run(Pattern::Check).await?;
//! assert!(report.changes.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Create the migrations table and every declared table
//! strata --database sqlite:app.db init
//!
//! # Show what would change
//! strata --database sqlite:app.db check
//!
//! # Apply the changes and record a new snapshot
//! strata --database sqlite:app.db migrate --comment "add email"
//!
//! # Apply declared column renames
//! strata --database sqlite:app.db repair
//! ```

pub mod declarations;
pub mod differ;
pub mod error;
pub mod executor;
pub mod migrator;
pub mod plan;
pub mod rebuild;
pub mod repair;
pub mod store;

pub use error::{MigrateError, Result};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::declarations::{DeclarationRewriter, ModelFile, SourceRewriter};
    pub use crate::differ::{diff, Differ};
    pub use crate::error::{MigrateError, Result};
    pub use crate::executor::Executor;
    pub use crate::migrator::{Migrator, MigratorOptions, Pattern, Report};
    pub use crate::plan::{Change, Plan};
    pub use crate::rebuild::{heal, Rebuild};
    pub use crate::repair::ColumnRename;
    pub use crate::store::{MigrationRecord, SnapshotFile, SnapshotStore, Version, MIGRATIONS_TABLE};
}
