//! The migration entry point.
//!
//! A [`Migrator`] ties the declared models, the snapshot store and the
//! executor together behind five patterns: `check`, `migrate`, `repair`,
//! `init` and `reset`.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use strata_db::{Database, DbError, Registry, SchemaSnapshot, TEMP_SUFFIX};
use tracing::{info, warn};

use crate::declarations::DeclarationRewriter;
use crate::differ::diff;
use crate::error::{MigrateError, Result};
use crate::executor::Executor;
use crate::plan::Plan;
use crate::rebuild::heal;
use crate::repair::{apply_renames, pending_renames, ColumnRename};
use crate::store::{MigrationRecord, SnapshotStore, Version, MIGRATIONS_TABLE};

/// Migration mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Report planned changes without executing anything.
    Check,
    /// Execute the plan and record a new snapshot.
    Migrate,
    /// Apply declared column renames.
    Repair,
    /// Create the migrations table and every declared table.
    Init,
    /// Drop everything recorded and initialize again.
    Reset,
}

impl Pattern {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Migrate => "migrate",
            Self::Repair => "repair",
            Self::Init => "init",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pattern {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "check" => Ok(Self::Check),
            "migrate" => Ok(Self::Migrate),
            "repair" => Ok(Self::Repair),
            "init" => Ok(Self::Init),
            "reset" => Ok(Self::Reset),
            _ => Err(MigrateError::InvalidState(format!(
                "unknown pattern `{s}`; expected check, migrate, repair, init or reset"
            ))),
        }
    }
}

/// Migrator settings.
#[derive(Debug, Clone)]
pub struct MigratorOptions {
    /// Directory holding snapshot artifacts.
    pub migrations_dir: PathBuf,
    /// Comment recorded with new snapshots.
    pub comment: String,
    /// Must be set for `reset` to drop anything.
    pub confirm_reset: bool,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            comment: "Untitled".to_string(),
            confirm_reset: false,
        }
    }
}

impl MigratorOptions {
    /// Sets the snapshot directory.
    #[must_use]
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Sets the snapshot comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Confirms a destructive reset.
    #[must_use]
    pub fn confirm_reset(mut self, confirm: bool) -> Self {
        self.confirm_reset = confirm;
        self
    }
}

/// Outcome of one migrator run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    /// Summaries of planned or applied changes.
    pub changes: Vec<String>,
    /// Executed statements.
    pub statements: Vec<String>,
    /// Snapshot version recorded by the run.
    pub version: Option<Version>,
    /// Leftover temporary tables that were healed.
    pub healed: Vec<String>,
    /// Column renames applied by `repair`.
    pub repaired: Vec<ColumnRename>,
}

impl Report {
    /// Returns true if the run found nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.statements.is_empty() && self.version.is_none() && self.healed.is_empty()
    }
}

/// Runs migrations for one database and one set of declared models.
pub struct Migrator<'a> {
    db: &'a Database,
    registry: Registry,
    options: MigratorOptions,
    store: SnapshotStore,
    rewriter: Option<Box<dyn DeclarationRewriter + Send + 'a>>,
}

impl<'a> Migrator<'a> {
    /// Creates a migrator.
    #[must_use]
    pub fn new(db: &'a Database, registry: Registry, options: MigratorOptions) -> Self {
        let store = SnapshotStore::new(options.migrations_dir.clone());
        Self {
            db,
            registry,
            options,
            store,
            rewriter: None,
        }
    }

    /// Rewrites model declarations after a repair.
    #[must_use]
    pub fn with_rewriter(mut self, rewriter: impl DeclarationRewriter + Send + 'a) -> Self {
        self.rewriter = Some(Box::new(rewriter));
        self
    }

    /// The declared models.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The snapshot store.
    #[must_use]
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// The declared models resolved for the connected engine.
    pub fn declared(&self) -> Result<SchemaSnapshot> {
        Ok(self
            .registry
            .extract(self.db.dialect(), self.db.config().safe_typing)?)
    }

    /// The current recorded snapshot.
    pub async fn recorded(&self) -> Result<SchemaSnapshot> {
        if !self.store.is_initialized(self.db).await? {
            return Err(MigrateError::NotInitialized);
        }
        let Some((record, file)) = self.store.current(self.db).await? else {
            return Err(MigrateError::InvalidState("no current snapshot is recorded".to_string()));
        };
        if file.engine != self.db.engine() {
            return Err(MigrateError::InvalidState(format!(
                "snapshot {} was recorded for {}, but the database is {}",
                record.version,
                file.engine,
                self.db.engine()
            )));
        }
        Ok(file.schema())
    }

    /// The plan turning the recorded snapshot into the declared models.
    pub async fn plan(&self) -> Result<Plan> {
        let (_, _, plan) = self.prepare().await?;
        Ok(plan)
    }

    async fn prepare(&self) -> Result<(SchemaSnapshot, SchemaSnapshot, Plan)> {
        let recorded = self.recorded().await?;
        let declared = self.declared()?;
        let plan = diff(&recorded, &declared);
        Ok((recorded, declared, plan))
    }

    /// Checks a plan against live data.
    pub async fn validate(&self, plan: &Plan, recorded: &SchemaSnapshot, declared: &SchemaSnapshot) -> Result<()> {
        Executor::new(self.db).validate(plan, recorded, declared).await
    }

    fn warn_pending_repairs(&self) {
        for decl in self.registry.models().iter().filter(|d| !d.repair.is_empty()) {
            warn!(model = %decl.name, "model has pending repairs; run `repair` before migrating");
        }
    }

    /// Drops or restores leftover temporary tables of an interrupted rebuild.
    pub async fn heal(&self) -> Result<Vec<String>> {
        heal(self.db).await
    }

    /// Plans and validates without changing anything.
    ///
    /// Leftover temporary tables are reported but not healed.
    pub async fn check(&self) -> Result<Report> {
        let (recorded, declared, plan) = self.prepare().await?;
        self.warn_pending_repairs();
        let mut report = Report {
            changes: plan.summaries(),
            ..Report::default()
        };
        for table in self.db.list_tables().await? {
            if table.ends_with(TEMP_SUFFIX) {
                report.changes.push(format!("heal leftover temporary table `{table}`"));
            }
        }
        self.validate(&plan, &recorded, &declared).await?;
        Ok(report)
    }

    /// Applies the plan and records the declared schema as a new version.
    pub async fn migrate(&mut self) -> Result<Report> {
        let healed = heal(self.db).await?;
        let (recorded, declared, plan) = self.prepare().await?;
        self.warn_pending_repairs();
        if plan.is_empty() {
            info!("schema is up to date");
            return Ok(Report {
                healed,
                ..Report::default()
            });
        }

        self.validate(&plan, &recorded, &declared).await?;
        let mut executor = Executor::new(self.db);
        executor.apply(&plan, &recorded, &declared).await?;
        let version = self.store.save(self.db, &declared, &self.options.comment).await?;
        info!(%version, changes = plan.len(), "migration applied");
        Ok(Report {
            changes: plan.summaries(),
            statements: executor.into_statements(),
            version: Some(version),
            healed,
            repaired: Vec::new(),
        })
    }

    /// Applies the declared repair entries as column renames.
    pub async fn repair(&mut self) -> Result<Report> {
        let healed = heal(self.db).await?;
        let recorded = self.recorded().await?;
        let renames = pending_renames(&self.registry, &recorded)?;
        if renames.is_empty() {
            info!("nothing to repair");
            return Ok(Report {
                healed,
                ..Report::default()
            });
        }

        let (repaired, statements) = apply_renames(self.db, &recorded, &renames).await?;
        for rename in &renames {
            if let Some(rewriter) = self.rewriter.as_mut() {
                rewriter.rename_column(&rename.model, &rename.old, &rename.new)?;
            }
            if let Some(decl) = self.registry.get_mut(&rename.model) {
                decl.repair.remove(&rename.old);
                for column in decl.columns.iter_mut().filter(|c| c.name == rename.old) {
                    column.name.clone_from(&rename.new);
                }
            }
        }
        let version = self.store.save(self.db, &repaired, &self.options.comment).await?;
        info!(%version, renames = renames.len(), "repair applied");
        Ok(Report {
            changes: renames.iter().map(ToString::to_string).collect(),
            statements,
            version: Some(version),
            healed,
            repaired: renames,
        })
    }

    /// Creates the migrations table and every declared table.
    pub async fn init(&mut self) -> Result<Report> {
        if self.store.is_initialized(self.db).await? {
            return Err(DbError::AlreadyExists(format!("migrations table `{MIGRATIONS_TABLE}`")).into());
        }
        let declared = self.declared()?;
        let empty = SchemaSnapshot::new(self.db.engine());
        let plan = diff(&empty, &declared);

        self.store.ensure_table(self.db).await?;
        let mut executor = Executor::new(self.db);
        executor.apply(&plan, &empty, &declared).await?;
        let version = self.store.save(self.db, &declared, &self.options.comment).await?;
        info!(%version, tables = plan.len(), "migrations initialized");
        Ok(Report {
            changes: plan.summaries(),
            statements: executor.into_statements(),
            version: Some(version),
            ..Report::default()
        })
    }

    /// Drops every recorded table and the migrations table, then runs
    /// [`init`](Self::init). Snapshot artifacts on disk are kept.
    pub async fn reset(&mut self) -> Result<Report> {
        if !self.options.confirm_reset {
            return Err(DbError::Unconfirmed("reset".to_string()).into());
        }
        let mut statements = Vec::new();
        if self.store.is_initialized(self.db).await? {
            if let Some((_, file)) = self.store.current(self.db).await? {
                let recorded = file.schema();
                let empty = SchemaSnapshot::new(recorded.engine);
                let teardown = diff(&recorded, &empty);
                let mut executor = Executor::new(self.db);
                executor.apply(&teardown, &recorded, &empty).await?;
                statements = executor.into_statements();
            }
            self.store.drop_table(self.db).await?;
            warn!("dropped every recorded table");
        }
        let mut report = self.init().await?;
        statements.append(&mut report.statements);
        report.statements = statements;
        Ok(report)
    }

    /// Every recorded migration, oldest first.
    pub async fn history(&self) -> Result<Vec<MigrationRecord>> {
        self.store.history(self.db).await
    }

    /// Runs one pattern.
    pub async fn run(&mut self, pattern: Pattern) -> Result<Report> {
        info!(%pattern, "running migrator");
        match pattern {
            Pattern::Check => self.check().await,
            Pattern::Migrate => self.migrate().await,
            Pattern::Repair => self.repair().await,
            Pattern::Init => self.init().await,
            Pattern::Reset => self.reset().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_parsing() {
        for pattern in [Pattern::Check, Pattern::Migrate, Pattern::Repair, Pattern::Init, Pattern::Reset] {
            assert_eq!(pattern.to_string().parse::<Pattern>().unwrap(), pattern);
        }
        assert_eq!("MIGRATE".parse::<Pattern>().unwrap(), Pattern::Migrate);
        assert!("rollback".parse::<Pattern>().is_err());
    }

    #[test]
    fn test_default_options() {
        let options = MigratorOptions::default();
        assert_eq!(options.migrations_dir, PathBuf::from("migrations"));
        assert_eq!(options.comment, "Untitled");
        assert!(!options.confirm_reset);
        assert!(MigratorOptions::default().confirm_reset(true).confirm_reset);
    }
}
