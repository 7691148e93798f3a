//! Migration plans.
//!
//! A [`Plan`] is the ordered list of structural [`Change`]s between the
//! recorded snapshot and the declared models. Changes name the model and
//! columns involved; the schemas themselves stay in the two snapshots.

use std::fmt;

use strata_db::TableSchema;

/// A single structural change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A declared model has no table yet.
    CreateTable {
        /// Model name.
        model: String,
        /// Declared schema.
        schema: TableSchema,
    },
    /// A recorded model is no longer declared.
    DropTable {
        /// Model name.
        model: String,
        /// Table to drop.
        table: String,
    },
    /// A model now maps to a different table name.
    RenameTable {
        /// Model name.
        model: String,
        /// Recorded table name.
        from: String,
        /// Declared table name.
        to: String,
    },
    /// A column was declared.
    AddColumn {
        /// Model name.
        model: String,
        /// Declared table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// A column is no longer declared.
    DropColumn {
        /// Model name.
        model: String,
        /// Declared table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// A column's type or constraints changed.
    ModifyColumn {
        /// Model name.
        model: String,
        /// Declared table name.
        table: String,
        /// Column name.
        column: String,
    },
    /// The primary key changed; the table is rebuilt.
    PrimaryKey {
        /// Model name.
        model: String,
        /// Declared table name.
        table: String,
        /// Recorded primary key column.
        from: String,
        /// Declared primary key column.
        to: String,
    },
}

impl Change {
    /// Model the change applies to.
    #[must_use]
    pub fn model(&self) -> &str {
        match self {
            Self::CreateTable { model, .. }
            | Self::DropTable { model, .. }
            | Self::RenameTable { model, .. }
            | Self::AddColumn { model, .. }
            | Self::DropColumn { model, .. }
            | Self::ModifyColumn { model, .. }
            | Self::PrimaryKey { model, .. } => model,
        }
    }

    /// Table the change applies to, after any rename.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { schema, .. } => &schema.table,
            Self::RenameTable { to, .. } => to,
            Self::DropTable { table, .. }
            | Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::ModifyColumn { table, .. }
            | Self::PrimaryKey { table, .. } => table,
        }
    }

    /// Column the change applies to, for column-level changes.
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::AddColumn { column, .. }
            | Self::DropColumn { column, .. }
            | Self::ModifyColumn { column, .. } => Some(column),
            Self::PrimaryKey { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Returns true for changes that alter an existing table's columns.
    #[must_use]
    pub fn is_column_change(&self) -> bool {
        matches!(
            self,
            Self::AddColumn { .. } | Self::DropColumn { .. } | Self::ModifyColumn { .. } | Self::PrimaryKey { .. }
        )
    }

    /// Human-readable one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::CreateTable { model, schema } => format!("create table `{}` for model {model}", schema.table),
            Self::DropTable { model, table } => format!("drop table `{table}` of removed model {model}"),
            Self::RenameTable { model, from, to } => format!("rename table `{from}` to `{to}` for model {model}"),
            Self::AddColumn { table, column, .. } => format!("add column `{table}.{column}`"),
            Self::DropColumn { table, column, .. } => format!("drop column `{table}.{column}`"),
            Self::ModifyColumn { table, column, .. } => format!("modify column `{table}.{column}`"),
            Self::PrimaryKey { table, from, to, .. } => {
                format!("change primary key of `{table}` from `{from}` to `{to}` (table rebuild)")
            }
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Ordered changes: renames, creates, column changes, drops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Changes in execution order.
    pub changes: Vec<Change>,
}

impl Plan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Iterates over the changes.
    pub fn iter(&self) -> std::slice::Iter<'_, Change> {
        self.changes.iter()
    }

    /// Column-level changes for one model, in plan order.
    #[must_use]
    pub fn column_changes(&self, model: &str) -> Vec<&Change> {
        self.changes
            .iter()
            .filter(|c| c.is_column_change() && c.model() == model)
            .collect()
    }

    /// Models with column-level changes, in first-seen order.
    #[must_use]
    pub fn altered_models(&self) -> Vec<&str> {
        let mut models: Vec<&str> = Vec::new();
        for change in self.changes.iter().filter(|c| c.is_column_change()) {
            if !models.contains(&change.model()) {
                models.push(change.model());
            }
        }
        models
    }

    /// One summary line per change.
    #[must_use]
    pub fn summaries(&self) -> Vec<String> {
        self.changes.iter().map(Change::summary).collect()
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}
