//! Model declarations and schema extraction.
//!
//! Every model states its own identity through a [`ModelDecl`]; a
//! [`Registry`] holds the declared models and resolves them into a
//! [`SchemaSnapshot`] for one dialect, enforcing naming, primary key and
//! foreign key rules along the way.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::column::{column, ColumnSpec, DataType};
use crate::dialect::Dialect;
use crate::error::{DbError, Result};
use crate::schema::{ForeignKey, SchemaSnapshot, TableSchema};

/// Old column name to new column name, consumed by the repair flow.
pub type RepairMap = BTreeMap<String, String>;

/// Converts a CamelCase model name to a snake_case table name.
///
/// Acronym runs stay together: `HTTPRequestLog` becomes `http_request_log`.
#[must_use]
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(|n| n.is_ascii_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Returns true for lowercase identifiers of letters, digits and single
/// underscores, starting with a letter.
#[must_use]
pub fn is_snake_case(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_lowercase()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !name.contains("__")
        && !name.ends_with('_')
}

/// One named column in a model declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column declaration.
    #[serde(flatten)]
    pub spec: ColumnSpec,
}

/// A model's declared identity and columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDecl {
    /// CamelCase model name.
    pub name: String,
    /// Explicit table name; defaults to the snake_case model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Columns in declaration order.
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    /// Primary key column; defaults to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    /// Pending column renames.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repair: RepairMap,
}

impl ModelDecl {
    /// Starts a declaration for the named model.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            columns: Vec::new(),
            primary_key: None,
            repair: RepairMap::new(),
        }
    }

    /// Overrides the table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, spec: ColumnSpec) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            spec,
        });
        self
    }

    /// Sets the primary key column.
    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = Some(column.into());
        self
    }

    /// Declares a pending rename of `old` to `new`.
    #[must_use]
    pub fn repair(mut self, old: impl Into<String>, new: impl Into<String>) -> Self {
        self.repair.insert(old.into(), new.into());
        self
    }

    /// Resolved table name.
    #[must_use]
    pub fn table_name(&self) -> String {
        self.table.clone().unwrap_or_else(|| to_snake_case(&self.name))
    }

    /// Resolved primary key column.
    #[must_use]
    pub fn primary_key_name(&self) -> &str {
        self.primary_key.as_deref().unwrap_or("id")
    }

    /// Looks up a declared column.
    #[must_use]
    pub fn find_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name).map(|c| &c.spec)
    }
}

/// A model type that declares its own schema.
pub trait Model {
    /// Returns the model's declaration.
    fn declare() -> ModelDecl;
}

/// The set of declared models.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: Vec<ModelDecl>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from declarations.
    #[must_use]
    pub fn from_decls(models: Vec<ModelDecl>) -> Self {
        Self { models }
    }

    /// Registers a compiled model.
    #[must_use]
    pub fn register<M: Model>(mut self) -> Self {
        self.models.push(M::declare());
        self
    }

    /// Adds a declaration.
    #[must_use]
    pub fn with(mut self, decl: ModelDecl) -> Self {
        self.models.push(decl);
        self
    }

    /// Adds a declaration in place.
    pub fn add(&mut self, decl: ModelDecl) {
        self.models.push(decl);
    }

    /// Declared models in registration order.
    #[must_use]
    pub fn models(&self) -> &[ModelDecl] {
        &self.models
    }

    /// Looks up a model by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModelDecl> {
        self.models.iter().find(|m| m.name == name)
    }

    /// Mutable lookup by model name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModelDecl> {
        self.models.iter_mut().find(|m| m.name == name)
    }

    /// Resolves every model into a table schema for `dialect`.
    pub fn extract(&self, dialect: &dyn Dialect, safe_typing: bool) -> Result<SchemaSnapshot> {
        let mut snapshot = SchemaSnapshot::new(dialect.engine());
        let mut tables = BTreeSet::new();
        let mut keys: BTreeMap<&str, (String, String)> = BTreeMap::new();

        for decl in &self.models {
            if decl.name.is_empty() {
                return Err(DbError::MissingParameter("model name"));
            }
            if keys.contains_key(decl.name.as_str()) {
                return Err(DbError::AlreadyExists(format!("model `{}`", decl.name)));
            }
            let table = decl.table_name();
            if table.len() < 2 || !is_snake_case(&table) {
                return Err(DbError::invalid(
                    "table",
                    &table,
                    "must be snake_case and at least 2 characters",
                ));
            }
            if !tables.insert(table.clone()) {
                return Err(DbError::AlreadyExists(format!("table `{table}`")));
            }
            keys.insert(&decl.name, (table, decl.primary_key_name().to_string()));
        }

        for decl in &self.models {
            let (table, primary_key) = &keys[decl.name.as_str()];
            let schema = self.extract_model(decl, table, primary_key, &keys, dialect, safe_typing)?;
            debug!(model = %decl.name, table = %schema.table, "extracted model schema");
            snapshot.models.insert(decl.name.clone(), schema);
        }
        Ok(snapshot)
    }

    fn extract_model(
        &self,
        decl: &ModelDecl,
        table: &str,
        primary_key: &str,
        keys: &BTreeMap<&str, (String, String)>,
        dialect: &dyn Dialect,
        safe_typing: bool,
    ) -> Result<TableSchema> {
        let implicit_id;
        let pk_spec = match decl.find_column(primary_key) {
            Some(spec) => spec,
            None if primary_key == "id" => {
                implicit_id = column(DataType::Int);
                &implicit_id
            }
            None => {
                return Err(DbError::invalid(
                    "primary_key",
                    primary_key,
                    format!("not a column of model `{}`", decl.name),
                ))
            }
        };
        if pk_spec.related_to.is_some() {
            return Err(DbError::invalid(
                "primary_key",
                primary_key,
                "a primary key cannot be a foreign key",
            ));
        }
        pk_spec.validate(safe_typing)?;
        let pk_type = dialect.type_name(&pk_spec.datatype, pk_spec.size, pk_spec.scale)?;
        let mut schema = TableSchema::new(table, primary_key, pk_type);

        let mut seen = BTreeSet::new();
        for def in &decl.columns {
            let name = def.name.as_str();
            if !is_snake_case(name) {
                return Err(DbError::invalid("column", name, "must be snake_case"));
            }
            if !seen.insert(name) {
                return Err(DbError::AlreadyExists(format!("column `{}.{name}`", decl.name)));
            }
            if name == primary_key {
                continue;
            }

            let spec = &def.spec;
            spec.validate(safe_typing)?;
            schema.col_type.insert(
                name.to_string(),
                dialect.type_name(&spec.datatype, spec.size, spec.scale)?,
            );
            if spec.unique {
                schema.unique.insert(name.to_string());
            }
            if spec.not_null {
                schema.not_null.insert(name.to_string());
            }
            if let Some(default) = &spec.default {
                schema.default.insert(name.to_string(), dialect.render_default(default));
            }
            if let Some(check) = &spec.check {
                schema.check.insert(name.to_string(), check.clone());
            }
            if let Some(target) = &spec.related_to {
                if *target == decl.name {
                    return Err(DbError::Integrity(format!(
                        "`{}.{name}` references its own model",
                        decl.name
                    )));
                }
                let (ref_table, ref_column) = keys.get(target.as_str()).ok_or_else(|| {
                    DbError::Integrity(format!(
                        "`{}.{name}` references unknown model `{target}`",
                        decl.name
                    ))
                })?;
                schema.foreign_key.insert(
                    name.to_string(),
                    ForeignKey {
                        table: ref_table.clone(),
                        column: ref_column.clone(),
                        on_update: spec.on_update,
                        on_delete: spec.on_delete,
                    },
                );
            }
        }
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ReferentialAction, Size};
    use crate::dialect::{PostgresDialect, SqliteDialect};

    struct Author;

    impl Model for Author {
        fn declare() -> ModelDecl {
            ModelDecl::new("Author")
                .column("name", column(DataType::Str).size(Size::Xs).not_null())
                .column("email", column(DataType::Str).unique())
        }
    }

    fn blog() -> Registry {
        Registry::new().register::<Author>().with(
            ModelDecl::new("BlogPost")
                .column("title", column(DataType::Str).not_null().default("untitled"))
                .column(
                    "author_id",
                    column(DataType::Int)
                        .related_to("Author")
                        .on_delete(ReferentialAction::Cascade),
                ),
        )
    }

    #[test]
    fn test_snake_case_conversion() {
        assert_eq!(to_snake_case("User"), "user");
        assert_eq!(to_snake_case("BlogPost"), "blog_post");
        assert_eq!(to_snake_case("HTTPRequestLog"), "http_request_log");
        assert_eq!(to_snake_case("Item2Tag"), "item2_tag");
    }

    #[test]
    fn test_snake_case_check() {
        assert!(is_snake_case("blog_post"));
        assert!(is_snake_case("x1"));
        assert!(!is_snake_case("BlogPost"));
        assert!(!is_snake_case("_hidden"));
        assert!(!is_snake_case("a__b"));
        assert!(!is_snake_case("trailing_"));
        assert!(!is_snake_case(""));
    }

    #[test]
    fn test_extract_synthesizes_id_and_foreign_keys() {
        let snapshot = blog().extract(&SqliteDialect::new(), true).unwrap();
        let post = snapshot.model("BlogPost").unwrap();

        assert_eq!(post.table, "blog_post");
        assert_eq!(post.primary_key, "id");
        assert_eq!(post.col_type["id"], "INTEGER");
        assert_eq!(post.default["title"], "'untitled'");
        let fk = &post.foreign_key["author_id"];
        assert_eq!(fk.table, "author");
        assert_eq!(fk.column, "id");
        assert_eq!(fk.on_delete, ReferentialAction::Cascade);
        assert!(!post.not_null.contains("id"));
    }

    #[test]
    fn test_extract_resolves_engine_types() {
        let snapshot = blog().extract(&PostgresDialect::new(), true).unwrap();
        let author = snapshot.model("Author").unwrap();
        assert_eq!(author.col_type["name"], "VARCHAR(255)");
        assert_eq!(author.col_type["email"], "VARCHAR(500)");
        assert!(author.unique.contains("email"));
    }

    #[test]
    fn test_self_reference_rejected() {
        let registry = Registry::new().with(
            ModelDecl::new("Node").column("parent_id", column(DataType::Int).related_to("Node")),
        );
        assert!(matches!(
            registry.extract(&SqliteDialect::new(), true),
            Err(DbError::Integrity(_))
        ));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let registry = Registry::new()
            .with(ModelDecl::new("Post").column("tag_id", column(DataType::Int).related_to("Tag")));
        assert!(matches!(
            registry.extract(&SqliteDialect::new(), true),
            Err(DbError::Integrity(_))
        ));
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let registry = Registry::new()
            .with(ModelDecl::new("Post"))
            .with(ModelDecl::new("Article").table("post"));
        assert!(matches!(
            registry.extract(&SqliteDialect::new(), true),
            Err(DbError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_short_or_invalid_table_rejected() {
        let short = Registry::new().with(ModelDecl::new("A"));
        assert!(short.extract(&SqliteDialect::new(), true).is_err());
        let bad = Registry::new().with(ModelDecl::new("Post").table("Posts"));
        assert!(bad.extract(&SqliteDialect::new(), true).is_err());
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let registry = Registry::new().with(
            ModelDecl::new("Post")
                .column("title", column(DataType::Str))
                .column("title", column(DataType::Str)),
        );
        assert!(matches!(
            registry.extract(&SqliteDialect::new(), true),
            Err(DbError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_explicit_primary_key_must_exist() {
        let registry = Registry::new().with(ModelDecl::new("Country").primary_key("code"));
        assert!(registry.extract(&SqliteDialect::new(), true).is_err());

        let registry = Registry::new().with(
            ModelDecl::new("Country")
                .column("code", column(DataType::Str).size(Size::Xs))
                .primary_key("code"),
        );
        let snapshot = registry.extract(&SqliteDialect::new(), true).unwrap();
        assert_eq!(snapshot.model("Country").unwrap().primary_key, "code");
    }

    #[test]
    fn test_model_decl_json() {
        let json = r#"{
            "name": "User",
            "columns": [
                {"name": "email", "datatype": "str", "unique": true},
                {"name": "age", "datatype": "int", "default": 0}
            ],
            "repair": {"mail": "email"}
        }"#;
        let decl: ModelDecl = serde_json::from_str(json).unwrap();
        assert_eq!(decl.table_name(), "user");
        assert_eq!(decl.columns.len(), 2);
        assert!(decl.find_column("email").unwrap().unique);
        assert_eq!(decl.repair["mail"], "email");
    }
}
