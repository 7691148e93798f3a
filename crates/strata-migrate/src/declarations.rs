//! Model declaration files.
//!
//! Repairs finish by rewriting the declarations themselves, so the renamed
//! column and the consumed repair entry do not come back on the next run.
//! [`ModelFile`] handles JSON declarations; [`SourceRewriter`] edits
//! builder-style Rust sources that call `.column("..")` and `.repair("..", "..")`.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use strata_db::{ModelDecl, Registry};
use tracing::debug;

use crate::error::Result;

/// Applies a completed column rename to wherever the models are declared.
pub trait DeclarationRewriter {
    /// Renames `old` to `new` in `model` and drops the matching repair
    /// entry. Returns true if anything changed.
    fn rename_column(&mut self, model: &str, old: &str, new: &str) -> Result<bool>;
}

/// A JSON file of model declarations: `{ "models": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelFile {
    /// Declared models.
    #[serde(default)]
    pub models: Vec<ModelDecl>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl ModelFile {
    /// Wraps declarations that are not backed by a file.
    #[must_use]
    pub fn new(models: Vec<ModelDecl>) -> Self {
        Self { models, path: None }
    }

    /// Reads a declaration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut file: Self = serde_json::from_str(&content)?;
        file.path = Some(path.to_path_buf());
        debug!(path = %path.display(), models = file.models.len(), "loaded model declarations");
        Ok(file)
    }

    /// Path the declarations were loaded from.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// A registry of the declared models.
    #[must_use]
    pub fn registry(&self) -> Registry {
        Registry::from_decls(self.models.clone())
    }

    /// Writes the declarations back, pretty-printed.
    pub fn save(&self) -> Result<()> {
        if let Some(path) = &self.path {
            fs::write(path, serde_json::to_string_pretty(self)? + "\n")?;
        }
        Ok(())
    }
}

impl DeclarationRewriter for ModelFile {
    fn rename_column(&mut self, model: &str, old: &str, new: &str) -> Result<bool> {
        let Some(decl) = self.models.iter_mut().find(|m| m.name == model) else {
            return Ok(false);
        };
        let mut changed = decl.repair.remove(old).is_some();
        for column in decl.columns.iter_mut().filter(|c| c.name == old) {
            column.name = new.to_string();
            changed = true;
        }
        if changed {
            self.save()?;
        }
        Ok(changed)
    }
}

/// Rewrites a Rust source file declaring models with the builder API.
#[derive(Debug, Clone)]
pub struct SourceRewriter {
    path: PathBuf,
}

impl SourceRewriter {
    /// Targets the given source file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns `source` with the column renamed and the repair call removed.
    pub fn rewrite(source: &str, old: &str, new: &str) -> Result<String> {
        let old_pattern = regex::escape(old);
        let column = Regex::new(&format!(r#"\.column\(\s*"{old_pattern}""#))?;
        let repair = Regex::new(&format!(r#"\s*\.repair\(\s*"{old_pattern}"\s*,\s*"{}"\s*\)"#, regex::escape(new)))?;
        let renamed = column.replace_all(source, format!(r#".column("{new}""#).as_str());
        Ok(repair.replace_all(&renamed, "").into_owned())
    }
}

impl DeclarationRewriter for SourceRewriter {
    fn rename_column(&mut self, model: &str, old: &str, new: &str) -> Result<bool> {
        let source = fs::read_to_string(&self.path)?;
        let rewritten = Self::rewrite(&source, old, new)?;
        if rewritten == source {
            return Ok(false);
        }
        fs::write(&self.path, rewritten)?;
        debug!(model, old, new, path = %self.path.display(), "rewrote model source");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db::{column, DataType};

    #[test]
    fn test_model_file_round_trip_and_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        let models = vec![ModelDecl::new("Author")
            .column("email", column(DataType::Str))
            .repair("email", "email_address")];
        fs::write(&path, serde_json::to_string(&ModelFile::new(models)).unwrap()).unwrap();

        let mut file = ModelFile::load(&path).unwrap();
        assert_eq!(file.registry().models().len(), 1);
        assert!(file.rename_column("Author", "email", "email_address").unwrap());

        let reloaded = ModelFile::load(&path).unwrap();
        let author = &reloaded.models[0];
        assert!(author.find_column("email_address").is_some());
        assert!(author.find_column("email").is_none());
        assert!(author.repair.is_empty());
        assert!(!file.rename_column("Missing", "a", "b").unwrap());
    }

    #[test]
    fn test_source_rewrite() {
        let source = r#"ModelDecl::new("Author")
    .column("email", column(DataType::Str))
    .column("emails", column(DataType::Str))
    .repair("email", "email_address")"#;
        let rewritten = SourceRewriter::rewrite(source, "email", "email_address").unwrap();
        assert_eq!(
            rewritten,
            r#"ModelDecl::new("Author")
    .column("email_address", column(DataType::Str))
    .column("emails", column(DataType::Str))"#
        );
    }

    #[test]
    fn test_source_rewriter_reports_untouched_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.rs");
        fs::write(&path, r#".column("name", column(DataType::Str))"#).unwrap();
        let mut rewriter = SourceRewriter::new(&path);
        assert!(!rewriter.rename_column("Author", "email", "email_address").unwrap());
    }
}
