//! Declarative column API.
//!
//! A model declares its columns with [`column`], which starts a
//! [`ColumnSpec`] builder from a semantic [`DataType`]. The spec carries
//! no engine-specific text; translation happens when the schema is
//! extracted through a [`Dialect`](crate::Dialect).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};

/// Semantic column type.
///
/// `Raw` holds an engine-specific SQL type and is only accepted when safe
/// typing is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    /// Text.
    Str,
    /// Integer.
    Int,
    /// Floating point, or fixed point when a scale is given.
    Float,
    /// Boolean.
    Bool,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// Date and time.
    DateTime,
    /// Raw SQL type.
    Raw(String),
}

impl DataType {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::Raw(raw) => raw,
        }
    }

    /// Returns true if the type accepts a size class.
    #[must_use]
    pub fn is_sized(&self) -> bool {
        matches!(self, Self::Str | Self::Int | Self::Float)
    }

    /// Returns true for date, time and datetime.
    #[must_use]
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Date | Self::Time | Self::DateTime)
    }
}

impl From<String> for DataType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "str" => Self::Str,
            "int" => Self::Int,
            "float" => Self::Float,
            "bool" => Self::Bool,
            "date" => Self::Date,
            "time" => Self::Time,
            "datetime" => Self::DateTime,
            _ => Self::Raw(s),
        }
    }
}

impl From<&str> for DataType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<DataType> for String {
    fn from(t: DataType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semantic width class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Size {
    /// Extra small.
    Xs,
    /// Small.
    Sm,
    /// Medium.
    Md,
    /// Large.
    Lg,
    /// Extra large.
    Xl,
}

impl Size {
    /// Decimal precision used when a float column carries a scale.
    #[must_use]
    pub fn precision(self) -> u8 {
        match self {
            Self::Xs => 5,
            Self::Sm => 10,
            Self::Md => 20,
            Self::Lg => 30,
            Self::Xl => 38,
        }
    }

    /// Returns the lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xs => "xs",
            Self::Sm => "sm",
            Self::Md => "md",
            Self::Lg => "lg",
            Self::Xl => "xl",
        }
    }
}

impl FromStr for Size {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "xs" => Ok(Self::Xs),
            "sm" => Ok(Self::Sm),
            "md" => Ok(Self::Md),
            "lg" => Ok(Self::Lg),
            "xl" => Ok(Self::Xl),
            other => Err(DbError::invalid("size", other, "expected xs, sm, md, lg or xl")),
        }
    }
}

/// Largest accepted decimal scale.
pub const MAX_SCALE: u8 = 30;

/// Default value for a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal, quoted when rendered.
    Str(String),
    /// Raw SQL expression, rendered verbatim.
    Expr {
        /// The expression text.
        expr: String,
    },
}

impl DefaultValue {
    /// Creates a raw SQL expression default such as `CURRENT_TIMESTAMP`.
    #[must_use]
    pub fn expr(expr: impl Into<String>) -> Self {
        Self::Expr { expr: expr.into() }
    }

    /// Returns true if this default is a raw expression.
    #[must_use]
    pub fn is_expr(&self) -> bool {
        matches!(self, Self::Expr { .. })
    }

    /// Checks that the default matches the column's semantic type.
    pub fn check_type(&self, datatype: &DataType) -> Result<()> {
        let ok = match (datatype, self) {
            (_, Self::Expr { .. })
            | (DataType::Str, Self::Str(_))
            | (DataType::Int, Self::Int(_))
            | (DataType::Float, Self::Float(_) | Self::Int(_))
            | (DataType::Bool, Self::Bool(_)) => true,
            (t, Self::Str(_)) => t.is_temporal(),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(DbError::invalid(
                "default",
                format!("{self:?}"),
                format!("does not match datatype `{datatype}`"),
            ))
        }
    }
}

impl From<&str> for DefaultValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for DefaultValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for DefaultValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for DefaultValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for DefaultValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for DefaultValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Referential action for `ON UPDATE` / `ON DELETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReferentialAction {
    /// Reject the change while referencing rows exist.
    #[default]
    #[serde(rename = "RESTRICT")]
    Restrict,
    /// Propagate the change to referencing rows.
    #[serde(rename = "CASCADE")]
    Cascade,
    /// Set referencing columns to NULL.
    #[serde(rename = "SET NULL")]
    SetNull,
    /// Deferred check, equivalent to restrict at statement end.
    #[serde(rename = "NO ACTION")]
    NoAction,
    /// Set referencing columns to their default.
    #[serde(rename = "SET DEFAULT")]
    SetDefault,
}

impl ReferentialAction {
    /// Returns the SQL keyword(s).
    #[must_use]
    pub fn to_sql(self) -> &'static str {
        match self {
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::NoAction => "NO ACTION",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

impl FromStr for ReferentialAction {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "RESTRICT" => Ok(Self::Restrict),
            "CASCADE" => Ok(Self::Cascade),
            "SET NULL" => Ok(Self::SetNull),
            "NO ACTION" => Ok(Self::NoAction),
            "SET DEFAULT" => Ok(Self::SetDefault),
            _ => Err(DbError::invalid(
                "referential action",
                s,
                "expected RESTRICT, CASCADE, SET NULL, NO ACTION or SET DEFAULT",
            )),
        }
    }
}

/// One declared column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Semantic or raw type.
    pub datatype: DataType,
    /// Width class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
    /// Decimal scale, float columns only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
    /// UNIQUE constraint.
    #[serde(default)]
    pub unique: bool,
    /// NOT NULL constraint.
    #[serde(default)]
    pub not_null: bool,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<DefaultValue>,
    /// CHECK expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
    /// Name of the referenced model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_to: Option<String>,
    /// Action on update of the referenced key.
    #[serde(default)]
    pub on_update: ReferentialAction,
    /// Action on delete of the referenced row.
    #[serde(default)]
    pub on_delete: ReferentialAction,
}

/// Starts a column declaration.
///
/// ```
/// use strata_db::{column, DataType, Size};
///
/// let email = column(DataType::Str).size(Size::Sm).unique().not_null();
/// assert!(email.unique);
/// ```
#[must_use]
pub fn column(datatype: impl Into<DataType>) -> ColumnSpec {
    ColumnSpec {
        datatype: datatype.into(),
        size: None,
        scale: None,
        unique: false,
        not_null: false,
        default: None,
        check: None,
        related_to: None,
        on_update: ReferentialAction::default(),
        on_delete: ReferentialAction::default(),
    }
}

impl ColumnSpec {
    /// Sets the width class.
    #[must_use]
    pub fn size(mut self, size: Size) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets the decimal scale.
    #[must_use]
    pub fn scale(mut self, scale: u8) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Adds a UNIQUE constraint.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Adds a NOT NULL constraint.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Sets the default value.
    #[must_use]
    pub fn default(mut self, value: impl Into<DefaultValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Adds a CHECK constraint.
    #[must_use]
    pub fn check(mut self, expr: impl Into<String>) -> Self {
        self.check = Some(expr.into());
        self
    }

    /// Makes this column a foreign key to the named model's primary key.
    #[must_use]
    pub fn related_to(mut self, model: impl Into<String>) -> Self {
        self.related_to = Some(model.into());
        self
    }

    /// Sets the `ON UPDATE` action.
    #[must_use]
    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    /// Sets the `ON DELETE` action.
    #[must_use]
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Validates datatype, size, scale, default and check.
    ///
    /// With `safe_typing` the type must be one of the semantic types and the
    /// default must match it; without it raw SQL types are passed through.
    pub fn validate(&self, safe_typing: bool) -> Result<()> {
        if let DataType::Raw(raw) = &self.datatype {
            if raw.trim().is_empty() {
                return Err(DbError::MissingParameter("datatype"));
            }
            if safe_typing {
                return Err(DbError::invalid(
                    "datatype",
                    raw,
                    "expected str, int, float, bool, date, time or datetime",
                ));
            }
        }

        if safe_typing {
            if let Some(size) = self.size {
                if !self.datatype.is_sized() {
                    return Err(DbError::invalid(
                        "size",
                        size.as_str(),
                        format!("datatype `{}` takes no size", self.datatype),
                    ));
                }
            }
            if let Some(default) = &self.default {
                default.check_type(&self.datatype)?;
            }
        }

        if let Some(scale) = self.scale {
            if self.datatype != DataType::Float {
                return Err(DbError::invalid("scale", scale, "only float columns take a scale"));
            }
            let precision = self.size.unwrap_or(Size::Md).precision();
            if scale > MAX_SCALE || scale > precision {
                return Err(DbError::invalid(
                    "scale",
                    scale,
                    format!("must not exceed {} or the precision {precision}", MAX_SCALE),
                ));
            }
        }

        if matches!(&self.check, Some(expr) if expr.trim().is_empty()) {
            return Err(DbError::MissingParameter("check"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let spec = column(DataType::Int)
            .size(Size::Lg)
            .not_null()
            .default(0)
            .related_to("Author")
            .on_delete(ReferentialAction::Cascade);
        assert_eq!(spec.size, Some(Size::Lg));
        assert!(spec.not_null);
        assert_eq!(spec.default, Some(DefaultValue::Int(0)));
        assert_eq!(spec.related_to.as_deref(), Some("Author"));
        assert_eq!(spec.on_update, ReferentialAction::Restrict);
        assert_eq!(spec.on_delete, ReferentialAction::Cascade);
    }

    #[test]
    fn test_datatype_parsing() {
        assert_eq!(DataType::from("datetime"), DataType::DateTime);
        assert_eq!(DataType::from("jsonb"), DataType::Raw("jsonb".into()));
        assert_eq!(String::from(DataType::Float), "float");
    }

    #[test]
    fn test_safe_typing_rejects_raw() {
        let spec = column("uuid");
        assert!(matches!(spec.validate(true), Err(DbError::InvalidValue { param: "datatype", .. })));
        assert!(spec.validate(false).is_ok());
    }

    #[test]
    fn test_size_on_bool_rejected() {
        let spec = column(DataType::Bool).size(Size::Xs);
        assert!(matches!(spec.validate(true), Err(DbError::InvalidValue { param: "size", .. })));
    }

    #[test]
    fn test_scale_rules() {
        assert!(column(DataType::Float).scale(2).validate(true).is_ok());
        assert!(column(DataType::Int).scale(2).validate(true).is_err());
        assert!(column(DataType::Float).size(Size::Xs).scale(6).validate(true).is_err());
        assert!(column(DataType::Float).size(Size::Xl).scale(31).validate(true).is_err());
    }

    #[test]
    fn test_default_type_check() {
        assert!(column(DataType::Str).default("x").validate(true).is_ok());
        assert!(column(DataType::Str).default(1).validate(true).is_err());
        assert!(column(DataType::Float).default(1).validate(true).is_ok());
        assert!(column(DataType::Bool).default("yes").validate(true).is_err());
        assert!(column(DataType::Date).default("2024-01-01").validate(true).is_ok());
        assert!(column(DataType::DateTime)
            .default(DefaultValue::expr("CURRENT_TIMESTAMP"))
            .validate(true)
            .is_ok());
    }

    #[test]
    fn test_referential_action_parsing() {
        assert_eq!("set null".parse::<ReferentialAction>().unwrap(), ReferentialAction::SetNull);
        assert!("DROP".parse::<ReferentialAction>().is_err());
    }

    #[test]
    fn test_column_spec_json() {
        let json = r#"{"datatype":"str","size":"xs","not_null":true,"default":{"expr":"'n/a'"}}"#;
        let spec: ColumnSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.datatype, DataType::Str);
        assert_eq!(spec.size, Some(Size::Xs));
        assert!(spec.not_null);
        assert!(spec.default.as_ref().is_some_and(DefaultValue::is_expr));
        assert_eq!(spec.on_delete, ReferentialAction::Restrict);
    }
}
