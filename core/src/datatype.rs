//! The type namespace handed to model and migration descriptors.
//!
//! Descriptor files name column types symbolically (`STRING`, `BIGINT`,
//! `DECIMAL(10,2)`); a [`TypeRegistry`] resolves those names to concrete
//! column types. Custom types are added through [`TypeRegistry::register`]
//! once at startup, before any descriptor is loaded.

use std::collections::BTreeMap;

use crate::validate::ValidationError;

/// A named column type and how it renders in DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataType {
    /// Upper-case symbolic name (`STRING`).
    pub name: String,
    /// SQL type keyword without arguments (`VARCHAR`).
    pub sql: String,
    /// Arguments applied when the declaration gives none (`255`).
    pub default_args: Option<String>,
}

impl DataType {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_uppercase(),
            sql: sql.into(),
            default_args: None,
        }
    }

    pub fn with_default_args(mut self, args: impl Into<String>) -> Self {
        self.default_args = Some(args.into());
        self
    }

    /// Renders the SQL type, preferring explicit arguments over defaults.
    pub fn render(&self, args: Option<&str>) -> String {
        match args.or(self.default_args.as_deref()) {
            Some(args) => format!("{}({})", self.sql, args),
            None => self.sql.clone(),
        }
    }
}

const BUILTIN_TYPES: &[(&str, &str, Option<&str>)] = &[
    ("INTEGER", "INTEGER", None),
    ("BIGINT", "BIGINT", None),
    ("SMALLINT", "SMALLINT", None),
    ("TINYINT", "TINYINT", None),
    ("FLOAT", "FLOAT", None),
    ("REAL", "REAL", None),
    ("DOUBLE", "DOUBLE PRECISION", None),
    ("DECIMAL", "DECIMAL", None),
    ("STRING", "VARCHAR", Some("255")),
    ("CHAR", "CHAR", Some("255")),
    ("TEXT", "TEXT", None),
    ("BOOLEAN", "BOOLEAN", None),
    ("DATE", "DATETIME", None),
    ("DATEONLY", "DATE", None),
    ("TIME", "TIME", None),
    ("JSON", "JSON", None),
    ("BLOB", "BLOB", None),
    ("UUID", "CHAR", Some("36")),
];

/// Registry of column types available to descriptors.
///
/// # Examples
///
/// ```
/// use dbstrap_core::{DataType, TypeRegistry};
///
/// let mut types = TypeRegistry::new();
/// assert_eq!(types.resolve("STRING").unwrap(), "VARCHAR(255)");
/// assert_eq!(types.resolve("string(64)").unwrap(), "VARCHAR(64)");
/// assert_eq!(types.resolve("DECIMAL(10, 2)").unwrap(), "DECIMAL(10, 2)");
/// assert!(types.resolve("GEOMETRY").is_err());
///
/// types.register(DataType::new("GEOMETRY", "BLOB"));
/// assert_eq!(types.resolve("GEOMETRY").unwrap(), "BLOB");
/// ```
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: BTreeMap<String, DataType>,
}

impl TypeRegistry {
    /// Creates a registry holding the built-in types.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for (name, sql, args) in BUILTIN_TYPES {
            let mut data_type = DataType::new(*name, *sql);
            data_type.default_args = args.map(String::from);
            registry.register(data_type);
        }
        registry
    }

    /// Creates a registry with no types at all.
    pub fn empty() -> Self {
        Self {
            types: BTreeMap::new(),
        }
    }

    /// Adds or replaces a type, returning the previous definition.
    pub fn register(&mut self, data_type: DataType) -> Option<DataType> {
        self.types.insert(data_type.name.clone(), data_type)
    }

    pub fn get(&self, name: &str) -> Option<&DataType> {
        self.types.get(&name.to_ascii_uppercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns registered type names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Resolves a declared type such as `STRING` or `STRING(64)` to SQL.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownType`] for unregistered names and
    /// [`ValidationError::InvalidTypeArguments`] for malformed argument lists.
    pub fn resolve(&self, declared: &str) -> Result<String, ValidationError> {
        let (base, args) = split_declaration(declared)?;
        let data_type = self
            .get(base)
            .ok_or_else(|| ValidationError::UnknownType(declared.trim().to_string()))?;
        Ok(data_type.render(args))
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `NAME(args)` into its name and argument list.
fn split_declaration(declared: &str) -> Result<(&str, Option<&str>), ValidationError> {
    let declared = declared.trim();
    let Some(open) = declared.find('(') else {
        return Ok((declared, None));
    };

    let invalid = || ValidationError::InvalidTypeArguments(declared.to_string());
    let inner = declared[open + 1..].strip_suffix(')').ok_or_else(invalid)?;
    if inner.trim().is_empty()
        || !inner
            .chars()
            .all(|c| c.is_ascii_digit() || c == ',' || c == ' ')
    {
        return Err(invalid());
    }

    Ok((declared[..open].trim(), Some(inner)))
}
