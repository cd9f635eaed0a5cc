//! Model and migration validation.
//!
//! Catches structural problems in descriptors before anything touches a
//! database: invalid identifiers, unknown column types, indexes over missing
//! columns, and auto-increment columns that are not primary keys.
//!
//! # Examples
//!
//! ```
//! use dbstrap_core::*;
//!
//! let types = TypeRegistry::new();
//! let model = ModelDefinition::new("testOne")
//!     .with_column("id", ColumnSchema::primary_key())
//!     .with_column("value", ColumnSchema::new("BIGINT"));
//! assert!(validate_model(&model, &types).is_empty());
//!
//! let bad = ModelDefinition::new("testOne")
//!     .with_column("value", ColumnSchema::new("GEOMETRY"));
//! assert!(!validate_model(&bad, &types).is_empty());
//! ```

use std::collections::HashSet;

use thiserror::Error;

use crate::{ColumnSchema, IndexSpec, MigrationStep, ModelDefinition, TypeRegistry};

/// Descriptor validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Name is not a plain SQL identifier.
    #[error("invalid identifier '{0}': must start with a letter or underscore and contain only alphanumerics and underscores")]
    InvalidIdentifier(String),
    /// Model has no columns.
    #[error("model '{0}' defines no columns")]
    EmptySchema(String),
    /// Column type is not registered in the type namespace.
    #[error("unknown column type: {0}")]
    UnknownType(String),
    /// Column type arguments are not a list of integers.
    #[error("invalid type arguments: {0}")]
    InvalidTypeArguments(String),
    /// Auto-increment requested on a column that is not the primary key.
    #[error("column '{0}' is auto-increment but not a primary key")]
    AutoIncrementWithoutPrimaryKey(String),
    /// Index lists no fields.
    #[error("index '{0}' has no fields")]
    EmptyIndex(String),
    /// Index refers to a column the model does not define.
    #[error("index '{index}' refers to unknown column '{field}'")]
    UnknownIndexField { index: String, field: String },
    /// Two indexes share a name.
    #[error("duplicate index: {0}")]
    DuplicateIndex(String),
    /// Raw SQL step is empty.
    #[error("empty sql step")]
    EmptySql,
}

/// Returns `true` if `name` is usable as an unquoted table or column name.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Checks a single identifier.
pub fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidIdentifier(name.to_string()))
    }
}

/// Validates a model definition against a type namespace.
pub fn validate_model(model: &ModelDefinition, types: &TypeRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    push_err(&mut errors, validate_identifier(&model.name));
    push_err(&mut errors, validate_identifier(model.table_name()));

    if model.schema.is_empty() {
        errors.push(ValidationError::EmptySchema(model.name.clone()));
    }

    for (name, column) in &model.schema {
        errors.extend(validate_column(name, column, types));
    }

    let mut seen = HashSet::new();
    for index in &model.options.indexes {
        let index_name = index.effective_name();
        if !seen.insert(index_name.clone()) {
            errors.push(ValidationError::DuplicateIndex(index_name.clone()));
        }
        errors.extend(validate_index(index));
        for field in &index.fields {
            if !model.schema.contains_key(field) {
                errors.push(ValidationError::UnknownIndexField {
                    index: index_name.clone(),
                    field: field.clone(),
                });
            }
        }
    }

    errors
}

/// Validates the steps of a migration script.
///
/// Only checks what can be known without a database: identifiers, column
/// types, and non-empty index and SQL bodies.
pub fn validate_steps(steps: &[MigrationStep], types: &TypeRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for step in steps {
        match step {
            MigrationStep::CreateTable { table, columns, .. } => {
                push_err(&mut errors, validate_identifier(table));
                if columns.is_empty() {
                    errors.push(ValidationError::EmptySchema(table.clone()));
                }
                for (name, column) in columns {
                    errors.extend(validate_column(name, column, types));
                }
            }
            MigrationStep::DropTable { table, .. } => {
                push_err(&mut errors, validate_identifier(table));
            }
            MigrationStep::RenameTable { from, to } => {
                push_err(&mut errors, validate_identifier(from));
                push_err(&mut errors, validate_identifier(to));
            }
            MigrationStep::AddColumn {
                table,
                column,
                definition,
            } => {
                push_err(&mut errors, validate_identifier(table));
                errors.extend(validate_column(column, definition, types));
            }
            MigrationStep::RemoveColumn { table, column } => {
                push_err(&mut errors, validate_identifier(table));
                push_err(&mut errors, validate_identifier(column));
            }
            MigrationStep::AddIndex { table, index } => {
                push_err(&mut errors, validate_identifier(table));
                errors.extend(validate_index(index));
            }
            MigrationStep::RemoveIndex { table, name } => {
                push_err(&mut errors, validate_identifier(table));
                push_err(&mut errors, validate_identifier(name));
            }
            MigrationStep::Sql { sql } => {
                if sql.trim().is_empty() {
                    errors.push(ValidationError::EmptySql);
                }
            }
        }
    }

    errors
}

fn validate_column(name: &str, column: &ColumnSchema, types: &TypeRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    push_err(&mut errors, validate_identifier(name));
    push_err(&mut errors, types.resolve(&column.type_name).map(|_| ()));
    if column.auto_increment && !column.primary_key {
        errors.push(ValidationError::AutoIncrementWithoutPrimaryKey(name.to_string()));
    }
    errors
}

fn validate_index(index: &IndexSpec) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let name = index.effective_name();
    if index.fields.is_empty() {
        errors.push(ValidationError::EmptyIndex(name));
        return errors;
    }
    push_err(&mut errors, validate_identifier(&name));
    for field in &index.fields {
        push_err(&mut errors, validate_identifier(field));
    }
    errors
}

fn push_err(errors: &mut Vec<ValidationError>, result: Result<(), ValidationError>) {
    if let Err(err) = result {
        errors.push(err);
    }
}
