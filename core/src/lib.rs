//! Core descriptor types for dbstrap.
//!
//! This crate defines what a setup directory can declare:
//!
//! - [`ModelDefinition`] — a named entity (columns plus options) registered
//!   on a connection handle.
//! - [`MigrationStep`] / [`MigrationScript`] / [`MigrationUnit`] — ordered
//!   schema changes tracked in a ledger table.
//! - [`TypeRegistry`] — the type namespace descriptors resolve column types
//!   against. Custom types are registered here once at startup.
//!
//! Validation ([`validate_model`], [`validate_steps`]) rejects invalid
//! identifiers, unknown types, and broken indexes before any SQL runs.
//!
//! # Example
//!
//! ```
//! use dbstrap_core::*;
//!
//! let mut types = TypeRegistry::new();
//! types.register(DataType::new("GEOMETRY", "BLOB"));
//!
//! let model = ModelDefinition::new("places")
//!     .with_column("id", ColumnSchema::primary_key())
//!     .with_column("shape", ColumnSchema::new("GEOMETRY"));
//! assert!(validate_model(&model, &types).is_empty());
//! ```

mod datatype;
mod types;
mod validate;

pub use datatype::{DataType, TypeRegistry};
pub use types::*;
pub use validate::{
    ValidationError, is_identifier, validate_identifier, validate_model, validate_steps,
};
