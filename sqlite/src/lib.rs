//! SQLite driver for dbstrap connections.
//!
//! This crate opens authenticated connection handles, registers model
//! definitions on them, and applies ledger-tracked migrations.
//!
//! # Architecture
//!
//! - **`handle`**: [`ConnectionHandle`], one shared connection plus its models
//! - **`schema`**: SQL generation for migration steps
//! - **`migration`**: [`MigrationRunner`] and the `SequelizeMeta` ledger
//! - **`models`**: [`load_models`] from a setup directory
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use dbstrap_core::TypeRegistry;
//! use dbstrap_setup::ConnectionConfig;
//! use dbstrap_sqlite::{ConnectionHandle, apply_migrations, load_models};
//!
//! let config = ConnectionConfig::new("main", "app.db");
//! let handle = ConnectionHandle::open(&config, Arc::new(TypeRegistry::new())).unwrap();
//!
//! apply_migrations("setup", &handle).unwrap();
//! let models = load_models("setup", &handle).unwrap();
//! println!("models: {models:?}");
//! ```

mod error;
mod handle;
mod migration;
mod models;
mod schema;

pub use error::{Result, SqliteError};
pub use handle::ConnectionHandle;
pub use migration::{
    LEDGER_TABLE, MigrationRecord, MigrationReport, MigrationRunner, MigrationStatus,
    apply_migrations,
};
pub use models::load_models;
pub use schema::{column_sql, create_index_sql, create_table_sql, index_name, step_sql};
